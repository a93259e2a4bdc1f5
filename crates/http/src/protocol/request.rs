//! The decoded head of a request, before it becomes a [`WebRequest`](super::WebRequest).

use http::request::Parts;
use http::{HeaderMap, Method, Request, Uri, Version};

/// Request line and headers as the decoder produced them.
#[derive(Debug)]
pub struct RequestHeader {
    parts: Parts,
}

impl RequestHeader {
    pub fn into_parts(self) -> Parts {
        self.parts
    }

    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    pub fn version(&self) -> Version {
        self.parts.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }
}

impl From<Request<()>> for RequestHeader {
    fn from(request: Request<()>) -> Self {
        Self { parts: request.into_parts().0 }
    }
}
