use std::fmt;
use std::io;

use bytes::{BufMut, BytesMut};
use http::StatusCode;

use super::{Body, WebResponse};

/// A response assembled with `write!` before it is sent.
///
/// ```
/// use std::fmt::Write;
/// use ethweb_http::response::ResponseStream;
/// use http::StatusCode;
///
/// let mut stream = ResponseStream::new("text/html");
/// write!(stream, "<p>uptime: {}s</p>", 42).unwrap();
/// let response = stream.into_response();
/// assert_eq!(response.status(), StatusCode::OK);
/// ```
pub struct ResponseStream {
    status: StatusCode,
    content_type: String,
    headers: Vec<(String, String)>,
    buf: BytesMut,
}

impl ResponseStream {
    pub fn new(content_type: impl Into<String>) -> Self {
        Self::with_capacity(content_type, 1460)
    }

    pub fn with_capacity(content_type: impl Into<String>, capacity: usize) -> Self {
        Self { status: StatusCode::OK, content_type: content_type.into(), headers: Vec::new(), buf: BytesMut::with_capacity(capacity) }
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_response(self) -> WebResponse {
        let mut response = WebResponse::with_body(self.status, Some(&self.content_type), Body::Buffer(self.buf));
        for (name, value) in &self.headers {
            response.add_header(name, value);
        }
        response
    }
}

impl fmt::Write for ResponseStream {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.buf.put_slice(s.as_bytes());
        Ok(())
    }
}

impl io::Write for ResponseStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
