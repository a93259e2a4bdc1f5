use std::sync::Arc;

use ethweb_http::handler::Handler;
use ethweb_http::protocol::{ANY_HEADER, MethodSet, WebRequest};
use http::StatusCode;
use tracing::error;

use crate::auth::{Credentials, RequestAuth};
use crate::filter::Filter;
use crate::uri::UriPattern;

pub type RequestFn = Arc<dyn Fn(&mut WebRequest) + Send + Sync>;
/// `(request, filename, index, data, is_final)`
pub type UploadFn = Arc<dyn Fn(&mut WebRequest, &str, usize, &[u8], bool) + Send + Sync>;
/// `(request, data, index, total)`
pub type BodyFn = Arc<dyn Fn(&mut WebRequest, &[u8], usize, Option<u64>) + Send + Sync>;

/// A handler made of closures, bound to a URI pattern and a set of methods.
///
/// ```
/// use ethweb::handler::CallbackHandler;
/// use ethweb_http::protocol::MethodSet;
/// use http::StatusCode;
///
/// let handler = CallbackHandler::new("/heap")
///     .with_methods(MethodSet::GET)
///     .on_request(|req| req.send_content(StatusCode::OK, "text/plain", "42"));
/// ```
pub struct CallbackHandler {
    uri: UriPattern,
    methods: MethodSet,
    on_request: Option<RequestFn>,
    on_upload: Option<UploadFn>,
    on_body: Option<BodyFn>,
    credentials: Option<Credentials>,
    filter: Option<Box<dyn Filter>>,
}

impl CallbackHandler {
    pub fn new(uri: &str) -> Self {
        Self {
            uri: UriPattern::parse(uri),
            methods: MethodSet::ANY,
            on_request: None,
            on_upload: None,
            on_body: None,
            credentials: None,
            filter: None,
        }
    }

    pub fn with_methods(mut self, methods: MethodSet) -> Self {
        self.methods = methods;
        self
    }

    pub fn on_request(mut self, f: impl Fn(&mut WebRequest) + Send + Sync + 'static) -> Self {
        self.on_request = Some(Arc::new(f));
        self
    }

    pub fn on_upload(mut self, f: impl Fn(&mut WebRequest, &str, usize, &[u8], bool) + Send + Sync + 'static) -> Self {
        self.on_upload = Some(Arc::new(f));
        self
    }

    pub fn on_body(mut self, f: impl Fn(&mut WebRequest, &[u8], usize, Option<u64>) + Send + Sync + 'static) -> Self {
        self.on_body = Some(Arc::new(f));
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_filter(mut self, filter: impl Filter + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }
}

impl Handler for CallbackHandler {
    fn filter(&self, req: &WebRequest) -> bool {
        self.filter.as_ref().is_none_or(|filter| filter.check(req))
    }

    fn can_handle(&self, req: &mut WebRequest) -> bool {
        if self.on_request.is_none() || !self.methods.contains(req.method()) || !self.uri.matches(req) {
            return false;
        }
        req.add_interesting_header(ANY_HEADER);
        true
    }

    fn handle_request(&self, req: &mut WebRequest) {
        if !req.check_credentials(self.credentials.as_ref()) {
            return;
        }
        match &self.on_request {
            Some(on_request) => on_request(req),
            None => {
                error!(url = req.url(), "callback handler without request callback");
                req.send_status(StatusCode::INTERNAL_SERVER_ERROR);
            }
        }
    }

    fn handle_upload(&self, req: &mut WebRequest, filename: &str, index: usize, data: &[u8], is_final: bool) {
        if let Some(on_upload) = &self.on_upload {
            on_upload(req, filename, index, data, is_final);
        }
    }

    fn handle_body(&self, req: &mut WebRequest, data: &[u8], index: usize, total: Option<u64>) {
        if let Some(on_body) = &self.on_body {
            on_body(req, data, index, total);
        }
    }
}

impl std::fmt::Debug for CallbackHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackHandler").field("uri", &self.uri).field("methods", &self.methods).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{fn_filter, methods};
    use crate::testing::{TestClient, request, server};

    #[test]
    fn method_and_uri_decide() {
        let handler = CallbackHandler::new("/api").with_methods(MethodSet::GET | MethodSet::POST).on_request(|_| {});

        assert!(handler.can_handle(&mut request("GET /api/v1 HTTP/1.1\r\n\r\n")));
        assert!(handler.can_handle(&mut request("POST /api HTTP/1.1\r\n\r\n")));
        assert!(!handler.can_handle(&mut request("DELETE /api HTTP/1.1\r\n\r\n")));
        assert!(!handler.can_handle(&mut request("GET /apix HTTP/1.1\r\n\r\n")));
    }

    #[test]
    fn missing_request_callback_never_matches() {
        let handler = CallbackHandler::new("");
        let mut req = request("GET / HTTP/1.1\r\n\r\n");
        assert!(!handler.can_handle(&mut req));

        handler.handle_request(&mut req);
        assert!(req.has_response());
    }

    #[test]
    fn credentials_answer_401() {
        let handler = CallbackHandler::new("/secret")
            .with_credentials(Credentials::new("admin", "admin"))
            .with_filter(methods(MethodSet::GET))
            .on_request(|req| req.send_status(StatusCode::OK));

        let req = request("GET /secret HTTP/1.1\r\n\r\n");
        assert!(handler.filter(&req));
        let with_filter = CallbackHandler::new("").with_filter(fn_filter(|_| false));
        assert!(!with_filter.filter(&req));

        let mut server = server();
        server.add_handler(Arc::new(handler));
        let mut client = TestClient::new(server);

        let denied = client.send("GET /secret HTTP/1.1\r\n\r\n");
        assert!(denied.starts_with("HTTP/1.1 401 Unauthorized\r\n"));
        assert!(denied.contains("www-authenticate: Basic realm=\"Login Required\"\r\n"));

        let wrong = client.send("GET /secret HTTP/1.1\r\nAuthorization: Basic YWRtaW46bm9wZQ==\r\n\r\n");
        assert!(wrong.starts_with("HTTP/1.1 401 Unauthorized\r\n"));

        let allowed = client.send("GET /secret HTTP/1.1\r\nAuthorization: Basic YWRtaW46YWRtaW4=\r\n\r\n");
        assert!(allowed.starts_with("HTTP/1.1 200 OK\r\n"));
    }

    #[test]
    fn digest_challenge_on_the_wire() {
        let mut server = server();
        server.on("/admin", MethodSet::GET, |req| {
            if !req.authenticate("admin", "admin", None, false) {
                req.request_authentication(Some("lamp"), true);
                return;
            }
            req.send_status(StatusCode::OK);
        });
        let mut client = TestClient::new(server);

        let response = client.send("GET /admin HTTP/1.1\r\n\r\n");
        assert!(response.starts_with("HTTP/1.1 401 Unauthorized\r\n"));
        let challenge = response.lines().find(|line| line.starts_with("www-authenticate: ")).unwrap();
        assert!(challenge.starts_with("www-authenticate: Digest realm=\"lamp\", qop=\"auth\", nonce=\""));
        assert!(challenge.contains("opaque=\""));
    }
}
