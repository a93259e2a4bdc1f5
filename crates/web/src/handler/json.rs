use std::io;
use std::sync::Arc;
use std::task::Poll;

use ethweb_http::handler::Handler;
use ethweb_http::protocol::{ANY_HEADER, MethodSet, WebRequest};
use ethweb_http::response::{BodySource, WebResponse};
use http::StatusCode;
use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::filter::Filter;

pub const JSON_MIMETYPE: &str = "application/json";

const DEFAULT_MAX_CONTENT_LENGTH: usize = 16384;

/// A JSON document sent as a response, serialized lazily while it is written.
///
/// ```
/// use ethweb::handler::JsonResponse;
///
/// let mut json = JsonResponse::new(false);
/// json["heap"] = 42.into();
/// json["ssid"] = "lab".into();
/// assert_eq!(json.set_length(), 24);
/// let response = json.into_response();
/// assert!(response.source_valid());
/// ```
#[derive(Debug)]
pub struct JsonResponse {
    root: Value,
    pretty: bool,
    len: usize,
}

impl JsonResponse {
    /// An empty object, or an empty array when `is_array` is set.
    pub fn new(is_array: bool) -> Self {
        let root = if is_array { Value::Array(Vec::new()) } else { Value::Object(Map::new()) };
        Self { root, pretty: false, len: 0 }
    }

    pub fn pretty(is_array: bool) -> Self {
        Self { pretty: true, ..Self::new(is_array) }
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Value {
        &mut self.root
    }

    /// Measures the serialized document; an empty measurement makes the response invalid.
    pub fn set_length(&mut self) -> usize {
        let mut counter = ByteCounter(0);
        let measured = if self.pretty {
            serde_json::to_writer_pretty(&mut counter, &self.root)
        } else {
            serde_json::to_writer(&mut counter, &self.root)
        };
        self.len = match measured {
            Ok(()) => counter.0,
            Err(e) => {
                error!(cause = %e, "can't measure json response");
                0
            }
        };
        self.len
    }

    pub fn into_response(mut self) -> WebResponse {
        if self.len == 0 {
            self.set_length();
        }
        WebResponse::custom(StatusCode::OK, JSON_MIMETYPE, JsonBody { json: self, rendered: None, pos: 0 })
    }
}

impl std::ops::Index<&str> for JsonResponse {
    type Output = Value;

    fn index(&self, key: &str) -> &Value {
        &self.root[key]
    }
}

impl std::ops::IndexMut<&str> for JsonResponse {
    fn index_mut(&mut self, key: &str) -> &mut Value {
        &mut self.root[key]
    }
}

struct ByteCounter(usize);

impl io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct JsonBody {
    json: JsonResponse,
    rendered: Option<Vec<u8>>,
    pos: usize,
}

impl BodySource for JsonBody {
    fn fill(&mut self, buf: &mut [u8]) -> Poll<usize> {
        let json = &self.json;
        let rendered = self.rendered.get_or_insert_with(|| {
            let rendered = if json.pretty { serde_json::to_vec_pretty(&json.root) } else { serde_json::to_vec(&json.root) };
            rendered.unwrap_or_default()
        });
        let rest = &rendered[self.pos.min(rendered.len())..];
        let len = rest.len().min(buf.len());
        buf[..len].copy_from_slice(&rest[..len]);
        self.pos += len;
        Poll::Ready(len)
    }

    fn len(&self) -> Option<u64> {
        Some(self.json.len as u64)
    }

    fn is_valid(&self) -> bool {
        self.json.len > 0
    }
}

pub type JsonRequestFn = Arc<dyn Fn(&mut WebRequest, Value) + Send + Sync>;

/// Parses JSON request bodies for `POST`, `PUT` and `PATCH` under `uri`.
///
/// Bodies up to the maximum are buffered in the request; a larger body is
/// answered 413 and one that does not parse 400.
pub struct JsonHandler {
    uri: String,
    methods: MethodSet,
    on_request: Option<JsonRequestFn>,
    max_content_length: usize,
    filter: Option<Box<dyn Filter>>,
}

impl JsonHandler {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            methods: MethodSet::POST | MethodSet::PUT | MethodSet::PATCH,
            on_request: None,
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
            filter: None,
        }
    }

    pub fn on_request(mut self, f: impl Fn(&mut WebRequest, Value) + Send + Sync + 'static) -> Self {
        self.on_request = Some(Arc::new(f));
        self
    }

    pub fn with_methods(mut self, methods: MethodSet) -> Self {
        self.methods = methods;
        self
    }

    pub fn with_max_content_length(mut self, max_content_length: usize) -> Self {
        self.max_content_length = max_content_length;
        self
    }

    pub fn with_filter(mut self, filter: impl Filter + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    fn uri_matches(&self, url: &str) -> bool {
        self.uri.is_empty() || url == self.uri || url.strip_prefix(self.uri.as_str()).is_some_and(|rest| rest.starts_with('/'))
    }
}

/// The buffered body, kept in the request's temp slot.
struct JsonBuffer(Vec<u8>);

impl Handler for JsonHandler {
    fn filter(&self, req: &WebRequest) -> bool {
        self.filter.as_ref().is_none_or(|filter| filter.check(req))
    }

    fn can_handle(&self, req: &mut WebRequest) -> bool {
        if self.on_request.is_none()
            || !self.methods.contains(req.method())
            || !self.uri_matches(req.url())
            || !req.content_type().eq_ignore_ascii_case(JSON_MIMETYPE)
        {
            return false;
        }
        req.add_interesting_header(ANY_HEADER);
        true
    }

    fn handle_request(&self, req: &mut WebRequest) {
        let Some(on_request) = &self.on_request else {
            req.send_status(StatusCode::INTERNAL_SERVER_ERROR);
            return;
        };

        if let Some(JsonBuffer(body)) = req.take_temp_object::<JsonBuffer>() {
            match serde_json::from_slice::<Value>(&body) {
                Ok(json) => {
                    on_request(req, json);
                    return;
                }
                Err(e) => debug!(url = req.url(), cause = %e, "invalid json body"),
            }
        }

        let too_large = req.content_length().is_some_and(|len| len >= self.max_content_length as u64);
        req.send_status(if too_large { StatusCode::PAYLOAD_TOO_LARGE } else { StatusCode::BAD_REQUEST });
    }

    fn handle_body(&self, req: &mut WebRequest, data: &[u8], index: usize, total: Option<u64>) {
        if self.on_request.is_none() {
            return;
        }
        if total.is_some_and(|total| total >= self.max_content_length as u64) {
            return;
        }
        if index == 0 {
            let capacity = total.and_then(|total| usize::try_from(total).ok()).unwrap_or(data.len());
            req.set_temp_object(JsonBuffer(Vec::with_capacity(capacity)));
        }

        let max = self.max_content_length;
        let overflow = match req.temp_object_mut::<JsonBuffer>() {
            Some(JsonBuffer(buffer)) if buffer.len() + data.len() < max => {
                buffer.extend_from_slice(data);
                false
            }
            Some(_) => true,
            None => false,
        };
        if overflow {
            debug!(url = req.url(), max, "json body too large");
            req.take_temp_object::<JsonBuffer>();
        }
    }
}

impl std::fmt::Debug for JsonHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonHandler")
            .field("uri", &self.uri)
            .field("methods", &self.methods)
            .field("max_content_length", &self.max_content_length)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestClient, request, server};
    use indoc::indoc;
    use serde_json::json;

    #[test]
    fn measured_length_matches_output() {
        let mut compact = JsonResponse::new(false);
        compact["a"] = json!([1, 2]);
        assert_eq!(compact.set_length(), r#"{"a":[1,2]}"#.len());

        let mut pretty = JsonResponse::pretty(true);
        pretty.root_mut().as_array_mut().unwrap().push(json!(1));
        assert_eq!(pretty.set_length(), "[\n  1\n]".len());
    }

    #[test]
    fn can_handle_needs_json_content_type() {
        let handler = JsonHandler::new("/api").on_request(|req, _| req.send_status(StatusCode::OK));

        assert!(handler.can_handle(&mut request("POST /api HTTP/1.1\r\nContent-Type: Application/JSON\r\n\r\n")));
        assert!(handler.can_handle(&mut request("PUT /api/led HTTP/1.1\r\nContent-Type: application/json; charset=utf-8\r\n\r\n")));
        assert!(!handler.can_handle(&mut request("POST /api HTTP/1.1\r\nContent-Type: text/plain\r\n\r\n")));
        assert!(!handler.can_handle(&mut request("GET /api HTTP/1.1\r\nContent-Type: application/json\r\n\r\n")));
        assert!(!handler.can_handle(&mut request("POST /apix HTTP/1.1\r\nContent-Type: application/json\r\n\r\n")));
        assert!(!JsonHandler::new("/api").can_handle(&mut request("POST /api HTTP/1.1\r\nContent-Type: application/json\r\n\r\n")));
    }

    fn json_server(max: usize) -> TestClient {
        let mut server = server();
        server.add_handler(Arc::new(JsonHandler::new("/led").with_max_content_length(max).on_request(|req, json| {
            let mut response = JsonResponse::new(false);
            response["on"] = json["on"].clone();
            req.send(response.into_response());
        })));
        TestClient::new(server)
    }

    #[test]
    fn echoes_parsed_body() {
        let mut client = json_server(DEFAULT_MAX_CONTENT_LENGTH);
        let response = client.send(indoc! {"
            POST /led HTTP/1.1\r
            Content-Type: application/json\r
            Content-Length: 11\r
            \r
            {\"on\":true}"});

        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Content-Type: application/json\r\n"));
        assert!(response.ends_with("\r\n\r\n{\"on\":true}"));
    }

    #[test]
    fn bad_or_oversized_bodies() {
        let mut client = json_server(DEFAULT_MAX_CONTENT_LENGTH);
        let response = client.send("POST /led HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: 5\r\n\r\n{on: ");
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));

        let mut client = json_server(8);
        let response = client.send("POST /led HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: 11\r\n\r\n{\"on\":true}");
        assert!(response.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
    }
}
