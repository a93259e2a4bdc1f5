//! The request object handed to handlers.
//!
//! A [`WebRequest`] is built from the decoded head, then enriched while the
//! body streams in (POST params, multipart uploads, body buffer). Handlers
//! answer it by attaching a [`WebResponse`] with [`WebRequest::send`], either
//! right away or later through a [`ResponseSender`].

use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use http::header::{ACCEPT, AUTHORIZATION, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, EXPECT, HOST, UPGRADE};
use http::{HeaderMap, HeaderName, Method, StatusCode, Version};
use parking_lot::Mutex;
use tracing::warn;

use crate::fs::FsFile;
use crate::protocol::{ParseError, RequestHeader};
use crate::response::WebResponse;
use crate::utils::url_decode;

/// Keeps every header when listed as interesting.
pub const ANY_HEADER: &str = "ANY";

/// Where a parameter came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamOrigin {
    /// Query string or rewrite target.
    Get,
    /// Form-urlencoded or multipart field.
    Post,
    /// Multipart file part; the value is the file name.
    File,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebParameter {
    name: String,
    value: String,
    origin: ParamOrigin,
    size: u64,
}

impl WebParameter {
    pub fn new(name: impl Into<String>, value: impl Into<String>, origin: ParamOrigin) -> Self {
        Self { name: name.into(), value: value.into(), origin, size: 0 }
    }

    pub fn file(name: impl Into<String>, filename: impl Into<String>, size: u64) -> Self {
        Self { name: name.into(), value: filename.into(), origin: ParamOrigin::File, size }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn origin(&self) -> ParamOrigin {
        self.origin
    }

    pub fn is_post(&self) -> bool {
        matches!(self.origin, ParamOrigin::Post | ParamOrigin::File)
    }

    pub fn is_file(&self) -> bool {
        self.origin == ParamOrigin::File
    }

    /// Uploaded size for file parameters, 0 otherwise.
    pub fn size(&self) -> u64 {
        self.size
    }
}

/// What kind of connection the client asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestedConnType {
    Http,
    WebSocket,
    /// `Accept: text/event-stream`
    Event,
}

/// Credentials carried by the `Authorization` header, scheme stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Basic(String),
    Digest(String),
}

pub struct WebRequest {
    method: Method,
    url: String,
    version: Version,
    host: Option<String>,
    headers: HeaderMap,
    interesting_headers: Vec<String>,
    params: Vec<WebParameter>,
    path_params: Vec<String>,
    content_type: String,
    content_length: Option<u64>,
    boundary: Option<String>,
    expecting_continue: bool,
    authorization: Option<Authorization>,
    conn_type: RequestedConnType,
    body: BytesMut,
    temp_object: Option<Box<dyn Any + Send>>,
    temp_file: Option<Box<dyn FsFile>>,
    temp_path: Option<String>,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
    slot: ResponseSlot,
}

impl WebRequest {
    /// Builds the request from a decoded head.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidUri`] when the query string cannot be decoded.
    pub fn new(header: RequestHeader, local_addr: Option<SocketAddr>, remote_addr: Option<SocketAddr>) -> Result<Self, ParseError> {
        let parts = header.into_parts();

        let mut params = Vec::new();
        if let Some(query) = parts.uri.query() {
            let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query).map_err(|_| ParseError::InvalidUri)?;
            params.extend(pairs.into_iter().map(|(name, value)| WebParameter::new(name, value, ParamOrigin::Get)));
        }

        let headers = parts.headers;
        let header_str = |name: HeaderName| header_value(&headers, name);

        let host = header_str(HOST).map(str::to_owned);
        let (content_type, boundary) = match header_str(CONTENT_TYPE) {
            Some(value) => split_content_type(value),
            None => (String::new(), None),
        };

        let content_length = header_str(CONTENT_LENGTH).and_then(|v| v.trim().parse::<u64>().ok());
        let expecting_continue = header_str(EXPECT).is_some_and(|v| v.trim().eq_ignore_ascii_case("100-continue"));
        let authorization = header_str(AUTHORIZATION).and_then(parse_authorization);

        let conn_type = if header_str(UPGRADE).is_some_and(|v| v.trim().eq_ignore_ascii_case("websocket")) {
            RequestedConnType::WebSocket
        } else if header_str(ACCEPT).is_some_and(|v| v.contains("text/event-stream")) {
            RequestedConnType::Event
        } else {
            RequestedConnType::Http
        };

        Ok(Self {
            method: parts.method,
            url: url_decode(parts.uri.path()),
            version: parts.version,
            host,
            interesting_headers: Vec::new(),
            params,
            path_params: Vec::new(),
            content_type,
            content_length,
            boundary,
            expecting_continue,
            authorization,
            conn_type,
            headers,
            body: BytesMut::new(),
            temp_object: None,
            temp_file: None,
            temp_path: None,
            local_addr,
            remote_addr,
            slot: ResponseSlot::default(),
        })
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The decoded path, after any rewrite.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn set_url(&mut self, url: impl Into<String>) {
        self.url = url.into();
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Media type without parameters, empty when absent.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn is_multipart(&self) -> bool {
        self.boundary.is_some()
    }

    pub fn boundary(&self) -> Option<&str> {
        self.boundary.as_deref()
    }

    pub fn expecting_continue(&self) -> bool {
        self.expecting_continue
    }

    pub fn authorization(&self) -> Option<&Authorization> {
        self.authorization.as_ref()
    }

    pub fn conn_type(&self) -> RequestedConnType {
        self.conn_type
    }

    pub fn is_expected_conn_type(&self, expected: &[RequestedConnType]) -> bool {
        expected.contains(&self.conn_type)
    }

    /// Whether the client allows another request on this connection.
    pub fn wants_keep_alive(&self) -> bool {
        let connection = self.headers.get(CONNECTION).and_then(|v| v.to_str().ok());
        let has_token = |token: &str| connection.is_some_and(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)));
        match self.version {
            Version::HTTP_11 => !has_token("close"),
            _ => has_token("keep-alive"),
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(name)
    }

    /// Keeps `name` past dispatch; everything not listed is dropped.
    pub fn add_interesting_header(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.interesting_headers.iter().any(|h| h.eq_ignore_ascii_case(&name)) {
            self.interesting_headers.push(name);
        }
    }

    pub fn remove_not_interesting_headers(&mut self) {
        if self.interesting_headers.iter().any(|h| h == ANY_HEADER) {
            return;
        }
        let interesting = &self.interesting_headers;
        let headers = std::mem::take(&mut self.headers);
        let mut last_name = None;
        for (name, value) in headers {
            if name.is_some() {
                last_name = name;
            }
            if let Some(name) = &last_name {
                if interesting.iter().any(|h| h.eq_ignore_ascii_case(name.as_str())) {
                    self.headers.append(name.clone(), value);
                }
            }
        }
    }

    pub fn params(&self) -> &[WebParameter] {
        &self.params
    }

    /// First parameter called `name`, whatever its origin.
    pub fn param(&self, name: &str) -> Option<&WebParameter> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn param_with(&self, name: &str, origin: ParamOrigin) -> Option<&WebParameter> {
        self.params.iter().find(|p| p.name == name && p.origin == origin)
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.param(name).is_some()
    }

    /// Value of a GET or POST field called `name`.
    pub fn arg(&self, name: &str) -> Option<&str> {
        self.params.iter().find(|p| p.name == name && !p.is_file()).map(WebParameter::value)
    }

    pub fn add_param(&mut self, param: WebParameter) {
        self.params.push(param);
    }

    pub fn path_params(&self) -> &[String] {
        &self.path_params
    }

    pub fn path_arg(&self, index: usize) -> Option<&str> {
        self.path_params.get(index).map(String::as_str)
    }

    pub fn add_path_param(&mut self, value: impl Into<String>) {
        self.path_params.push(value.into());
    }

    /// The buffered body of a non-multipart request.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub(crate) fn body_mut(&mut self) -> &mut BytesMut {
        &mut self.body
    }

    pub fn set_temp_object<T: Any + Send>(&mut self, object: T) {
        self.temp_object = Some(Box::new(object));
    }

    pub fn temp_object_mut<T: Any + Send>(&mut self) -> Option<&mut T> {
        self.temp_object.as_mut().and_then(|o| o.downcast_mut::<T>())
    }

    pub fn take_temp_object<T: Any + Send>(&mut self) -> Option<T> {
        match self.temp_object.take()?.downcast::<T>() {
            Ok(object) => Some(*object),
            Err(object) => {
                self.temp_object = Some(object);
                None
            }
        }
    }

    pub fn set_temp_file(&mut self, file: Box<dyn FsFile>, path: impl Into<String>) {
        self.temp_file = Some(file);
        self.temp_path = Some(path.into());
    }

    pub fn take_temp_file(&mut self) -> Option<Box<dyn FsFile>> {
        self.temp_file.take()
    }

    pub fn temp_path(&self) -> Option<&str> {
        self.temp_path.as_deref()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Attaches the response. A second response for the same request is dropped.
    pub fn send(&mut self, response: WebResponse) {
        if self.slot.put(response).is_err() {
            warn!(url = %self.url, "response already attached, dropping the new one");
        }
    }

    pub fn send_status(&mut self, status: StatusCode) {
        self.send(WebResponse::new(status));
    }

    pub fn send_content(&mut self, status: StatusCode, content_type: &str, content: impl Into<bytes::Bytes>) {
        self.send(WebResponse::with_content(status, content_type, content));
    }

    /// A handle for answering after `handle_request` returned.
    pub fn defer(&self) -> ResponseSender {
        ResponseSender { slot: self.slot.clone() }
    }

    pub fn has_response(&self) -> bool {
        self.slot.is_attached()
    }

    pub(crate) fn take_response(&self) -> Option<WebResponse> {
        self.slot.take()
    }
}

impl fmt::Debug for WebRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("version", &self.version)
            .field("params", &self.params)
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .field("conn_type", &self.conn_type)
            .finish_non_exhaustive()
    }
}

fn header_value(headers: &HeaderMap, name: HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn split_content_type(value: &str) -> (String, Option<String>) {
    let (media_type, rest) = value.split_once(';').unwrap_or((value, ""));
    let media_type = media_type.trim().to_owned();
    if !media_type.to_ascii_lowercase().starts_with("multipart/") {
        return (media_type, None);
    }
    let boundary = rest
        .split(';')
        .filter_map(|p| p.trim().split_once('='))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, v)| v.trim().trim_matches('"').to_owned())
        .filter(|b| !b.is_empty());
    (media_type, boundary)
}

fn parse_authorization(value: &str) -> Option<Authorization> {
    let (scheme, credentials) = value.trim().split_once(' ')?;
    if scheme.eq_ignore_ascii_case("Basic") {
        Some(Authorization::Basic(credentials.trim().to_owned()))
    } else if scheme.eq_ignore_ascii_case("Digest") {
        Some(Authorization::Digest(credentials.trim().to_owned()))
    } else {
        None
    }
}

#[derive(Default)]
enum SlotState {
    #[default]
    Empty,
    Ready(WebResponse),
    Taken,
}

/// Shared place where a response waits for the connection to pick it up.
#[derive(Clone, Default)]
pub(crate) struct ResponseSlot {
    inner: Arc<Mutex<SlotState>>,
}

impl ResponseSlot {
    fn put(&self, response: WebResponse) -> Result<(), WebResponse> {
        let mut state = self.inner.lock();
        match *state {
            SlotState::Empty => {
                *state = SlotState::Ready(response);
                Ok(())
            }
            _ => Err(response),
        }
    }

    fn take(&self) -> Option<WebResponse> {
        let mut state = self.inner.lock();
        match std::mem::replace(&mut *state, SlotState::Taken) {
            SlotState::Ready(response) => Some(response),
            previous => {
                *state = previous;
                None
            }
        }
    }

    fn is_attached(&self) -> bool {
        !matches!(*self.inner.lock(), SlotState::Empty)
    }
}

/// Answers a request from outside its handler call, e.g. after slow work
/// finished on another task. The connection picks the response up on its next poll.
#[derive(Clone)]
pub struct ResponseSender {
    slot: ResponseSlot,
}

impl ResponseSender {
    /// # Errors
    ///
    /// Gives the response back when the request already has one.
    pub fn send(&self, response: WebResponse) -> Result<(), WebResponse> {
        self.slot.put(response)
    }
}

impl fmt::Debug for ResponseSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseSender").field("attached", &self.slot.is_attached()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::RequestDecoder;
    use crate::protocol::Message;
    use indoc::indoc;
    use tokio_util::codec::Decoder;

    fn request(raw: &str) -> WebRequest {
        let mut buf = BytesMut::from(raw);
        let Some(Message::Header((header, _))) = RequestDecoder::new().decode(&mut buf).unwrap() else {
            panic!("expected a request head");
        };
        WebRequest::new(header, None, None).unwrap()
    }

    #[test]
    fn query_and_path_decoding() {
        let req = request(indoc! {r##"
        GET /files/my%20doc.txt?a=1&b=two+words&a=3 HTTP/1.1
        Host: 192.168.1.10

        "##});

        assert_eq!(req.method(), &Method::GET);
        assert_eq!(req.url(), "/files/my doc.txt");
        assert_eq!(req.host(), Some("192.168.1.10"));
        let values: Vec<_> = req.params().iter().map(|p| (p.name(), p.value())).collect();
        assert_eq!(values, vec![("a", "1"), ("b", "two words"), ("a", "3")]);
        assert_eq!(req.arg("a"), Some("1"));
        assert!(req.params().iter().all(|p| p.origin() == ParamOrigin::Get));
    }

    #[test]
    fn multipart_boundary_and_flags() {
        let req = request(indoc! {r##"
        POST /upload HTTP/1.1
        Content-Type: multipart/form-data; boundary="----abc"
        Content-Length: 0
        Expect: 100-continue
        Authorization: Basic YWRtaW46YWRtaW4=

        "##});

        assert_eq!(req.content_type(), "multipart/form-data");
        assert_eq!(req.boundary(), Some("----abc"));
        assert!(req.expecting_continue());
        assert_eq!(req.authorization(), Some(&Authorization::Basic("YWRtaW46YWRtaW4=".into())));
    }

    #[test]
    fn connection_types() {
        let sse = request("GET /events HTTP/1.1\r\nAccept: text/event-stream\r\n\r\n");
        assert_eq!(sse.conn_type(), RequestedConnType::Event);

        let ws = request("GET /ws HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n");
        assert_eq!(ws.conn_type(), RequestedConnType::WebSocket);

        let plain = request("GET / HTTP/1.1\r\n\r\n");
        assert!(plain.is_expected_conn_type(&[RequestedConnType::Http]));
    }

    #[test]
    fn keep_alive_rules() {
        assert!(request("GET / HTTP/1.1\r\n\r\n").wants_keep_alive());
        assert!(!request("GET / HTTP/1.1\r\nConnection: close\r\n\r\n").wants_keep_alive());
        assert!(!request("GET / HTTP/1.0\r\n\r\n").wants_keep_alive());
        assert!(request("GET / HTTP/1.0\r\nConnection: Keep-Alive\r\n\r\n").wants_keep_alive());
    }

    #[test]
    fn only_interesting_headers_survive() {
        let mut req = request(indoc! {r##"
        GET / HTTP/1.1
        Host: device.local
        If-None-Match: 42
        User-Agent: curl/8.0

        "##});

        req.add_interesting_header("If-None-Match");
        req.remove_not_interesting_headers();
        assert_eq!(req.headers().len(), 1);
        assert_eq!(req.header("if-none-match"), Some("42"));

        let mut req = request("GET / HTTP/1.1\r\nHost: a\r\nX-One: 1\r\n\r\n");
        req.add_interesting_header(ANY_HEADER);
        req.remove_not_interesting_headers();
        assert_eq!(req.headers().len(), 2);
    }

    #[test]
    fn second_response_is_refused() {
        let mut req = request("GET / HTTP/1.1\r\n\r\n");
        req.send_status(StatusCode::OK);
        req.send_status(StatusCode::NOT_FOUND);
        assert_eq!(req.take_response().unwrap().status(), StatusCode::OK);
        assert!(req.take_response().is_none());
        assert!(req.defer().send(WebResponse::new(StatusCode::OK)).is_err());
    }

    #[test]
    fn temp_object_round_trip() {
        let mut req = request("GET / HTTP/1.1\r\n\r\n");
        req.set_temp_object(vec![1u8, 2, 3]);
        req.temp_object_mut::<Vec<u8>>().unwrap().push(4);
        assert!(req.take_temp_object::<String>().is_none());
        assert_eq!(req.take_temp_object::<Vec<u8>>(), Some(vec![1, 2, 3, 4]));
    }
}
