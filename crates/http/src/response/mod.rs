//! Responses and the machinery that writes them under backpressure.
//!
//! A [`WebResponse`] is built by a handler and attached to its request. The
//! connection then calls [`WebResponse::respond`] once and
//! [`WebResponse::ack`] for every acknowledgement from the transport. Each
//! call writes at most [`Transport::space`] bytes: first the cached head,
//! then body bytes pulled from the [`Body`] on demand, chunk framed or
//! template expanded when asked to.

mod body;
mod stream;
mod template;

pub use body::{Body, BodySource, FillFn};
pub use stream::ResponseStream;
pub use template::{MAX_TOKEN_LEN, TEMPLATE_DELIMITER, TemplateCallback, TemplateProcessor};

use std::fmt;
use std::fmt::Write as _;
use std::io::Read;
use std::task::Poll;

use bytes::{Buf, Bytes, BytesMut};
use http::header::{CONNECTION, CONTENT_DISPOSITION, CONTENT_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Version};
use tokio_util::codec::Encoder;
use tracing::{debug, trace, warn};

use crate::codec::{CHUNK_OVERHEAD, ChunkedEncoder};
use crate::connection::Takeover;
use crate::fs::{FileSystem, FsFile, OpenMode};
use crate::protocol::PayloadItem;
use crate::transport::Transport;

/// Largest payload of a single response chunk; its size fits four hex digits.
const MAX_CHUNK_PAYLOAD: usize = 0xFFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseState {
    /// not handed to a connection yet
    Setup,
    /// head partly written
    Headers,
    Content,
    /// everything written, waiting for acknowledgements
    WaitAck,
    End,
    /// the body ended before its announced length
    Failed,
}

pub struct WebResponse {
    status: StatusCode,
    headers: HeaderMap,
    content_type: Option<String>,
    body: Body,
    send_content_length: bool,
    template: Option<TemplateProcessor>,
    takeover: Option<Takeover>,

    state: ResponseState,
    head: Bytes,
    /// framed body bytes the window had no room for
    pending: BytesMut,
    encoder: Option<ChunkedEncoder>,
    content_length: Option<u64>,
    /// bytes handed out after template expansion
    body_produced: u64,
    /// bytes pulled from the body source
    source_offset: usize,
    body_done: bool,
    written: u64,
    acked: u64,
    keep_alive: bool,
    head_only: bool,
}

impl WebResponse {
    pub fn new(status: StatusCode) -> Self {
        Self::with_body(status, None, Body::Empty)
    }

    pub fn with_body(status: StatusCode, content_type: Option<&str>, body: Body) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            content_type: content_type.map(str::to_owned),
            body,
            send_content_length: true,
            template: None,
            takeover: None,
            state: ResponseState::Setup,
            head: Bytes::new(),
            pending: BytesMut::new(),
            encoder: None,
            content_length: None,
            body_produced: 0,
            source_offset: 0,
            body_done: false,
            written: 0,
            acked: 0,
            keep_alive: false,
            head_only: false,
        }
    }

    pub fn with_content(status: StatusCode, content_type: &str, content: impl Into<Bytes>) -> Self {
        Self::with_body(status, Some(content_type), Body::Bytes(content.into()))
    }

    /// Content stored in flash, sent without copying it to the heap first.
    pub fn from_static(status: StatusCode, content_type: &str, content: &'static [u8]) -> Self {
        Self::with_body(status, Some(content_type), Body::Static(content))
    }

    pub fn stream(status: StatusCode, content_type: &str, reader: impl Read + Send + 'static, len: Option<u64>) -> Self {
        Self::with_body(status, Some(content_type), Body::Stream { reader: Box::new(reader), len })
    }

    /// Content produced by `fill` as the window opens. Without a length the
    /// body ends the connection.
    pub fn callback(
        status: StatusCode,
        content_type: &str,
        len: Option<u64>,
        fill: impl FnMut(&mut [u8], usize) -> Poll<usize> + Send + 'static,
    ) -> Self {
        Self::with_body(status, Some(content_type), Body::Callback { fill: Box::new(fill), len })
    }

    /// Like [`WebResponse::callback`] but sent with chunked framing on HTTP/1.1.
    pub fn chunked(
        status: StatusCode,
        content_type: &str,
        fill: impl FnMut(&mut [u8], usize) -> Poll<usize> + Send + 'static,
    ) -> Self {
        Self::with_body(status, Some(content_type), Body::Chunked(Box::new(fill)))
    }

    pub fn custom(status: StatusCode, content_type: &str, source: impl BodySource + 'static) -> Self {
        Self::with_body(status, Some(content_type), Body::Custom(Box::new(source)))
    }

    /// Opens `path`, or its `.gz` sibling sent with `Content-Encoding: gzip`.
    ///
    /// When neither opens the response is invalid and the connection answers
    /// 404 instead. The content type defaults to the one of `path`.
    pub fn file(fs: &dyn FileSystem, path: &str, content_type: Option<&str>, download: bool) -> Self {
        let gz_path = format!("{path}.gz");
        let opened = match fs.open(path, OpenMode::Read) {
            Ok(file) if !file.is_directory() => Some((file, false)),
            _ => fs.open(&gz_path, OpenMode::Read).ok().filter(|f| !f.is_directory()).map(|f| (f, true)),
        };

        match opened {
            Some((file, gzipped)) => {
                let mut response = Self::from_file(file, path, content_type, download);
                if gzipped {
                    response.insert_header(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
                }
                response
            }
            None => {
                debug!(path, "file response source missing");
                Self::with_body(StatusCode::NOT_FOUND, None, Body::Custom(Box::new(Missing)))
            }
        }
    }

    /// Serves an already opened file under the name `path`.
    pub fn from_file(file: Box<dyn FsFile>, path: &str, content_type: Option<&str>, download: bool) -> Self {
        let content_type = content_type.map(str::to_owned).unwrap_or_else(|| content_type_for(path));
        let mut response = Self::with_body(StatusCode::OK, Some(&content_type), Body::File(file));

        let filename = path.rsplit('/').next().unwrap_or(path);
        let disposition = if download {
            format!("attachment; filename=\"{filename}\"")
        } else {
            format!("inline; filename=\"{filename}\"")
        };
        if let Ok(value) = HeaderValue::from_str(&disposition) {
            response.insert_header(CONTENT_DISPOSITION, value);
        }
        response
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn set_content_type(&mut self, content_type: impl Into<String>) {
        self.content_type = Some(content_type.into());
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Appends a header; names or values that are not valid HTTP are dropped.
    pub fn add_header(&mut self, name: &str, value: &str) -> &mut Self {
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => warn!(name, "ignoring invalid response header"),
        }
        self
    }

    pub fn insert_header(&mut self, name: HeaderName, value: HeaderValue) -> &mut Self {
        self.headers.insert(name, value);
        self
    }

    /// Whether `Content-Length` is announced when the length is known.
    pub fn set_content_length(&mut self, send: bool) -> &mut Self {
        self.send_content_length = send;
        self
    }

    /// Expands `%token%` placeholders through `callback` while sending.
    ///
    /// The expanded length is unknown, so the body is sent without
    /// `Content-Length` and ends the connection.
    pub fn set_template(&mut self, callback: TemplateCallback) -> &mut Self {
        self.template = Some(TemplateProcessor::new(callback));
        self
    }

    /// Hands the connection to a long-lived stream once the head is acknowledged.
    pub fn set_takeover(&mut self, takeover: Takeover) -> &mut Self {
        self.takeover = Some(takeover);
        self.send_content_length = false;
        self
    }

    pub(crate) fn take_takeover(&mut self) -> Option<Takeover> {
        self.takeover.take()
    }

    pub fn has_takeover(&self) -> bool {
        self.takeover.is_some()
    }

    /// Sends only the head, as for a HEAD request.
    pub(crate) fn set_head_only(&mut self) {
        self.head_only = true;
    }

    pub fn source_valid(&self) -> bool {
        self.body.is_valid()
    }

    pub fn state(&self) -> ResponseState {
        self.state
    }

    pub fn started(&self) -> bool {
        self.state != ResponseState::Setup
    }

    pub fn finished(&self) -> bool {
        matches!(self.state, ResponseState::End | ResponseState::Failed)
    }

    pub fn failed(&self) -> bool {
        self.state == ResponseState::Failed
    }

    /// Whether the connection may serve another request after this one.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn acked(&self) -> u64 {
        self.acked
    }

    /// Builds the head and starts writing.
    ///
    /// `keep_alive` is what the request asked for; the response downgrades
    /// it when its own length is not delimited.
    pub fn respond(&mut self, transport: &dyn Transport, version: Version, keep_alive: bool) {
        if self.state != ResponseState::Setup {
            warn!(state = ?self.state, "response already started");
            return;
        }

        let chunked = self.body.is_chunked() && self.template.is_none() && version == Version::HTTP_11;
        self.content_length = if self.template.is_some() { None } else { self.body.len() };
        let wants_close = self.headers.get(CONNECTION).is_some_and(|v| v.as_bytes().eq_ignore_ascii_case(b"close"));
        let delimited = (self.content_length.is_some() && self.send_content_length) || chunked || self.takeover.is_some();
        self.keep_alive = keep_alive && !wants_close && delimited;
        if chunked {
            self.encoder = Some(ChunkedEncoder::new());
        }

        self.head = self.assemble_head(version, chunked);
        trace!(status = self.status.as_u16(), head_len = self.head.len(), keep_alive = self.keep_alive, "response head ready");
        self.state = ResponseState::Headers;
        self.pump(transport);
    }

    /// Accounts acknowledged bytes and keeps writing.
    pub fn ack(&mut self, transport: &dyn Transport, len: usize) {
        self.acked = (self.acked + len as u64).min(self.written);
        self.pump(transport);
    }

    /// Retries a body that answered `Pending`.
    pub fn poll(&mut self, transport: &dyn Transport) {
        self.pump(transport);
    }

    fn assemble_head(&self, version: Version, chunked: bool) -> Bytes {
        let mut head = String::with_capacity(128);
        let minor = if version == Version::HTTP_10 { 0 } else { 1 };
        let _ = write!(head, "HTTP/1.{minor} {} {}\r\n", self.status.as_u16(), self.status.canonical_reason().unwrap_or(""));

        if !self.keep_alive && !self.headers.contains_key(CONNECTION) {
            head.push_str("Connection: close\r\n");
        }
        if let (Some(len), true) = (self.content_length, self.send_content_length) {
            let _ = write!(head, "Content-Length: {len}\r\n");
        }
        if let Some(content_type) = &self.content_type {
            let _ = write!(head, "Content-Type: {content_type}\r\n");
        }

        let mut head = BytesMut::from(head.as_bytes());
        for (name, value) in &self.headers {
            head.extend_from_slice(name.as_str().as_bytes());
            head.extend_from_slice(b": ");
            head.extend_from_slice(value.as_bytes());
            head.extend_from_slice(b"\r\n");
        }
        if chunked {
            head.extend_from_slice(b"Accept-Ranges: none\r\nTransfer-Encoding: chunked\r\n");
        }
        head.extend_from_slice(b"\r\n");
        head.freeze()
    }

    fn write_some(&mut self, transport: &dyn Transport, data: &[u8]) -> usize {
        let n = transport.write(data);
        self.written += n as u64;
        n
    }

    fn pump(&mut self, transport: &dyn Transport) {
        loop {
            match self.state {
                ResponseState::Setup | ResponseState::End | ResponseState::Failed => return,
                ResponseState::WaitAck => {
                    if self.acked >= self.written {
                        self.state = ResponseState::End;
                        trace!(written = self.written, "response complete");
                    }
                    return;
                }
                ResponseState::Headers => {
                    let head_written = self.written as usize;
                    if head_written >= self.head.len() {
                        self.state = if self.head_only || self.takeover.is_some() {
                            ResponseState::WaitAck
                        } else {
                            ResponseState::Content
                        };
                        continue;
                    }
                    if !transport.can_send() {
                        return;
                    }
                    let head = self.head.clone();
                    if self.write_some(transport, &head[head_written..]) == 0 {
                        return;
                    }
                }
                ResponseState::Content => {
                    if !self.pending.is_empty() {
                        if !transport.can_send() {
                            return;
                        }
                        let pending = std::mem::take(&mut self.pending);
                        let n = self.write_some(transport, &pending);
                        self.pending = pending;
                        self.pending.advance(n);
                        if n == 0 || !self.pending.is_empty() {
                            return;
                        }
                        continue;
                    }
                    if !transport.can_send() {
                        return;
                    }
                    match self.produce(transport.space()) {
                        Poll::Ready(true) => {}
                        Poll::Ready(false) => {
                            if self.state == ResponseState::Content {
                                self.state = ResponseState::WaitAck;
                            }
                        }
                        Poll::Pending => return,
                    }
                }
            }
        }
    }

    /// Pulls body bytes into `pending`. `Ready(false)` once the body has
    /// ended and everything produced has been written.
    fn produce(&mut self, space: usize) -> Poll<bool> {
        if !self.body_done {
            match self.fill_body(space) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(true) => return Poll::Ready(true),
                Poll::Ready(false) => self.finish_body(),
            }
        }
        Poll::Ready(!self.pending.is_empty())
    }

    /// `Ready(true)` when bytes were added to `pending`, `Ready(false)` at the end.
    fn fill_body(&mut self, space: usize) -> Poll<bool> {
        let mut limit = match self.encoder {
            Some(_) if space <= CHUNK_OVERHEAD => return Poll::Pending,
            Some(_) => (space - CHUNK_OVERHEAD).min(MAX_CHUNK_PAYLOAD),
            None => space,
        };
        if let Some(len) = self.content_length {
            let left = len.saturating_sub(self.body_produced);
            if left == 0 {
                return Poll::Ready(false);
            }
            limit = limit.min(usize::try_from(left).unwrap_or(usize::MAX));
        }

        let mut buf = vec![0u8; limit];
        let body = &mut self.body;
        let source_offset = &mut self.source_offset;
        let mut pull = |raw: &mut [u8]| {
            let filled = body.fill(raw, *source_offset);
            if let Poll::Ready(n) = filled {
                *source_offset += n;
            }
            filled
        };
        let filled = match &mut self.template {
            Some(template) => template.fill(&mut buf, &mut pull),
            None => pull(&mut buf),
        };

        match filled {
            Poll::Pending => Poll::Pending,
            Poll::Ready(0) => Poll::Ready(false),
            Poll::Ready(n) => {
                self.body_produced += n as u64;
                match &mut self.encoder {
                    Some(encoder) => {
                        // encoding into memory cannot fail
                        let _ = encoder.encode(PayloadItem::Chunk(&buf[..n]), &mut self.pending);
                    }
                    None => self.pending.extend_from_slice(&buf[..n]),
                }
                Poll::Ready(true)
            }
        }
    }

    fn finish_body(&mut self) {
        self.body_done = true;
        if let Some(encoder) = &mut self.encoder {
            let _ = encoder.encode(PayloadItem::<&[u8]>::Eof, &mut self.pending);
        }
        if let Some(len) = self.content_length
            && self.body_produced < len
        {
            warn!(produced = self.body_produced, announced = len, "response body ended early");
            self.state = ResponseState::Failed;
        }
    }
}

impl fmt::Debug for WebResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebResponse")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .field("body", &self.body)
            .field("state", &self.state)
            .field("written", &self.written)
            .field("acked", &self.acked)
            .finish_non_exhaustive()
    }
}

/// Stands in for a file that could not be opened.
struct Missing;

impl BodySource for Missing {
    fn fill(&mut self, _buf: &mut [u8]) -> Poll<usize> {
        Poll::Ready(0)
    }

    fn len(&self) -> Option<u64> {
        Some(0)
    }

    fn is_valid(&self) -> bool {
        false
    }
}

/// Content type for a file name, from its extension.
pub fn content_type_for(path: &str) -> String {
    let path = path.strip_suffix(".gz").unwrap_or(path);
    let ext = path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()).unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => mime::TEXT_HTML.to_string(),
        "css" => mime::TEXT_CSS.to_string(),
        "json" => mime::APPLICATION_JSON.to_string(),
        "js" => mime::APPLICATION_JAVASCRIPT.to_string(),
        "png" => mime::IMAGE_PNG.to_string(),
        "gif" => mime::IMAGE_GIF.to_string(),
        "jpg" | "jpeg" => mime::IMAGE_JPEG.to_string(),
        "ico" => "image/x-icon".to_owned(),
        "svg" => mime::IMAGE_SVG.to_string(),
        "eot" => "font/eot".to_owned(),
        "woff" => mime::FONT_WOFF.to_string(),
        "woff2" => mime::FONT_WOFF2.to_string(),
        "ttf" => "font/ttf".to_owned(),
        "xml" => mime::TEXT_XML.to_string(),
        "pdf" => mime::APPLICATION_PDF.to_string(),
        "zip" => "application/zip".to_owned(),
        "gz" => "application/x-gzip".to_owned(),
        _ => mime::TEXT_PLAIN.to_string(),
    }
}
