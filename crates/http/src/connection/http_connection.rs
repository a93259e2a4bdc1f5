use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use http::{Method, StatusCode, Version};
use tokio_util::codec::Decoder;
use tracing::{debug, error, trace, warn};

use super::body_reader::BodyReader;
use super::hook::ConnectionHook;
use crate::codec::RequestDecoder;
use crate::config::ServerConfig;
use crate::handler::{Dispatcher, Handler};
use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHeader, WebRequest};
use crate::response::WebResponse;
use crate::transport::Transport;

const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// waiting for a request line
    Idle,
    ParsingRequest,
    /// the handler has the request, no response attached yet
    HandlerRunning,
    SendingResponse,
    /// taken over by a long-lived stream
    EventStream,
    Closing,
    Closed,
}

/// The request being served together with the handler it is bound to.
struct Exchange {
    request: WebRequest,
    handler: Arc<dyn Handler>,
    body: BodyReader,
    keep_alive: bool,
}

/// One accepted connection, driven by transport callbacks.
///
/// Requests are served one at a time: bytes of a following request stay
/// buffered until the current response is complete.
pub struct HttpConnection {
    transport: Arc<dyn Transport>,
    dispatcher: Arc<dyn Dispatcher>,
    config: Arc<ServerConfig>,
    read_buf: BytesMut,
    decoder: RequestDecoder,
    state: ConnectionState,
    exchange: Option<Exchange>,
    response: Option<WebResponse>,
    hook: Option<Box<dyn ConnectionHook>>,
}

impl HttpConnection {
    pub fn new(transport: Arc<dyn Transport>, dispatcher: Arc<dyn Dispatcher>, config: Arc<ServerConfig>) -> Self {
        Self {
            transport,
            dispatcher,
            read_buf: BytesMut::with_capacity(config.read_buffer()),
            decoder: RequestDecoder::with_max_header_bytes(config.max_header_bytes()),
            config,
            state: ConnectionState::Idle,
            exchange: None,
            response: None,
            hook: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// True while the receive timeout applies.
    pub fn awaiting_request(&self) -> bool {
        matches!(self.state, ConnectionState::Idle | ConnectionState::ParsingRequest)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, ConnectionState::Closing | ConnectionState::Closed)
    }

    pub fn on_data(&mut self, data: &[u8]) {
        match self.state {
            ConnectionState::Closing | ConnectionState::Closed => {}
            ConnectionState::EventStream => {
                if let Some(hook) = &mut self.hook {
                    hook.on_data(data);
                }
            }
            _ => {
                self.read_buf.extend_from_slice(data);
                self.process_input();
            }
        }
    }

    pub fn on_ack(&mut self, len: usize) {
        match self.state {
            ConnectionState::EventStream => {
                if let Some(hook) = &mut self.hook {
                    hook.on_ack(len);
                }
            }
            ConnectionState::SendingResponse => {
                if let Some(response) = &mut self.response {
                    response.ack(self.transport.as_ref(), len);
                }
                self.check_response_done();
            }
            _ => {}
        }
    }

    pub fn on_poll(&mut self) {
        match self.state {
            ConnectionState::EventStream => {
                if let Some(hook) = &mut self.hook {
                    hook.on_poll();
                }
            }
            ConnectionState::HandlerRunning => self.check_deferred(),
            ConnectionState::SendingResponse => {
                if let Some(response) = &mut self.response {
                    response.poll(self.transport.as_ref());
                }
                self.check_response_done();
            }
            _ => {}
        }
    }

    pub fn on_timeout(&mut self) {
        match self.state {
            ConnectionState::EventStream => {
                if let Some(hook) = &mut self.hook {
                    hook.on_timeout();
                }
            }
            ConnectionState::Closing | ConnectionState::Closed => {}
            state => {
                debug!(?state, remote = ?self.transport.remote_addr(), "receive timeout, closing connection");
                self.close();
            }
        }
    }

    /// Releases the request, response and any stream hook.
    pub fn on_disconnect(&mut self) {
        if let Some(mut hook) = self.hook.take() {
            hook.on_disconnect();
        }
        self.release();
        self.state = ConnectionState::Closed;
        trace!(remote = ?self.transport.remote_addr(), "connection released");
    }

    fn process_input(&mut self) {
        while self.awaiting_request() {
            let message = match self.decoder.decode(&mut self.read_buf) {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(e) => {
                    self.fail(e);
                    break;
                }
            };

            let result = match message {
                Message::Header((header, payload_size)) => self.on_request_head(header, payload_size),
                Message::Payload(PayloadItem::Chunk(data)) => self.on_body_chunk(data),
                Message::Payload(PayloadItem::Eof) => self.on_request_complete(),
            };
            if let Err(e) = result {
                self.fail(e);
                break;
            }
        }
    }

    fn on_request_head(&mut self, header: RequestHeader, payload_size: PayloadSize) -> Result<(), ParseError> {
        self.state = ConnectionState::ParsingRequest;
        let mut request = WebRequest::new(header, self.transport.local_addr(), self.transport.remote_addr())?;
        let keep_alive = self.config.keep_alive() && request.wants_keep_alive();
        debug!(method = %request.method(), url = request.url(), keep_alive, "request head parsed");

        let max = self.config.max_content_length();
        if !request.is_multipart()
            && let Some(declared) = payload_size.declared_length()
            && declared > max
        {
            return Err(ParseError::too_large_body(declared, max));
        }

        self.dispatcher.apply_rewrites(&mut request);
        let handler = self.dispatcher.attach(&mut request);
        request.remove_not_interesting_headers();

        if request.expecting_continue() && !payload_size.is_empty() {
            trace!("sending 100 continue");
            if self.transport.write(CONTINUE) < CONTINUE.len() {
                warn!("no window for 100 continue");
            }
        }

        let body = BodyReader::for_request(&request, payload_size, max);
        self.exchange = Some(Exchange { request, handler, body, keep_alive });
        Ok(())
    }

    fn on_body_chunk(&mut self, data: Bytes) -> Result<(), ParseError> {
        match &mut self.exchange {
            Some(exchange) => exchange.body.feed(&mut exchange.request, &exchange.handler, data),
            None => Err(ParseError::invalid_body("body without a request head")),
        }
    }

    fn on_request_complete(&mut self) -> Result<(), ParseError> {
        let Some(exchange) = &mut self.exchange else {
            return Err(ParseError::invalid_body("body end without a request head"));
        };
        exchange.body.finish(&mut exchange.request)?;

        self.state = ConnectionState::HandlerRunning;
        let handler = Arc::clone(&exchange.handler);
        handler.handle_request(&mut exchange.request);
        self.check_deferred();
        Ok(())
    }

    /// Starts the response once the handler, or a deferred sender, attached one.
    fn check_deferred(&mut self) {
        if self.state != ConnectionState::HandlerRunning {
            return;
        }
        let Some(exchange) = &self.exchange else {
            return;
        };
        if let Some(response) = exchange.request.take_response() {
            let version = exchange.request.version();
            let head_only = *exchange.request.method() == Method::HEAD;
            let keep_alive = exchange.keep_alive;
            self.start_response(response, version, keep_alive, head_only);
        }
    }

    fn start_response(&mut self, mut response: WebResponse, version: Version, keep_alive: bool, head_only: bool) {
        if !response.source_valid() {
            debug!(status = response.status().as_u16(), "response source unavailable, sending 404");
            response = WebResponse::new(StatusCode::NOT_FOUND);
        }
        if head_only {
            response.set_head_only();
        }

        self.state = ConnectionState::SendingResponse;
        response.respond(self.transport.as_ref(), version, keep_alive);
        self.response = Some(response);
        self.check_response_done();
    }

    fn check_response_done(&mut self) {
        if !self.response.as_ref().is_some_and(WebResponse::finished) {
            return;
        }
        let Some(mut response) = self.response.take() else {
            return;
        };
        trace!(status = response.status().as_u16(), written = response.written(), "response finished");

        if response.failed() {
            self.close();
            return;
        }

        if let Some(takeover) = response.take_takeover() {
            match self.exchange.take() {
                Some(exchange) => {
                    self.hook = Some(takeover(&exchange.request, Arc::clone(&self.transport)));
                    self.state = ConnectionState::EventStream;
                    debug!(url = exchange.request.url(), "connection taken over by stream");
                }
                None => self.close(),
            }
            return;
        }

        self.exchange = None;
        if response.keep_alive() && self.transport.connected() {
            self.state = ConnectionState::Idle;
            // a following request may already be buffered
            self.process_input();
        } else {
            self.close();
        }
    }

    /// Answers a parse or capacity error and closes once it is sent.
    fn fail(&mut self, e: ParseError) {
        let status = e.status_code();
        warn!(cause = %e, status = status.as_u16(), remote = ?self.transport.remote_addr(), "bad request");

        let version = self.exchange.as_ref().map_or(Version::HTTP_11, |ex| ex.request.version());
        self.release();
        self.read_buf.clear();
        self.decoder.reset();

        if self.transport.connected() {
            self.start_response(WebResponse::new(status), version, false, false);
        } else {
            self.close();
        }
    }

    fn close(&mut self) {
        if self.is_closed() {
            return;
        }
        self.state = ConnectionState::Closing;
        self.release();
        self.transport.close();
    }

    fn release(&mut self) {
        if let Some(mut exchange) = self.exchange.take()
            && exchange.request.take_temp_file().is_some()
        {
            trace!("released request temp file");
        }
        if self.response.take().is_some_and(|r| !r.finished()) {
            error!("connection released with an unfinished response");
        }
    }
}
