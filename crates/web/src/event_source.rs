//! Server-sent events.
//!
//! An [`EventSource`] is a handler for one URL. Every `GET` asking for
//! `text/event-stream` is answered with the stream preamble, after which the
//! connection is handed to an [`EventSourceClient`] registered with the
//! source. [`EventSource::send`] formats a frame once and queues the same
//! bytes on every client.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use ethweb_http::connection::{ConnectionHook, Takeover};
use ethweb_http::handler::Handler;
use ethweb_http::protocol::{RequestedConnType, WebRequest};
use ethweb_http::response::WebResponse;
use ethweb_http::transport::Transport;
use http::header::{CACHE_CONTROL, CONNECTION};
use http::{Method, StatusCode};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::auth::{Credentials, RequestAuth};

/// Pending messages per client before the oldest unsent one is dropped.
pub const MAX_QUEUED_MESSAGES: usize = 32;

const LAST_EVENT_ID: &str = "Last-Event-ID";

/// Formats one event-stream frame. Multi-line data becomes several `data:` lines.
pub fn format_event(message: &str, event: Option<&str>, id: Option<u32>, retry: Option<u32>) -> String {
    let mut frame = String::with_capacity(message.len() + 32);
    if let Some(retry) = retry {
        let _ = write!(frame, "retry: {retry}\r\n");
    }
    if let Some(id) = id {
        let _ = write!(frame, "id: {id}\r\n");
    }
    if let Some(event) = event {
        let _ = write!(frame, "event: {event}\r\n");
    }

    let mut rest = message;
    while !rest.is_empty() {
        let (line, next) = match rest.find(['\r', '\n']) {
            Some(at) if rest[at..].starts_with("\r\n") => (&rest[..at], &rest[at + 2..]),
            Some(at) => (&rest[..at], &rest[at + 1..]),
            None => (rest, ""),
        };
        let _ = write!(frame, "data: {line}\r\n");
        rest = next;
    }
    frame.push_str("\r\n");
    frame
}

/// A formatted frame with this client's progress through it.
///
/// `acked <= sent <= len` at all times.
#[derive(Debug, Clone)]
pub struct EventMessage {
    frame: Bytes,
    sent: usize,
    acked: usize,
}

impl EventMessage {
    pub fn new(frame: Bytes) -> Self {
        Self { frame, sent: 0, acked: 0 }
    }

    pub fn len(&self) -> usize {
        self.frame.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.is_empty()
    }

    pub fn sent(&self) -> usize {
        self.sent
    }

    pub fn acked(&self) -> usize {
        self.acked
    }

    pub fn finished(&self) -> bool {
        self.acked == self.frame.len()
    }

    /// Acknowledges up to `len` sent bytes, returning the part that belongs to later messages.
    pub fn ack(&mut self, len: usize) -> usize {
        let taken = len.min(self.sent - self.acked);
        self.acked += taken;
        len - taken
    }

    /// Writes as much of the unsent rest as the transport takes.
    pub fn send(&mut self, transport: &dyn Transport) -> usize {
        if self.sent == self.frame.len() || !transport.can_send() {
            return 0;
        }
        let written = transport.write(&self.frame[self.sent..]);
        self.sent += written;
        written
    }
}

type ConnectFn = Arc<dyn Fn(&Arc<EventSourceClient>) + Send + Sync>;

struct SourceShared {
    url: String,
    clients: Mutex<Vec<Arc<EventSourceClient>>>,
    on_connect: Option<ConnectFn>,
    max_clients: Option<usize>,
    credentials: Option<Credentials>,
}

impl SourceShared {
    fn remove(&self, client: &EventSourceClient) {
        self.clients.lock().retain(|c| !std::ptr::eq(Arc::as_ptr(c), client));
    }
}

/// A broadcast endpoint for server-sent events.
///
/// Clones share the same client set, so one clone can be registered with
/// the server while another is kept to push events.
///
/// ```
/// use ethweb::EventSource;
///
/// let events = EventSource::new("/events").on_connect(|client| {
///     client.send("hello!", None, Some(client.last_id() + 1), Some(1000));
/// });
/// events.send("ping", Some("status"), None, None);
/// assert_eq!(events.count(), 0);
/// ```
#[derive(Clone)]
pub struct EventSource {
    shared: Arc<SourceShared>,
}

impl EventSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(SourceShared {
                url: url.into(),
                clients: Mutex::new(Vec::new()),
                on_connect: None,
                max_clients: None,
                credentials: None,
            }),
        }
    }

    fn configure(mut self, f: impl FnOnce(&mut SourceShared)) -> Self {
        match Arc::get_mut(&mut self.shared) {
            Some(shared) => f(shared),
            None => debug!(url = self.shared.url, "event source already shared, setting ignored"),
        }
        self
    }

    /// Runs for every new client, after it is registered.
    pub fn on_connect(self, f: impl Fn(&Arc<EventSourceClient>) + Send + Sync + 'static) -> Self {
        self.configure(|shared| shared.on_connect = Some(Arc::new(f)))
    }

    /// Answers 503 once `max_clients` streams are open.
    pub fn with_max_clients(self, max_clients: usize) -> Self {
        self.configure(|shared| shared.max_clients = Some(max_clients))
    }

    pub fn with_credentials(self, credentials: Credentials) -> Self {
        self.configure(|shared| shared.credentials = Some(credentials))
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    /// Queues one event on every connected client.
    pub fn send(&self, message: &str, event: Option<&str>, id: Option<u32>, retry: Option<u32>) {
        let frame = Bytes::from(format_event(message, event, id, retry));
        for client in self.clients() {
            if client.connected() {
                client.write(EventMessage::new(frame.clone()));
            }
        }
    }

    /// Closes every client stream.
    pub fn close(&self) {
        for client in self.clients() {
            client.close();
        }
    }

    /// Number of connected clients.
    pub fn count(&self) -> usize {
        self.shared.clients.lock().iter().filter(|c| c.connected()).count()
    }

    /// Mean queue length over connected clients, rounded to the nearest.
    pub fn avg_packets_waiting(&self) -> usize {
        let (total, connected) = self
            .clients()
            .iter()
            .filter(|c| c.connected())
            .fold((0, 0), |(total, connected), c| (total + c.packets_waiting(), connected + 1));
        if connected == 0 { 0 } else { (total + connected / 2) / connected }
    }

    fn clients(&self) -> Vec<Arc<EventSourceClient>> {
        self.shared.clients.lock().clone()
    }

    fn subscribe(shared: &Arc<SourceShared>, req: &WebRequest, transport: Arc<dyn Transport>) -> Box<dyn ConnectionHook> {
        let last_id = req.header(LAST_EVENT_ID).and_then(|id| id.trim().parse().ok()).unwrap_or(0);
        let client = Arc::new(EventSourceClient {
            transport,
            source: Arc::downgrade(shared),
            last_id,
            queue: Mutex::new(VecDeque::new()),
        });
        shared.clients.lock().push(Arc::clone(&client));
        debug!(url = shared.url, remote = ?client.transport.remote_addr(), last_id, "event client connected");

        if let Some(on_connect) = &shared.on_connect {
            on_connect(&client);
        }
        Box::new(EventStreamHook { client })
    }
}

impl Handler for EventSource {
    fn can_handle(&self, req: &mut WebRequest) -> bool {
        if *req.method() != Method::GET || req.url() != self.shared.url || !req.is_expected_conn_type(&[RequestedConnType::Event]) {
            return false;
        }
        req.add_interesting_header(LAST_EVENT_ID);
        true
    }

    fn handle_request(&self, req: &mut WebRequest) {
        if !req.check_credentials(self.shared.credentials.as_ref()) {
            return;
        }
        if let Some(max) = self.shared.max_clients
            && self.count() >= max
        {
            debug!(url = self.shared.url, max, "too many event clients");
            req.send_status(StatusCode::SERVICE_UNAVAILABLE);
            return;
        }

        let shared = Arc::clone(&self.shared);
        let takeover: Takeover = Box::new(move |req: &WebRequest, transport: Arc<dyn Transport>| -> Box<dyn ConnectionHook> {
            EventSource::subscribe(&shared, req, transport)
        });

        let mut response = WebResponse::new(StatusCode::OK);
        response.set_content_type(mime::TEXT_EVENT_STREAM.as_ref());
        response.add_header(CACHE_CONTROL.as_str(), "no-cache").add_header(CONNECTION.as_str(), "keep-alive");
        response.set_takeover(takeover);
        req.send(response);
    }
}

impl std::fmt::Debug for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSource")
            .field("url", &self.shared.url)
            .field("clients", &self.shared.clients.lock().len())
            .field("max_clients", &self.shared.max_clients)
            .finish_non_exhaustive()
    }
}

/// One subscribed connection.
pub struct EventSourceClient {
    transport: Arc<dyn Transport>,
    source: Weak<SourceShared>,
    last_id: u32,
    queue: Mutex<VecDeque<EventMessage>>,
}

impl EventSourceClient {
    /// Queues one event for this client only.
    pub fn send(&self, message: &str, event: Option<&str>, id: Option<u32>, retry: Option<u32>) {
        self.write(EventMessage::new(Bytes::from(format_event(message, event, id, retry))));
    }

    /// Queues a preformatted message.
    pub fn write(&self, message: EventMessage) {
        let mut queue = self.queue.lock();
        if queue.len() >= MAX_QUEUED_MESSAGES {
            match queue.iter().position(|m| m.sent() == 0) {
                Some(oldest_unsent) => {
                    queue.remove(oldest_unsent);
                    debug!(remote = ?self.transport.remote_addr(), "event queue full, dropped oldest message");
                }
                None => {
                    debug!(remote = ?self.transport.remote_addr(), "event queue full, dropped new message");
                    return;
                }
            }
        }
        queue.push_back(message);
        self.run_queue(&mut queue);
    }

    pub fn close(&self) {
        self.transport.close();
    }

    pub fn connected(&self) -> bool {
        self.transport.connected()
    }

    /// The `Last-Event-ID` the client reconnected with, 0 when absent.
    pub fn last_id(&self) -> u32 {
        self.last_id
    }

    pub fn packets_waiting(&self) -> usize {
        self.queue.lock().len()
    }

    /// Sends the head of the queue; the next one starts once it is fully acknowledged.
    fn run_queue(&self, queue: &mut VecDeque<EventMessage>) {
        while queue.front().is_some_and(EventMessage::finished) {
            queue.pop_front();
        }
        if let Some(message) = queue.front_mut() {
            let written = message.send(self.transport.as_ref());
            if written > 0 {
                trace!(written, sent = message.sent(), len = message.len(), "event bytes written");
            }
        }
    }

    fn on_ack(&self, mut len: usize) {
        let mut queue = self.queue.lock();
        while len > 0 {
            let Some(message) = queue.front_mut() else {
                break;
            };
            len = message.ack(len);
            if !message.finished() {
                break;
            }
            queue.pop_front();
        }
        self.run_queue(&mut queue);
    }

    fn on_poll(&self) {
        let mut queue = self.queue.lock();
        self.run_queue(&mut queue);
    }

    fn disconnected(&self) {
        self.queue.lock().clear();
        if let Some(source) = self.source.upgrade() {
            source.remove(self);
        }
        trace!(remote = ?self.transport.remote_addr(), "event client released");
    }
}

impl std::fmt::Debug for EventSourceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSourceClient")
            .field("remote_addr", &self.transport.remote_addr())
            .field("last_id", &self.last_id)
            .field("queued", &self.queue.lock().len())
            .finish_non_exhaustive()
    }
}

/// Forwards connection callbacks to the client owning the stream.
struct EventStreamHook {
    client: Arc<EventSourceClient>,
}

impl ConnectionHook for EventStreamHook {
    fn on_ack(&mut self, len: usize) {
        self.client.on_ack(len);
    }

    fn on_poll(&mut self) {
        self.client.on_poll();
    }

    fn on_timeout(&mut self) {
        self.client.close();
    }

    fn on_disconnect(&mut self) {
        self.client.disconnected();
    }
}
