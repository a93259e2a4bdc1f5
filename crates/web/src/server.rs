use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use ethweb_http::config::ServerConfig;
use ethweb_http::fs::FileSystem;
use ethweb_http::handler::{Dispatcher, Handler};
use ethweb_http::protocol::{ANY_HEADER, MethodSet, WebRequest};
use http::StatusCode;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{Level, debug, error, info, trace, warn};
use tracing_subscriber::FmtSubscriber;

use crate::handler::{BodyFn, CallbackHandler, StaticHandler, UploadFn};
use crate::reactor;
use crate::rewrite::Rewrite;

pub struct ServerBuilder {
    address: Result<Vec<SocketAddr>, ServerError>,
    config: ServerConfig,
}

impl ServerBuilder {
    fn new() -> Self {
        Self { address: Err(ServerError::MissingAddress), config: ServerConfig::default() }
    }

    pub fn address<A: ToSocketAddrs>(mut self, address: A) -> Self {
        self.address = address
            .to_socket_addrs()
            .map(Iterator::collect)
            .map_err(|source| ServerError::InvalidAddress { source });
        self
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// # Errors
    ///
    /// Fails when no usable address was given.
    pub fn build(self) -> Result<Server, ServerError> {
        let address = self.address?;
        if address.is_empty() {
            return Err(ServerError::MissingAddress);
        }
        Ok(Server {
            address,
            config: Arc::new(self.config),
            rewrites: Vec::new(),
            handlers: Vec::new(),
            catch_all: Arc::new(CatchAllHandler::default()),
        })
    }
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("address must be set")]
    MissingAddress,
    #[error("invalid address: {source}")]
    InvalidAddress { source: io::Error },
    #[error("bind {address:?} failed: {source}")]
    Bind { address: Vec<SocketAddr>, source: io::Error },
}

/// The handler registry and the listener that feeds it connections.
///
/// Rewrites and handlers are tried in registration order and the first match
/// wins. Requests nobody claims go to the catch-all, which answers 404
/// unless [`Server::on_not_found`] says otherwise.
pub struct Server {
    address: Vec<SocketAddr>,
    config: Arc<ServerConfig>,
    rewrites: Vec<Rewrite>,
    handlers: Vec<Arc<dyn Handler>>,
    catch_all: Arc<CatchAllHandler>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn add_rewrite(&mut self, rewrite: Rewrite) -> &mut Self {
        self.rewrites.push(rewrite);
        self
    }

    pub fn rewrite(&mut self, from: &str, to: &str) -> &mut Self {
        self.add_rewrite(Rewrite::new(from, to))
    }

    /// Removes the first rewrite from `from` to `to`, params included in `to`.
    pub fn remove_rewrite(&mut self, from: &str, to: &str) -> bool {
        let target = Rewrite::new(from, to);
        let position = self
            .rewrites
            .iter()
            .position(|r| r.from() == target.from() && r.to() == target.to() && r.params() == target.params());
        position.map(|i| self.rewrites.remove(i)).is_some()
    }

    pub fn add_handler(&mut self, handler: Arc<dyn Handler>) -> &mut Self {
        self.handlers.push(handler);
        self
    }

    pub fn remove_handler(&mut self, handler: &Arc<dyn Handler>) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|h| !Arc::ptr_eq(h, handler));
        self.handlers.len() != before
    }

    /// Registers a closure for `uri` and `methods`.
    pub fn on(&mut self, uri: &str, methods: MethodSet, on_request: impl Fn(&mut WebRequest) + Send + Sync + 'static) -> &mut Self {
        self.add_handler(Arc::new(CallbackHandler::new(uri).with_methods(methods).on_request(on_request)))
    }

    /// Serves `path` of `fs` below `uri`; see [`StaticHandler`] for the knobs.
    pub fn serve_static(&mut self, uri: &str, fs: Arc<dyn FileSystem>, path: &str, cache_control: Option<&str>) -> &mut Self {
        self.add_handler(Arc::new(StaticHandler::new(uri, fs, path, cache_control)))
    }

    pub fn on_not_found(&mut self, f: impl Fn(&mut WebRequest) + Send + Sync + 'static) -> &mut Self {
        Arc::make_mut(&mut self.catch_all).on_request = Some(Arc::new(f));
        self
    }

    pub fn on_file_upload(&mut self, f: impl Fn(&mut WebRequest, &str, usize, &[u8], bool) + Send + Sync + 'static) -> &mut Self {
        Arc::make_mut(&mut self.catch_all).on_upload = Some(Arc::new(f));
        self
    }

    pub fn on_request_body(&mut self, f: impl Fn(&mut WebRequest, &[u8], usize, Option<u64>) + Send + Sync + 'static) -> &mut Self {
        Arc::make_mut(&mut self.catch_all).on_body = Some(Arc::new(f));
        self
    }

    /// Drops every rewrite and handler and restores the default catch-all.
    pub fn reset(&mut self) {
        self.rewrites.clear();
        self.handlers.clear();
        self.catch_all = Arc::new(CatchAllHandler::default());
    }

    /// Installs a log subscriber, binds the address and serves until the process ends.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] when the address cannot be bound.
    pub async fn start(self) -> Result<(), ServerError> {
        let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
        if tracing::subscriber::set_global_default(subscriber).is_err() {
            debug!("log subscriber already installed");
        }

        info!("start listening at {:?}", self.address);
        let tcp_listener = match TcpListener::bind(self.address.as_slice()).await {
            Ok(tcp_listener) => tcp_listener,
            Err(e) => {
                error!(cause = %e, "bind server error");
                return Err(ServerError::Bind { address: self.address, source: e });
            }
        };

        self.serve(tcp_listener).await;
        Ok(())
    }

    /// Accepts connections from an already bound listener.
    pub async fn serve(self, tcp_listener: TcpListener) {
        let config = Arc::clone(&self.config);
        let dispatcher: Arc<dyn Dispatcher> = Arc::new(self);
        loop {
            let (tcp_stream, remote_addr) = match tcp_listener.accept().await {
                Ok(stream_and_addr) => stream_and_addr,
                Err(e) => {
                    warn!(cause = %e, "failed to accept");
                    continue;
                }
            };

            trace!(%remote_addr, "accepted connection");
            let dispatcher = Arc::clone(&dispatcher);
            let config = Arc::clone(&config);
            tokio::spawn(reactor::run_connection(tcp_stream, dispatcher, config));
        }
    }
}

impl Dispatcher for Server {
    fn apply_rewrites(&self, req: &mut WebRequest) {
        for rewrite in &self.rewrites {
            if rewrite.matches(req) {
                rewrite.apply(req);
            }
        }
    }

    fn attach(&self, req: &mut WebRequest) -> Arc<dyn Handler> {
        for handler in &self.handlers {
            if handler.filter(req) && handler.can_handle(req) {
                return Arc::clone(handler);
            }
        }

        trace!(url = req.url(), "no handler matched, using catch-all");
        req.add_interesting_header(ANY_HEADER);
        Arc::clone(&self.catch_all) as Arc<dyn Handler>
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("address", &self.address)
            .field("config", &self.config)
            .field("rewrites", &self.rewrites)
            .field("handlers", &self.handlers.len())
            .finish_non_exhaustive()
    }
}

/// Binds every request no registered handler claimed.
#[derive(Clone, Default)]
struct CatchAllHandler {
    on_request: Option<Arc<dyn Fn(&mut WebRequest) + Send + Sync>>,
    on_upload: Option<UploadFn>,
    on_body: Option<BodyFn>,
}

impl Handler for CatchAllHandler {
    fn can_handle(&self, _req: &mut WebRequest) -> bool {
        true
    }

    fn handle_request(&self, req: &mut WebRequest) {
        match &self.on_request {
            Some(on_request) => on_request(req),
            None => req.send_status(StatusCode::NOT_FOUND),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{fn_filter, methods};
    use crate::testing::{TestClient, server};
    use ethweb_http::fs::MemoryFs;
    use indoc::indoc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    #[test]
    fn builder_requires_address() {
        assert!(matches!(Server::builder().build(), Err(ServerError::MissingAddress)));
        assert!(matches!(Server::builder().address("not an address").build(), Err(ServerError::InvalidAddress { .. })));
    }

    #[test]
    fn rewrites_chain_in_order() {
        let mut server = server();
        server.rewrite("/", "/home").rewrite("/home", "/index.htm?lang=en");
        server.on("/index.htm", MethodSet::GET, |req| {
            let body = format!("{} {}", req.url(), req.arg("lang").unwrap_or("-"));
            req.send_content(StatusCode::OK, "text/plain", body);
        });

        let mut client = TestClient::new(server);
        assert!(client.send("GET / HTTP/1.1\r\n\r\n").ends_with("\r\n\r\n/index.htm en"));
    }

    #[test]
    fn first_matching_handler_wins() {
        let mut server = server();
        server.add_handler(Arc::new(
            CallbackHandler::new("/x")
                .with_filter(fn_filter(|req| req.host() == Some("other")))
                .on_request(|req| req.send_content(StatusCode::OK, "text/plain", "filtered")),
        ));
        server.add_handler(Arc::new(
            CallbackHandler::new("/x").with_filter(methods(MethodSet::GET)).on_request(|req| req.send_content(StatusCode::OK, "text/plain", "first")),
        ));
        server.on("/x", MethodSet::ANY, |req| req.send_content(StatusCode::OK, "text/plain", "second"));

        let mut client = TestClient::new(server);
        assert!(client.send("GET /x HTTP/1.1\r\nHost: esp\r\n\r\n").ends_with("first"));
        assert!(client.send("POST /x HTTP/1.1\r\nContent-Length: 0\r\n\r\n").ends_with("second"));
    }

    #[test]
    fn unmatched_requests_hit_the_catch_all() {
        let mut client = TestClient::new(server());
        assert!(client.send("GET /nope HTTP/1.1\r\n\r\n").starts_with("HTTP/1.1 404 Not Found\r\n"));

        let mut server = server();
        server.on_not_found(|req| {
            let agent = req.header("user-agent").unwrap_or_default().to_owned();
            req.send_content(StatusCode::NOT_FOUND, "text/plain", agent);
        });
        let mut client = TestClient::new(server);
        let response = client.send(indoc! {"
            GET /missing HTTP/1.1\r
            User-Agent: lamp-panel\r
            \r
        "});
        assert!(response.ends_with("\r\n\r\nlamp-panel"));
    }

    #[test]
    fn removing_handlers_and_rewrites() {
        let mut server = server();
        let handler: Arc<dyn Handler> = Arc::new(CallbackHandler::new("/a").on_request(|req| req.send_status(StatusCode::OK)));
        server.add_handler(Arc::clone(&handler)).rewrite("/b", "/a?x=1");

        assert!(server.remove_rewrite("/b", "/a?x=1"));
        assert!(!server.remove_rewrite("/b", "/a"));
        assert!(server.remove_handler(&handler));
        assert!(!server.remove_handler(&handler));
    }

    #[test]
    fn static_files_with_gzip_sibling() {
        let fs = MemoryFs::new();
        fs.insert("/www/index.htm", "<h1>home</h1>");
        fs.insert("/www/app.js.gz", vec![0x1f, 0x8b, 0x08, 0x00]);

        let mut server = server();
        server.serve_static("/static", Arc::new(fs), "/www", Some("max-age=600"));
        let mut client = TestClient::new(server);

        let index = client.send("GET /static/ HTTP/1.1\r\n\r\n");
        assert!(index.contains("Content-Type: text/html\r\n"));
        assert!(index.contains("content-disposition: inline; filename=\"index.htm\"\r\n"));
        assert!(index.ends_with("<h1>home</h1>"));

        let script = client.send("GET /static/app.js HTTP/1.1\r\n\r\n");
        assert!(script.contains("Content-Type: application/javascript\r\n"));
        assert!(script.contains("content-encoding: gzip\r\n"));
        assert!(script.contains("etag: 4\r\n"));

        let cached = client.send("GET /static/app.js HTTP/1.1\r\nIf-None-Match: 4\r\n\r\n");
        assert!(cached.starts_with("HTTP/1.1 304 Not Modified\r\n"));

        assert!(client.send("GET /static/missing.css HTTP/1.1\r\n\r\n").starts_with("HTTP/1.1 404"));
    }

    #[test]
    fn default_file_from_gzip_sibling() {
        let fs = MemoryFs::new();
        fs.insert("/www/index.htm.gz", vec![0x1f, 0x8b, 0x08, 0x00, 0x01]);

        let mut server = server();
        server.serve_static("/", Arc::new(fs), "/www/", None);
        let mut client = TestClient::new(server);

        let index = client.send("GET / HTTP/1.1\r\n\r\n");
        assert!(index.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(index.contains("Content-Length: 5\r\n"));
        assert!(index.contains("Content-Type: text/html\r\n"));
        assert!(index.contains("content-encoding: gzip\r\n"));
        assert!(index.contains("content-disposition: inline; filename=\"index.htm\"\r\n"));
    }

    #[tokio::test]
    async fn serves_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let mut server = Server::builder().address(address).build().unwrap();
        server.on("/hello", MethodSet::GET, |req| req.send_content(StatusCode::OK, "text/plain", "Hello World!"));
        tokio::spawn(server.serve(listener));

        let mut stream = TcpStream::connect(address).await.unwrap();
        stream.write_all(b"GET /hello HTTP/1.1\r\nConnection: close\r\n\r\n").await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200 OK\r\nConnection: close\r\n"));
        assert!(response.ends_with("\r\n\r\nHello World!"));
    }
}
