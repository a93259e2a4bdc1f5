//! Helpers shared by the unit tests of this crate.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use ethweb_http::codec::RequestDecoder;
use ethweb_http::connection::{ConnectionState, HttpConnection};
use ethweb_http::protocol::{Message, WebRequest};
use ethweb_http::transport::BufferTransport;
use tokio_util::codec::Decoder;

use crate::Server;

/// Parses the head in `raw` into a request seen on `local`.
pub(crate) fn request_on(raw: &str, local: Option<SocketAddr>) -> WebRequest {
    let mut buf = BytesMut::from(raw);
    match RequestDecoder::new().decode(&mut buf) {
        Ok(Some(Message::Header((header, _)))) => WebRequest::new(header, local, None).unwrap(),
        _ => panic!("no request head in {raw:?}"),
    }
}

pub(crate) fn request(raw: &str) -> WebRequest {
    request_on(raw, None)
}

pub(crate) fn server() -> Server {
    Server::builder().address("127.0.0.1:0").build().unwrap()
}

/// Drives a server through one in-memory connection.
pub(crate) struct TestClient {
    pub(crate) conn: HttpConnection,
    pub(crate) transport: Arc<BufferTransport>,
}

impl TestClient {
    pub(crate) fn new(server: Server) -> Self {
        let config = Arc::new(server.config().clone());
        let local: SocketAddr = "192.168.1.20:80".parse().unwrap();
        let remote: SocketAddr = "192.168.1.50:50000".parse().unwrap();
        let transport = Arc::new(BufferTransport::new(config.tx_window()).with_addrs(local, remote));
        let conn = HttpConnection::new(Arc::clone(&transport) as _, Arc::new(server), config);
        Self { conn, transport }
    }

    /// Sends `raw` and collects everything the server wrote, acknowledging as it goes.
    pub(crate) fn send(&mut self, raw: &str) -> String {
        self.conn.on_data(raw.as_bytes());
        let mut written = Vec::new();
        for _ in 0..1024 {
            written.extend_from_slice(&self.transport.take_written());
            if self.conn.state() != ConnectionState::SendingResponse {
                break;
            }
            let acked = self.transport.ack_all();
            self.conn.on_ack(acked);
        }
        String::from_utf8_lossy(&written).into_owned()
    }

    /// Acknowledges outstanding bytes and returns what was written since.
    pub(crate) fn ack(&mut self) -> String {
        let acked = self.transport.ack_all();
        self.conn.on_ack(acked);
        String::from_utf8_lossy(&self.transport.take_written()).into_owned()
    }

    pub(crate) fn poll(&mut self) -> String {
        self.conn.on_poll();
        String::from_utf8_lossy(&self.transport.take_written()).into_owned()
    }
}
