//! Runs one [`HttpConnection`] on a tokio socket.
//!
//! The connection never touches the socket. Its writes land in the
//! [`TcpTransport`] queue, which this task flushes; a flushed chunk is
//! reported back as acknowledged so the connection can refill the window.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use ethweb_http::config::ServerConfig;
use ethweb_http::connection::HttpConnection;
use ethweb_http::handler::Dispatcher;
use ethweb_http::transport::Transport;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

pub(crate) struct TcpTransport {
    window: usize,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
    outbound: Mutex<Outbound>,
    wakeup: Notify,
}

#[derive(Default)]
struct Outbound {
    queued: BytesMut,
    /// accepted but not yet handed to the kernel
    in_flight: usize,
    close_requested: bool,
    disconnected: bool,
}

impl TcpTransport {
    pub(crate) fn new(window: usize, local_addr: Option<SocketAddr>, remote_addr: Option<SocketAddr>) -> Self {
        Self { window, local_addr, remote_addr, outbound: Mutex::new(Outbound::default()), wakeup: Notify::new() }
    }

    fn take_queued(&self) -> Bytes {
        self.outbound.lock().queued.split().freeze()
    }

    fn release(&self, len: usize) {
        let mut outbound = self.outbound.lock();
        outbound.in_flight = outbound.in_flight.saturating_sub(len);
    }

    fn close_requested(&self) -> bool {
        self.outbound.lock().close_requested
    }

    fn mark_disconnected(&self) {
        self.outbound.lock().disconnected = true;
    }

    async fn notified(&self) {
        self.wakeup.notified().await;
    }
}

impl Transport for TcpTransport {
    fn write(&self, data: &[u8]) -> usize {
        let mut outbound = self.outbound.lock();
        if outbound.close_requested || outbound.disconnected {
            return 0;
        }
        let accepted = data.len().min(self.window - outbound.in_flight);
        if accepted == 0 {
            return 0;
        }
        outbound.queued.extend_from_slice(&data[..accepted]);
        outbound.in_flight += accepted;
        drop(outbound);
        self.wakeup.notify_one();
        accepted
    }

    fn space(&self) -> usize {
        let outbound = self.outbound.lock();
        if outbound.close_requested || outbound.disconnected { 0 } else { self.window - outbound.in_flight }
    }

    fn connected(&self) -> bool {
        let outbound = self.outbound.lock();
        !outbound.close_requested && !outbound.disconnected
    }

    fn close(&self) {
        self.outbound.lock().close_requested = true;
        self.wakeup.notify_one();
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let outbound = self.outbound.lock();
        f.debug_struct("TcpTransport")
            .field("remote_addr", &self.remote_addr)
            .field("in_flight", &outbound.in_flight)
            .field("close_requested", &outbound.close_requested)
            .finish_non_exhaustive()
    }
}

/// Serves `stream` until either side closes it.
pub(crate) async fn run_connection(stream: TcpStream, dispatcher: Arc<dyn Dispatcher>, config: Arc<ServerConfig>) {
    let local_addr = stream.local_addr().ok();
    let remote_addr = stream.peer_addr().ok();
    if let Err(e) = stream.set_nodelay(true) {
        warn!(?remote_addr, cause = %e, "can't set TCP_NODELAY");
    }

    let transport = Arc::new(TcpTransport::new(config.tx_window(), local_addr, remote_addr));
    let mut conn = HttpConnection::new(Arc::clone(&transport) as Arc<dyn Transport>, dispatcher, Arc::clone(&config));

    let (mut reader, mut writer) = stream.into_split();
    let mut read_buf = BytesMut::with_capacity(config.read_buffer());
    let mut ticker = time::interval(config.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_rx = Instant::now();

    loop {
        let queued = transport.take_queued();
        if !queued.is_empty() {
            if let Err(e) = writer.write_all(&queued).await {
                debug!(?remote_addr, cause = %e, "write failed");
                break;
            }
            transport.release(queued.len());
            conn.on_ack(queued.len());
            continue;
        }

        if transport.close_requested() {
            if let Err(e) = writer.shutdown().await {
                trace!(?remote_addr, cause = %e, "shutdown failed");
            }
            break;
        }

        let awaiting = conn.awaiting_request();
        if !awaiting {
            last_rx = Instant::now();
        }
        read_buf.reserve(config.read_buffer());

        tokio::select! {
            read = reader.read_buf(&mut read_buf) => match read {
                Ok(0) => {
                    trace!(?remote_addr, "peer closed connection");
                    break;
                }
                Ok(_) => {
                    last_rx = Instant::now();
                    let data = read_buf.split();
                    conn.on_data(&data);
                }
                Err(e) => {
                    debug!(?remote_addr, cause = %e, "read failed");
                    break;
                }
            },
            _ = ticker.tick() => conn.on_poll(),
            () = transport.notified() => {}
            () = time::sleep_until(last_rx + config.rx_timeout()), if awaiting => conn.on_timeout(),
        }
    }

    transport.mark_disconnected();
    conn.on_disconnect();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_counts_unflushed_bytes() {
        let transport = TcpTransport::new(8, None, None);
        assert_eq!(transport.write(b"hello"), 5);
        assert_eq!(transport.write(b"world"), 3);
        assert_eq!(transport.space(), 0);

        let queued = transport.take_queued();
        assert_eq!(&queued[..], b"hellowor");
        assert_eq!(transport.space(), 0);
        transport.release(queued.len());
        assert_eq!(transport.space(), 8);
    }

    #[test]
    fn close_stops_writes() {
        let transport = TcpTransport::new(8, None, None);
        transport.close();
        assert!(transport.close_requested());
        assert!(!transport.connected());
        assert_eq!(transport.write(b"late"), 0);
        assert!(!transport.can_send());
    }
}
