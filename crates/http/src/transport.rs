//! The socket side of a connection.
//!
//! A [`Transport`] is whatever delivers bytes for one accepted connection: a
//! tokio socket task, a vendor TCP stack binding, or the in-memory
//! [`BufferTransport`] used for tests and simulation. Writes are never
//! blocking: the transport accepts at most [`Transport::space`] bytes and the
//! caller retries once acknowledgements free up window.

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::net::SocketAddr;

/// Outbound half of a connection, shared between the connection and any
/// long-lived stream that takes it over.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// Queues as much of `data` as the window allows, returning the accepted length.
    fn write(&self, data: &[u8]) -> usize;

    /// Bytes that can be written right now.
    fn space(&self) -> usize;

    fn can_send(&self) -> bool {
        self.connected() && self.space() > 0
    }

    fn connected(&self) -> bool;

    /// Closes the connection once queued bytes are flushed.
    fn close(&self);

    fn local_addr(&self) -> Option<SocketAddr>;

    fn remote_addr(&self) -> Option<SocketAddr>;
}

/// An in-memory transport with a fixed send window.
///
/// Written bytes accumulate until [`BufferTransport::take_written`]; the window
/// only reopens after [`BufferTransport::ack_all`], mirroring a TCP stack that
/// frees send buffer on acknowledgement.
#[derive(Debug)]
pub struct BufferTransport {
    window: usize,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
    inner: Mutex<BufferState>,
}

#[derive(Debug, Default)]
struct BufferState {
    written: BytesMut,
    in_flight: usize,
    closed: bool,
}

impl BufferTransport {
    pub fn new(window: usize) -> Self {
        Self { window, local_addr: None, remote_addr: None, inner: Mutex::new(BufferState::default()) }
    }

    pub fn with_addrs(mut self, local_addr: SocketAddr, remote_addr: SocketAddr) -> Self {
        self.local_addr = Some(local_addr);
        self.remote_addr = Some(remote_addr);
        self
    }

    /// Everything written so far, draining the capture buffer.
    pub fn take_written(&self) -> Bytes {
        self.inner.lock().written.split().freeze()
    }

    /// Acknowledges all in-flight bytes, returning how many were acknowledged.
    pub fn ack_all(&self) -> usize {
        std::mem::take(&mut self.inner.lock().in_flight)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

impl Transport for BufferTransport {
    fn write(&self, data: &[u8]) -> usize {
        let mut inner = self.inner.lock();
        if inner.closed {
            return 0;
        }
        let accepted = data.len().min(self.window - inner.in_flight);
        inner.written.extend_from_slice(&data[..accepted]);
        inner.in_flight += accepted;
        accepted
    }

    fn space(&self) -> usize {
        let inner = self.inner.lock();
        if inner.closed { 0 } else { self.window - inner.in_flight }
    }

    fn connected(&self) -> bool {
        !self.inner.lock().closed
    }

    fn close(&self) {
        self.inner.lock().closed = true;
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_limits_writes() {
        let transport = BufferTransport::new(8);
        assert_eq!(transport.write(b"hello"), 5);
        assert_eq!(transport.space(), 3);
        assert_eq!(transport.write(b"world"), 3);
        assert!(!transport.can_send());

        assert_eq!(transport.ack_all(), 8);
        assert_eq!(transport.write(b"ld"), 2);
        assert_eq!(&transport.take_written()[..], b"helloworld");
    }

    #[test]
    fn closed_transport_rejects_writes() {
        let transport = BufferTransport::new(8);
        transport.close();
        assert_eq!(transport.write(b"x"), 0);
        assert!(!transport.connected());
    }
}
