//! Server tunables shared by the connection state machine and the reactor.

use std::time::Duration;

/// Limits and timings for every connection of a server.
///
/// Defaults follow a small lwIP-style stack: a 3 second receive timeout, a
/// 5744 byte send window and a 16 KiB cap on buffered request bodies.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    rx_timeout: Duration,
    poll_interval: Duration,
    tx_window: usize,
    read_buffer: usize,
    max_header_bytes: usize,
    max_content_length: u64,
    keep_alive: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            rx_timeout: Duration::from_secs(3),
            poll_interval: Duration::from_millis(500),
            tx_window: 5744,
            read_buffer: 1460,
            max_header_bytes: 8 * 1024,
            max_content_length: 16 * 1024,
            keep_alive: true,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// How long a connection may stay silent while a request is expected.
    pub fn with_rx_timeout(mut self, rx_timeout: Duration) -> Self {
        self.rx_timeout = rx_timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Outbound bytes a connection may have unacknowledged at once.
    pub fn with_tx_window(mut self, tx_window: usize) -> Self {
        self.tx_window = tx_window;
        self
    }

    pub fn with_read_buffer(mut self, read_buffer: usize) -> Self {
        self.read_buffer = read_buffer;
        self
    }

    pub fn with_max_header_bytes(mut self, max_header_bytes: usize) -> Self {
        self.max_header_bytes = max_header_bytes;
        self
    }

    /// Largest non-multipart body buffered for a handler, larger ones get 413.
    pub fn with_max_content_length(mut self, max_content_length: u64) -> Self {
        self.max_content_length = max_content_length;
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn rx_timeout(&self) -> Duration {
        self.rx_timeout
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn tx_window(&self) -> usize {
        self.tx_window
    }

    pub fn read_buffer(&self) -> usize {
        self.read_buffer
    }

    pub fn max_header_bytes(&self) -> usize {
        self.max_header_bytes
    }

    pub fn max_content_length(&self) -> u64 {
        self.max_content_length
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }
}
