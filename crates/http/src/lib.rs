//! The protocol core of a small asynchronous web server
//!
//! This crate holds everything between the bytes of a TCP connection and the
//! application handlers: request parsing, body decoding, response generation
//! and the per-connection state machine. It performs no I/O itself. A
//! reactor (see the `ethweb` crate) delivers transport callbacks and the
//! connection writes through a non-blocking [`transport::Transport`] with a
//! bounded send window, so the same code runs on a tokio socket or on a
//! lwIP-style callback stack.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use ethweb_http::config::ServerConfig;
//! use ethweb_http::connection::HttpConnection;
//! use ethweb_http::handler::{SingleDispatcher, make_handler};
//! use ethweb_http::protocol::WebRequest;
//! use ethweb_http::transport::BufferTransport;
//! use http::StatusCode;
//!
//! let transport = Arc::new(BufferTransport::new(5744));
//! let dispatcher = Arc::new(SingleDispatcher::new(make_handler(|req: &mut WebRequest| {
//!     req.send_content(StatusCode::OK, "text/plain", "Hello World!");
//! })));
//!
//! let mut connection = HttpConnection::new(transport.clone(), dispatcher, Arc::new(ServerConfig::default()));
//! connection.on_data(b"GET / HTTP/1.1\r\nHost: esp\r\n\r\n");
//!
//! let written = transport.take_written();
//! assert!(written.ends_with(b"\r\n\r\nHello World!"));
//! ```
//!
//! # Architecture
//!
//! - [`codec`]: request head, chunked, length and multipart decoding
//! - [`protocol`]: the parsed [`protocol::WebRequest`] and error types
//! - [`response`]: [`response::WebResponse`], its body sources and template expansion
//! - [`handler`]: the [`handler::Handler`] and [`handler::Dispatcher`] seams
//! - [`connection`]: [`connection::HttpConnection`] and stream takeover
//! - [`fs`]: the filesystem abstraction used for static files and uploads
//!
//! # Limitations
//!
//! - HTTP/1.0 and HTTP/1.1 only, one request in flight per connection
//! - Maximum header size: 8KB by default
//! - Maximum number of headers: 64

pub mod codec;
pub mod config;
pub mod connection;
pub mod fs;
pub mod handler;
pub mod protocol;
pub mod response;
pub mod transport;

mod utils;
pub(crate) use utils::ensure;
