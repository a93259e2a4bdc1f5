//! The per-connection state machine.
//!
//! [`HttpConnection`] owns everything that belongs to one accepted socket:
//! the receive buffer, the request being parsed, its bound handler and the
//! response being written. It performs no I/O of its own; a reactor feeds it
//! the transport callbacks (`on_data`, `on_ack`, `on_poll`, `on_timeout`,
//! `on_disconnect`) one at a time and it writes through the [`Transport`](crate::transport::Transport).

mod body_reader;
mod hook;
mod http_connection;

pub use hook::{ConnectionHook, Takeover};
pub use http_connection::{ConnectionState, HttpConnection};
