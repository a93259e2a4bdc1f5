//! An asynchronous web server for small networked devices.
//!
//! A [`Server`] holds rewrites and handlers in registration order; each
//! request is bound to the first handler that accepts it, or to the
//! catch-all. Connections run on tokio, one task each, driving an
//! [`ethweb_http::connection::HttpConnection`].
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ethweb::{EventSource, Server};
//! use ethweb_http::protocol::MethodSet;
//! use http::StatusCode;
//!
//! #[tokio::main]
//! async fn main() {
//!     let events = EventSource::new("/events");
//!
//!     let mut server = Server::builder().address("0.0.0.0:80").build().unwrap();
//!     server
//!         .on("/", MethodSet::GET, |req| req.send_content(StatusCode::OK, "text/plain", "Hello World!"))
//!         .add_handler(Arc::new(events.clone()));
//!
//!     server.start().await.unwrap();
//! }
//! ```

pub mod auth;
pub mod event_source;
pub mod filter;
pub mod handler;
pub mod link;

mod reactor;
mod rewrite;
mod server;
mod uri;

#[cfg(test)]
mod testing;

pub use event_source::EventSource;
pub use rewrite::Rewrite;
pub use server::{Server, ServerBuilder, ServerError};
pub use uri::UriPattern;
