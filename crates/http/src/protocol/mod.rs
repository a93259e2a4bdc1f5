//! Protocol types shared by the codecs, the connection and the handlers.
//!
//! - [`Message`], [`PayloadItem`] and [`PayloadSize`]: what the decoder yields
//! - [`RequestHeader`]: a decoded request head
//! - [`WebRequest`]: the request handed to handlers, with parameters, body
//!   and the slot its response is attached to
//! - [`MethodSet`]: method bitmask used for handler matching
//! - [`ParseError`]: why a request was rejected, and the status it earns

mod message;
pub use message::Message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod request;
pub use request::RequestHeader;

mod method;
pub use method::MethodSet;

mod web_request;
pub use web_request::{
    ANY_HEADER, Authorization, ParamOrigin, RequestedConnType, ResponseSender, WebParameter, WebRequest,
};

mod error;
pub use error::ParseError;
