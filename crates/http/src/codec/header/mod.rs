//! Request head parsing.

mod header_decoder;

pub use header_decoder::{DEFAULT_MAX_HEADER_BYTES, HeaderDecoder};
