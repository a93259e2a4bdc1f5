//! Streaming codecs for the request side of a connection and the chunk
//! framing of responses.
//!
//! Bytes are pushed into a [`BytesMut`](bytes::BytesMut) as they arrive and
//! [`RequestDecoder`] is polled until it returns `Ok(None)`. Partial lines are
//! kept in the buffer, so the decoded request does not depend on how the
//! stream was split.
//!
//! ```
//! use ethweb_http::codec::RequestDecoder;
//! use ethweb_http::protocol::Message;
//! use tokio_util::codec::Decoder;
//! use bytes::BytesMut;
//!
//! let mut decoder = RequestDecoder::new();
//! let mut buffer = BytesMut::from("GET /led?on=1 HTTP/1.1\r\nHo");
//! assert!(decoder.decode(&mut buffer).unwrap().is_none());
//!
//! buffer.extend_from_slice(b"st: 192.168.4.1\r\n\r\n");
//! let message = decoder.decode(&mut buffer).unwrap().unwrap();
//! assert!(message.is_header());
//! ```

mod body;
mod header;
mod request_decoder;

pub use body::{
    CHUNK_OVERHEAD, ChunkedDecoder, ChunkedEncoder, MAX_FIELD_VALUE, MultipartParser, MultipartSink, PartHead,
    PayloadDecoder, UPLOAD_CHUNK_SIZE,
};
pub use header::{DEFAULT_MAX_HEADER_BYTES, HeaderDecoder};
pub use request_decoder::RequestDecoder;
