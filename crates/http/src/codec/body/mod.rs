//! Request body framing and the multipart splitter.
//!
//! - [`PayloadDecoder`] picks [`LengthDecoder`](length_decoder::LengthDecoder)
//!   or [`ChunkedDecoder`] from the request head
//! - [`MultipartParser`] splits `multipart/form-data` bodies into parts
//! - [`ChunkedEncoder`] frames chunked response bodies

mod chunked_decoder;
mod chunked_encoder;
mod length_decoder;
mod multipart;
mod payload_decoder;

pub use chunked_decoder::ChunkedDecoder;
pub use chunked_encoder::{CHUNK_OVERHEAD, ChunkedEncoder};
pub use multipart::{MAX_FIELD_VALUE, MultipartParser, MultipartSink, PartHead, UPLOAD_CHUNK_SIZE};
pub use payload_decoder::PayloadDecoder;
