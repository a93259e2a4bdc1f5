use http::StatusCode;
use std::io;
use thiserror::Error;

/// Why a request could not be read off the wire.
///
/// Any of these ends the connection: the server answers with
/// [`status_code`](ParseError::status_code) and closes once it is sent.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("request head is {current_size} bytes, more than {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[error("request carries more than {max_num} headers")]
    TooManyHeaders { max_num: usize },

    #[error("malformed header: {reason}")]
    InvalidHeader { reason: String },

    #[error("unsupported http version: {0:?}")]
    InvalidVersion(Option<u8>),

    #[error("unknown request method")]
    InvalidMethod,

    #[error("malformed request target")]
    InvalidUri,

    #[error("bad content-length: {reason}")]
    InvalidContentLength { reason: String },

    #[error("bad chunked framing: {reason}")]
    InvalidChunk { reason: &'static str },

    #[error("declared body of {size} bytes, the limit is {max_size}")]
    TooLargeBody { size: u64, max_size: u64 },

    #[error("malformed body: {reason}")]
    InvalidBody { reason: String },

    #[error("socket error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    pub fn too_many_headers(max_num: usize) -> Self {
        Self::TooManyHeaders { max_num }
    }

    pub fn invalid_header<S: ToString>(reason: S) -> Self {
        Self::InvalidHeader { reason: reason.to_string() }
    }

    pub fn invalid_body<S: ToString>(reason: S) -> Self {
        Self::InvalidBody { reason: reason.to_string() }
    }

    pub fn invalid_content_length<S: ToString>(reason: S) -> Self {
        Self::InvalidContentLength { reason: reason.to_string() }
    }

    pub fn invalid_chunk(reason: &'static str) -> Self {
        Self::InvalidChunk { reason }
    }

    pub fn too_large_body(size: u64, max_size: u64) -> Self {
        Self::TooLargeBody { size, max_size }
    }

    /// The status sent back before the connection is dropped.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::TooLargeBody { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::TooLargeHeader { .. } | Self::TooManyHeaders { .. } => StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
            Self::InvalidVersion(_) => StatusCode::HTTP_VERSION_NOT_SUPPORTED,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}
