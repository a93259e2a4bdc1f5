//! Request head decoder.
//!
//! Parses the request line and header block with `httparse`, keeping partial
//! input in the buffer until the blank line arrives, then picks how the body
//! is delimited.
//!
//! # Limits
//!
//! - Maximum number of headers: 64
//! - Maximum head size: configurable, 8KB by default
//! - HTTP/1.0 and HTTP/1.1 only

use std::mem::MaybeUninit;

use bytes::BytesMut;
use http::{HeaderName, HeaderValue, Method, Request, Uri, Version};
use httparse::{Error, Status};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::protocol::{ParseError, PayloadSize, RequestHeader};
use crate::utils::ensure;

/// Maximum number of headers allowed in a request
const MAX_HEADER_NUM: usize = 64;

/// Default maximum size in bytes for the request line plus headers
pub const DEFAULT_MAX_HEADER_BYTES: usize = 8 * 1024;

/// Decodes a request head into a [`RequestHeader`] and its [`PayloadSize`].
#[derive(Debug, Clone, Copy)]
pub struct HeaderDecoder {
    max_header_bytes: usize,
}

impl Default for HeaderDecoder {
    fn default() -> Self {
        Self { max_header_bytes: DEFAULT_MAX_HEADER_BYTES }
    }
}

impl HeaderDecoder {
    pub fn with_max_header_bytes(max_header_bytes: usize) -> Self {
        Self { max_header_bytes }
    }
}

impl Decoder for HeaderDecoder {
    type Item = (RequestHeader, PayloadSize);
    type Error = ParseError;

    /// # Errors
    ///
    /// Fails when the head is larger than allowed, has too many headers,
    /// uses an unsupported version or carries a malformed length.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let mut req = httparse::Request::new(&mut []);
        let mut headers = [const { MaybeUninit::<httparse::Header<'_>>::uninit() }; MAX_HEADER_NUM];

        let status = req.parse_with_uninit_headers(src, &mut headers).map_err(|e| match e {
            Error::TooManyHeaders => ParseError::too_many_headers(MAX_HEADER_NUM),
            e => ParseError::invalid_header(e),
        })?;

        let body_offset = match status {
            Status::Complete(body_offset) => body_offset,
            Status::Partial => {
                ensure!(src.len() <= self.max_header_bytes, ParseError::too_large_header(src.len(), self.max_header_bytes));
                return Ok(None);
            }
        };

        trace!(head_size = body_offset, "parsed request head");
        ensure!(body_offset <= self.max_header_bytes, ParseError::too_large_header(body_offset, self.max_header_bytes));

        let version = match req.version {
            Some(0) => Version::HTTP_10,
            Some(1) => Version::HTTP_11,
            v => return Err(ParseError::InvalidVersion(v)),
        };

        let mut request = Request::new(());
        *request.method_mut() =
            Method::from_bytes(req.method.ok_or(ParseError::InvalidMethod)?.as_bytes()).map_err(|_| ParseError::InvalidMethod)?;
        *request.uri_mut() = req.path.ok_or(ParseError::InvalidUri)?.parse::<Uri>().map_err(|_| ParseError::InvalidUri)?;
        *request.version_mut() = version;

        let header_map = request.headers_mut();
        header_map.reserve(req.headers.len());
        for header in req.headers.iter() {
            let name = HeaderName::from_bytes(header.name.as_bytes()).map_err(ParseError::invalid_header)?;
            let value = HeaderValue::from_bytes(header.value).map_err(ParseError::invalid_header)?;
            header_map.append(name, value);
        }

        // the head is fully copied into `request`, drop it from the buffer
        let _ = src.split_to(body_offset);

        let header = RequestHeader::from(request);
        let payload_size = parse_payload(&header)?;
        Ok(Some((header, payload_size)))
    }
}

/// Chooses the body framing from Transfer-Encoding and Content-Length,
/// refusing requests that carry both.
fn parse_payload(header: &RequestHeader) -> Result<PayloadSize, ParseError> {
    let te_header = header.headers().get(http::header::TRANSFER_ENCODING);
    let cl_header = header.headers().get(http::header::CONTENT_LENGTH);

    match (te_header, cl_header) {
        (None, None) => Ok(PayloadSize::Empty),

        (Some(te_value), None) => {
            if is_chunked(te_value) {
                Ok(PayloadSize::Chunked)
            } else {
                Err(ParseError::invalid_header("unsupported transfer-encoding"))
            }
        }

        (None, Some(cl_value)) => {
            let length = parse_content_length(cl_value.as_bytes())?;
            Ok(if length == 0 { PayloadSize::Empty } else { PayloadSize::Length(length) })
        }

        (Some(_), Some(_)) => Err(ParseError::invalid_content_length("transfer_encoding and content_length both present in headers")),
    }
}

/// Strict decimal parse: surrounding whitespace is allowed, signs are not.
fn parse_content_length(value: &[u8]) -> Result<u64, ParseError> {
    let digits = value.trim_ascii();
    ensure!(!digits.is_empty(), ParseError::invalid_content_length("empty value"));

    digits.iter().try_fold(0u64, |acc, b| match b {
        b'0'..=b'9' => acc.checked_mul(10).and_then(|acc| acc.checked_add(u64::from(b - b'0'))).ok_or_else(|| ParseError::invalid_content_length("value overflows u64")),
        _ => Err(ParseError::invalid_content_length(format!("{:?} is not a decimal number", String::from_utf8_lossy(digits)))),
    })
}

/// Chunked must be the last transfer coding to frame the body.
fn is_chunked(value: &HeaderValue) -> bool {
    value.as_bytes().rsplit(|b| *b == b',').next().is_some_and(|last| last.trim_ascii().eq_ignore_ascii_case(b"chunked"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, Method, Version};
    use indoc::indoc;

    #[test]
    fn check_is_chunked() {
        let chunked = |v: &'static str| is_chunked(&HeaderValue::from_static(v));
        assert!(chunked("chunked"));
        assert!(chunked("gzip, Chunked"));
        assert!(!chunked("chunked, gzip"));
        assert!(!chunked("gzip"));
    }

    #[test]
    fn content_length_is_strict() {
        assert_eq!(parse_content_length(b"42").unwrap(), 42);
        assert_eq!(parse_content_length(b" 7 ").unwrap(), 7);
        assert!(parse_content_length(b"+42").is_err());
        assert!(parse_content_length(b"-1").is_err());
        assert!(parse_content_length(b"4 2").is_err());
        assert!(parse_content_length(b"0x10").is_err());
        assert!(parse_content_length(b"").is_err());
        assert!(parse_content_length(b"99999999999999999999999").is_err());
    }

    #[test]
    fn leaves_body_in_buffer() {
        let str = indoc! {r##"
        POST /api/led HTTP/1.1
        Host: 192.168.4.1
        Content-Length: 3

        123"##};

        let mut bytes = BytesMut::from(str);
        let (header, payload_size) = HeaderDecoder::default().decode(&mut bytes).unwrap().unwrap();

        assert_eq!(header.method(), &Method::POST);
        assert_eq!(payload_size, PayloadSize::Length(3));
        assert_eq!(&bytes[..], &b"123"[..]);
    }

    #[test]
    fn from_browser() {
        let str = indoc! {r##"
        GET /index/?a=1&b=2&a=3 HTTP/1.1
        Host: 192.168.4.1
        Connection: keep-alive
        Cache-Control: max-age=0
        User-Agent: Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/109.0.0.0 Safari/537.36
        Accept: text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8
        Accept-Encoding: gzip, deflate
        Accept-Language: en-US,en;q=0.9

        "##};

        let mut buf = BytesMut::from(str);
        let (header, payload_size) = HeaderDecoder::default().decode(&mut buf).unwrap().unwrap();

        assert!(payload_size.is_empty());
        assert!(buf.is_empty());
        assert_eq!(header.method(), &Method::GET);
        assert_eq!(header.version(), Version::HTTP_11);
        assert_eq!(header.uri().path(), "/index/");
        assert_eq!(header.uri().query(), Some("a=1&b=2&a=3"));
        assert_eq!(header.headers().len(), 7);
        assert_eq!(header.headers().get(http::header::CONNECTION), Some(&HeaderValue::from_static("keep-alive")));
    }

    #[test]
    fn partial_head_waits_for_more() {
        let mut buf = BytesMut::from("GET /index.htm HTTP/1.1\r\nHost: 192.168.4.1\r\n");
        assert!(HeaderDecoder::default().decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"\r\n");
        let (header, _) = HeaderDecoder::default().decode(&mut buf).unwrap().unwrap();
        let mut expected = HeaderMap::new();
        expected.insert(http::header::HOST, HeaderValue::from_static("192.168.4.1"));
        assert_eq!(header.headers(), &expected);
    }

    #[test]
    fn rejects_oversized_head() {
        let mut decoder = HeaderDecoder::with_max_header_bytes(64);
        let mut buf = BytesMut::from(format!("GET / HTTP/1.1\r\nX-Fill: {}\r\n", "a".repeat(80)).as_str());
        assert!(matches!(decoder.decode(&mut buf), Err(ParseError::TooLargeHeader { .. })));
    }

    #[test]
    fn short_input_waits_or_fails_early() {
        assert!(HeaderDecoder::default().decode(&mut BytesMut::new()).unwrap().is_none());
        assert!(HeaderDecoder::default().decode(&mut BytesMut::from("GET / HT")).unwrap().is_none());
        assert!(HeaderDecoder::default().decode(&mut BytesMut::from("\u{1}\r\n\r\n")).is_err());
    }

    #[test]
    fn rejects_bad_framing() {
        let mut buf = BytesMut::from("POST / HTTP/1.1\r\nContent-Length: 1x\r\n\r\n");
        assert!(matches!(HeaderDecoder::default().decode(&mut buf), Err(ParseError::InvalidContentLength { .. })));

        let mut buf = BytesMut::from("POST / HTTP/1.1\r\nContent-Length: 1\r\nTransfer-Encoding: chunked\r\n\r\n");
        assert!(HeaderDecoder::default().decode(&mut buf).is_err());

        let mut buf = BytesMut::from("GET / HTTP/2.0\r\n\r\n");
        assert!(HeaderDecoder::default().decode(&mut buf).is_err());
    }
}
