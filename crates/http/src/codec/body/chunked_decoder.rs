//! Decoder for `Transfer-Encoding: chunked` request bodies.
//!
//! Every chunk is `<hex size>[;ext]\r\n<data>\r\n`; a zero sized chunk,
//! optional trailer lines and a blank line end the body. Extensions and
//! trailers are skipped.

use crate::protocol::{ParseError, PayloadItem};
use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// hex digits of the size line
    Size,
    /// whitespace between size and `;` or CR
    SizeTail,
    Extension,
    SizeLf,
    Data,
    DataCr,
    DataLf,
    /// start of a trailer line, or the final CR
    LineStart,
    Trailer,
    TrailerLf,
    EndLf,
    Done,
}

/// Incremental chunked body decoder.
///
/// Data is yielded as soon as it arrives, so a chunk split across reads
/// comes out as several [`PayloadItem::Chunk`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDecoder {
    step: Step,
    chunk_left: u64,
    /// whether the current size line has a hex digit yet
    digits: bool,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { step: Step::Size, chunk_left: 0, digits: false }
    }

    /// Consumes framing bytes until data is available or input runs out.
    fn advance(&mut self, src: &mut BytesMut) -> Result<(), ParseError> {
        while !src.is_empty() && !matches!(self.step, Step::Data | Step::Done) {
            let b = src.get_u8();
            self.step = match (self.step, b) {
                (Step::Size, b'0'..=b'9' | b'a'..=b'f' | b'A'..=b'F') => {
                    let digit = (b as char).to_digit(16).map(u64::from).unwrap_or_default();
                    self.chunk_left = self
                        .chunk_left
                        .checked_mul(16)
                        .and_then(|n| n.checked_add(digit))
                        .ok_or(ParseError::invalid_chunk("chunk size overflows"))?;
                    self.digits = true;
                    Step::Size
                }
                (Step::Size, b' ' | b'\t' | b';' | b'\r') if !self.digits => {
                    return Err(ParseError::invalid_chunk("missing chunk size"));
                }
                (Step::Size | Step::SizeTail, b' ' | b'\t') => Step::SizeTail,
                (Step::Size | Step::SizeTail | Step::Extension, b';') => Step::Extension,
                (Step::Size | Step::SizeTail | Step::Extension, b'\r') => Step::SizeLf,
                (Step::Size | Step::SizeTail, _) => return Err(ParseError::invalid_chunk("chunk size is not hex")),
                (Step::Extension, b'\n') => return Err(ParseError::invalid_chunk("bare LF in chunk extension")),
                (Step::Extension, _) => Step::Extension,
                (Step::SizeLf, b'\n') if self.chunk_left == 0 => Step::LineStart,
                (Step::SizeLf, b'\n') => Step::Data,
                (Step::SizeLf, _) => return Err(ParseError::invalid_chunk("expected LF after chunk size")),
                (Step::DataCr, b'\r') => Step::DataLf,
                (Step::DataCr, _) => return Err(ParseError::invalid_chunk("expected CR after chunk data")),
                (Step::DataLf, b'\n') => {
                    self.digits = false;
                    Step::Size
                }
                (Step::DataLf, _) => return Err(ParseError::invalid_chunk("expected LF after chunk data")),
                (Step::LineStart, b'\r') => Step::EndLf,
                (Step::Trailer, b'\r') => Step::TrailerLf,
                (Step::LineStart | Step::Trailer, _) => Step::Trailer,
                (Step::TrailerLf, b'\n') => Step::LineStart,
                (Step::TrailerLf, _) => return Err(ParseError::invalid_chunk("expected LF after trailer")),
                (Step::EndLf, b'\n') => Step::Done,
                (Step::EndLf, _) => return Err(ParseError::invalid_chunk("expected LF at end of body")),
                (Step::Data | Step::Done, _) => return Err(ParseError::invalid_chunk("framing byte outside of framing")),
            };
        }
        Ok(())
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ChunkedDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.advance(src)?;

        match self.step {
            Step::Done => {
                trace!("finished reading chunked body");
                Ok(Some(PayloadItem::Eof))
            }
            Step::Data if !src.is_empty() => {
                let take = usize::try_from(self.chunk_left).unwrap_or(usize::MAX).min(src.len());
                self.chunk_left -= take as u64;
                if self.chunk_left == 0 {
                    self.step = Step::DataCr;
                }
                trace!(len = take, "read chunk data");
                Ok(Some(PayloadItem::Chunk(src.split_to(take).freeze())))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn drain(decoder: &mut ChunkedDecoder, buf: &mut BytesMut) -> (Vec<u8>, bool) {
        let mut body = Vec::new();
        while let Some(item) = decoder.decode(buf).unwrap() {
            match item {
                PayloadItem::Chunk(bytes) => body.extend_from_slice(&bytes),
                PayloadItem::Eof => return (body, true),
            }
        }
        (body, false)
    }

    #[test]
    fn two_chunks_then_end() {
        let mut buf = BytesMut::from(&b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n"[..]);
        let mut decoder = ChunkedDecoder::new();

        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(PayloadItem::Chunk(Bytes::from_static(b"Wiki"))));
        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(PayloadItem::Chunk(Bytes::from_static(b"pedia"))));
        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(PayloadItem::Eof));
        assert!(buf.is_empty());
    }

    #[test]
    fn extensions_and_trailers_are_skipped() {
        let mut buf = BytesMut::from(&b"5 ;name=value\r\nhello\r\n0\r\nX-Checksum: 1\r\nX-Other: 2\r\n\r\nGET"[..]);
        let (body, done) = drain(&mut ChunkedDecoder::new(), &mut buf);
        assert!(done);
        assert_eq!(body, b"hello");
        assert_eq!(&buf[..], b"GET");
    }

    #[test]
    fn byte_by_byte_gives_same_body() {
        let wire = b"A\r\n0123456789\r\n1a\r\nabcdefghijklmnopqrstuvwxyz\r\n0\r\n\r\n";
        let mut decoder = ChunkedDecoder::new();
        let mut buf = BytesMut::new();
        let mut body = Vec::new();
        let mut done = false;
        for b in wire {
            buf.extend_from_slice(&[*b]);
            let (part, eof) = drain(&mut decoder, &mut buf);
            body.extend(part);
            done |= eof;
        }
        assert!(done);
        assert_eq!(body, b"0123456789abcdefghijklmnopqrstuvwxyz");
    }

    #[test]
    fn partial_chunk_is_yielded() {
        let mut buf = BytesMut::from(&b"5\r\nhel"[..]);
        let mut decoder = ChunkedDecoder::new();
        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(PayloadItem::Chunk(Bytes::from_static(b"hel"))));
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"lo\r\n0\r\n\r\n");
        let (body, done) = drain(&mut decoder, &mut buf);
        assert_eq!(body, b"lo");
        assert!(done);
    }

    #[test]
    fn rejects_non_hex_size() {
        let mut buf = BytesMut::from(&b"xyz\r\n"[..]);
        assert!(matches!(ChunkedDecoder::new().decode(&mut buf), Err(ParseError::InvalidChunk { .. })));

        let mut buf = BytesMut::from(&b"-5\r\n"[..]);
        assert!(ChunkedDecoder::new().decode(&mut buf).is_err());
    }

    #[test]
    fn rejects_empty_size_line() {
        let mut buf = BytesMut::from(&b"\r\n\r\n"[..]);
        assert!(matches!(ChunkedDecoder::new().decode(&mut buf), Err(ParseError::InvalidChunk { reason: "missing chunk size" })));

        let mut buf = BytesMut::from(&b";ext\r\n\r\n"[..]);
        assert!(ChunkedDecoder::new().decode(&mut buf).is_err());

        let mut buf = BytesMut::from(&b"5\r\nhello\r\n\r\n\r\n"[..]);
        let mut decoder = ChunkedDecoder::new();
        assert!(decoder.decode(&mut buf).unwrap().unwrap().is_chunk());
        assert!(decoder.decode(&mut buf).is_err());
    }

    #[test]
    fn rejects_missing_crlf_after_data() {
        let mut buf = BytesMut::from(&b"5\r\nhelloBad"[..]);
        let mut decoder = ChunkedDecoder::new();
        assert!(decoder.decode(&mut buf).unwrap().unwrap().is_chunk());
        assert!(decoder.decode(&mut buf).is_err());
    }

    #[test]
    fn rejects_size_overflow() {
        let mut buf = BytesMut::from(&b"fffffffffffffffff\r\n"[..]);
        assert!(ChunkedDecoder::new().decode(&mut buf).is_err());
    }
}
