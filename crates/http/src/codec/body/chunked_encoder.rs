use crate::protocol::PayloadItem;
use bytes::{Buf, BytesMut};
use std::fmt::Write;
use std::io;

use tokio_util::codec::Encoder;

/// Bytes of framing around a chunk payload that fits in 16 bits: four hex
/// digits plus two CRLFs.
pub const CHUNK_OVERHEAD: usize = 8;

/// Frames response payloads for `Transfer-Encoding: chunked`.
///
/// After [`PayloadItem::Eof`] has been written further items are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkedEncoder {
    eof: bool,
}

impl ChunkedEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for ChunkedEncoder {
    type Error = io::Error;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if self.eof {
            return Ok(());
        }

        match item {
            PayloadItem::Chunk(mut bytes) => {
                // an empty chunk would read as the terminator
                if !bytes.has_remaining() {
                    return Ok(());
                }
                dst.reserve(bytes.remaining() + CHUNK_OVERHEAD);
                write!(dst, "{:x}\r\n", bytes.remaining()).map_err(io::Error::other)?;
                while bytes.has_remaining() {
                    let chunk = bytes.chunk();
                    let len = chunk.len();
                    dst.extend_from_slice(chunk);
                    bytes.advance(len);
                }
                dst.extend_from_slice(b"\r\n");
            }
            PayloadItem::Eof => {
                self.eof = true;
                dst.extend_from_slice(b"0\r\n\r\n");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_chunks_and_terminator() {
        let mut encoder = ChunkedEncoder::new();
        let mut dst = BytesMut::new();

        encoder.encode(PayloadItem::Chunk(&b"hello world, this is long"[..]), &mut dst).unwrap();
        encoder.encode(PayloadItem::Chunk(&b""[..]), &mut dst).unwrap();
        encoder.encode(PayloadItem::<&[u8]>::Eof, &mut dst).unwrap();
        encoder.encode(PayloadItem::Chunk(&b"late"[..]), &mut dst).unwrap();

        assert_eq!(&dst[..], b"19\r\nhello world, this is long\r\n0\r\n\r\n");
        assert!(encoder.is_eof());
    }
}
