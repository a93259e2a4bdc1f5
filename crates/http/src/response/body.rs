use std::fmt;
use std::io::{ErrorKind, Read};
use std::task::Poll;

use bytes::{Bytes, BytesMut};
use tracing::warn;

use crate::fs::FsFile;

/// Fills `buf` with body bytes starting at `index`, the number of bytes
/// produced so far. `Ready(0)` ends the body, `Pending` asks to be polled again.
pub type FillFn = Box<dyn FnMut(&mut [u8], usize) -> Poll<usize> + Send>;

/// A body producer for content the built-in variants do not cover.
pub trait BodySource: Send {
    /// Same contract as [`FillFn`].
    fn fill(&mut self, buf: &mut [u8]) -> Poll<usize>;

    /// Total length, `None` when unknown.
    fn len(&self) -> Option<u64>;

    /// False when the content could not be prepared; a 404 is sent instead.
    fn is_valid(&self) -> bool {
        true
    }
}

/// Where the bytes of a response body come from.
pub enum Body {
    Empty,
    Bytes(Bytes),
    /// constant content baked into the binary
    Static(&'static [u8]),
    File(Box<dyn FsFile>),
    Stream { reader: Box<dyn Read + Send>, len: Option<u64> },
    Callback { fill: FillFn, len: Option<u64> },
    /// callback content framed with `Transfer-Encoding: chunked`
    Chunked(FillFn),
    /// content accumulated by a [`ResponseStream`](super::ResponseStream)
    Buffer(BytesMut),
    Custom(Box<dyn BodySource>),
}

impl Body {
    pub fn len(&self) -> Option<u64> {
        match self {
            Body::Empty => Some(0),
            Body::Bytes(bytes) => Some(bytes.len() as u64),
            Body::Static(data) => Some(data.len() as u64),
            Body::File(file) => Some(file.size()),
            Body::Stream { len, .. } | Body::Callback { len, .. } => *len,
            Body::Chunked(_) => None,
            Body::Buffer(buf) => Some(buf.len() as u64),
            Body::Custom(source) => source.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    pub fn is_valid(&self) -> bool {
        match self {
            Body::File(file) => !file.is_directory(),
            Body::Custom(source) => source.is_valid(),
            _ => true,
        }
    }

    pub fn is_chunked(&self) -> bool {
        matches!(self, Body::Chunked(_))
    }

    /// Produces body bytes at `offset`. Read errors end the body early.
    pub(crate) fn fill(&mut self, buf: &mut [u8], offset: usize) -> Poll<usize> {
        fn copy_at(data: &[u8], buf: &mut [u8], offset: usize) -> Poll<usize> {
            let rest = data.get(offset..).unwrap_or_default();
            let n = rest.len().min(buf.len());
            buf[..n].copy_from_slice(&rest[..n]);
            Poll::Ready(n)
        }

        fn read_into(reader: &mut dyn Read, buf: &mut [u8]) -> Poll<usize> {
            loop {
                match reader.read(buf) {
                    Ok(n) => return Poll::Ready(n),
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) if e.kind() == ErrorKind::WouldBlock => return Poll::Pending,
                    Err(e) => {
                        warn!(cause = %e, "reading response body failed");
                        return Poll::Ready(0);
                    }
                }
            }
        }

        match self {
            Body::Empty => Poll::Ready(0),
            Body::Bytes(bytes) => copy_at(bytes, buf, offset),
            Body::Static(data) => copy_at(data, buf, offset),
            Body::Buffer(data) => copy_at(data, buf, offset),
            Body::File(file) => read_into(file.as_mut(), buf),
            Body::Stream { reader, .. } => read_into(reader.as_mut(), buf),
            Body::Callback { fill, .. } | Body::Chunked(fill) => fill(buf, offset),
            Body::Custom(source) => source.fill(buf),
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Body::Empty => "Empty",
            Body::Bytes(_) => "Bytes",
            Body::Static(_) => "Static",
            Body::File(_) => "File",
            Body::Stream { .. } => "Stream",
            Body::Callback { .. } => "Callback",
            Body::Chunked(_) => "Chunked",
            Body::Buffer(_) => "Buffer",
            Body::Custom(_) => "Custom",
        };
        f.debug_struct("Body").field("kind", &kind).field("len", &self.len()).finish()
    }
}
