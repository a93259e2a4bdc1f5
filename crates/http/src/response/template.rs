//! Placeholder substitution over a streamed body.
//!
//! `%name%` tokens are replaced by what the callback returns for `name`. The
//! body is pulled in pieces, so a token may be split across two reads of the
//! underlying source; unfinished input is held back until the closing
//! delimiter shows up or the token is known to be too long.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::task::Poll;

/// Default token delimiter.
pub const TEMPLATE_DELIMITER: u8 = b'%';

/// Longest token name looked up; longer ones are passed through verbatim.
pub const MAX_TOKEN_LEN: usize = 32;

const READ_SIZE: usize = 256;

/// Resolves a token name. `None` leaves the token, delimiters included, in
/// the output.
pub type TemplateCallback = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

pub struct TemplateProcessor {
    delimiter: u8,
    callback: TemplateCallback,
    /// source bytes not yet scanned
    raw: VecDeque<u8>,
    /// expanded bytes not yet handed out
    out: VecDeque<u8>,
    source_done: bool,
}

impl TemplateProcessor {
    pub fn new(callback: TemplateCallback) -> Self {
        Self::with_delimiter(TEMPLATE_DELIMITER, callback)
    }

    pub fn with_delimiter(delimiter: u8, callback: TemplateCallback) -> Self {
        Self { delimiter, callback, raw: VecDeque::new(), out: VecDeque::new(), source_done: false }
    }

    /// Fills `buf` with expanded output, pulling from `source` as needed.
    ///
    /// `source` follows the body convention: `Ready(0)` ends the input and
    /// `Pending` means nothing is available yet. Returns `Ready(0)` once all
    /// expanded output has been handed out.
    pub fn fill(&mut self, buf: &mut [u8], source: &mut dyn FnMut(&mut [u8]) -> Poll<usize>) -> Poll<usize> {
        loop {
            self.expand();
            if self.out.len() >= buf.len() || self.source_done {
                break;
            }

            let mut chunk = [0u8; READ_SIZE];
            match source(&mut chunk) {
                Poll::Ready(0) => self.source_done = true,
                Poll::Ready(n) => self.raw.extend(&chunk[..n]),
                Poll::Pending => break,
            }
        }

        let n = self.out.len().min(buf.len());
        for (slot, byte) in buf.iter_mut().zip(self.out.drain(..n)) {
            *slot = byte;
        }

        if n > 0 {
            Poll::Ready(n)
        } else if self.source_done && self.raw.is_empty() {
            Poll::Ready(0)
        } else {
            Poll::Pending
        }
    }

    /// Moves scanned bytes from `raw` to `out`, stopping at a token that
    /// cannot be decided without more input.
    fn expand(&mut self) {
        while let Some(&byte) = self.raw.front() {
            if byte != self.delimiter {
                let plain = self.raw.iter().position(|b| *b == self.delimiter).unwrap_or(self.raw.len());
                self.out.extend(self.raw.drain(..plain));
                continue;
            }

            // search for the closing delimiter within the token limit
            let close = self.raw.iter().skip(1).take(MAX_TOKEN_LEN + 1).position(|b| *b == self.delimiter).map(|p| p + 1);
            match close {
                Some(1) => {
                    // `%%` is an escaped delimiter
                    self.raw.drain(..2);
                    self.out.push_back(self.delimiter);
                }
                Some(end) => {
                    let token: Vec<u8> = self.raw.drain(..=end).collect();
                    let name = String::from_utf8_lossy(&token[1..end]);
                    match (self.callback)(&name) {
                        Some(value) => self.out.extend(value.as_bytes()),
                        None => self.out.extend(&token),
                    }
                }
                None if self.raw.len() > MAX_TOKEN_LEN + 1 || self.source_done => {
                    // not a token: emit the delimiter and rescan after it
                    self.raw.pop_front();
                    self.out.push_back(self.delimiter);
                }
                None => return,
            }
        }
    }
}

impl fmt::Debug for TemplateProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateProcessor")
            .field("delimiter", &(self.delimiter as char))
            .field("buffered", &(self.raw.len() + self.out.len()))
            .field("source_done", &self.source_done)
            .finish()
    }
}
