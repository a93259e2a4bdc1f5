//! Incremental `multipart/form-data` parser.
//!
//! The parser is fed body bytes as they arrive and reports parts to a
//! [`MultipartSink`]: plain fields once complete, file parts as a stream of
//! slices so uploads never have to fit in memory.

use bytes::{Buf, BytesMut};
use httparse::Status;
use tracing::trace;

use crate::protocol::ParseError;
use crate::utils::ensure;

/// Largest slice of file data handed to [`MultipartSink::file_chunk`].
pub const UPLOAD_CHUNK_SIZE: usize = 1460;

/// Largest value accepted for a plain (non-file) field.
pub const MAX_FIELD_VALUE: usize = 8 * 1024;

const MAX_PART_HEADERS: usize = 8;
const MAX_PART_HEAD_BYTES: usize = 2048;

/// Headers of one part, taken from `Content-Disposition` and `Content-Type`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartHead {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
}

impl PartHead {
    /// Only a part with a filename carries a file; a typed part without one is a field.
    pub fn is_file(&self) -> bool {
        self.filename.is_some()
    }
}

pub trait MultipartSink {
    fn field(&mut self, name: &str, value: String);

    /// `index` is the offset of `data` within the part. The last call for a
    /// part has `is_final` set, possibly with empty `data`.
    fn file_chunk(&mut self, part: &PartHead, index: usize, data: &[u8], is_final: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// looking for the first delimiter
    Preamble,
    /// right after a delimiter: `--` closes, CRLF opens a part
    AfterDelimiter,
    Headers,
    Data,
    Done,
}

#[derive(Debug)]
pub struct MultipartParser {
    /// `\r\n--boundary`
    delimiter: Vec<u8>,
    buf: BytesMut,
    state: State,
    part: PartHead,
    /// bytes of the current part already reported
    part_offset: usize,
    field_value: Vec<u8>,
}

impl MultipartParser {
    pub fn new(boundary: &str) -> Self {
        let mut delimiter = Vec::with_capacity(boundary.len() + 4);
        delimiter.extend_from_slice(b"\r\n--");
        delimiter.extend_from_slice(boundary.as_bytes());

        // the first delimiter has no leading CRLF, pretend it does
        let mut buf = BytesMut::with_capacity(UPLOAD_CHUNK_SIZE);
        buf.extend_from_slice(b"\r\n");

        Self {
            delimiter,
            buf,
            state: State::Preamble,
            part: PartHead::default(),
            part_offset: 0,
            field_value: Vec::new(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    pub fn feed(&mut self, data: &[u8], sink: &mut dyn MultipartSink) -> Result<(), ParseError> {
        if self.state == State::Done {
            // epilogue is ignored
            return Ok(());
        }
        self.buf.extend_from_slice(data);

        loop {
            let progressed = match self.state {
                State::Preamble => self.skip_preamble(),
                State::AfterDelimiter => self.after_delimiter()?,
                State::Headers => self.read_headers()?,
                State::Data => self.read_data(sink)?,
                State::Done => false,
            };
            if !progressed {
                return Ok(());
            }
        }
    }

    /// Checks the closing delimiter was seen once the body has ended.
    pub fn finish(&self) -> Result<(), ParseError> {
        ensure!(self.state == State::Done, ParseError::invalid_body("multipart body ended before the closing boundary"));
        Ok(())
    }

    fn find_delimiter(&self) -> Option<usize> {
        self.buf.windows(self.delimiter.len()).position(|w| w == self.delimiter.as_slice())
    }

    fn skip_preamble(&mut self) -> bool {
        match self.find_delimiter() {
            Some(pos) => {
                self.buf.advance(pos + self.delimiter.len());
                self.state = State::AfterDelimiter;
                true
            }
            None => {
                // keep a tail that may hold the start of the delimiter
                let keep = self.delimiter.len() - 1;
                if self.buf.len() > keep {
                    self.buf.advance(self.buf.len() - keep);
                }
                false
            }
        }
    }

    fn after_delimiter(&mut self) -> Result<bool, ParseError> {
        // transport padding after the boundary is allowed
        let padding = self.buf.iter().take_while(|b| matches!(b, b' ' | b'\t')).count();
        self.buf.advance(padding);
        if self.buf.len() < 2 {
            return Ok(false);
        }
        match &self.buf[..2] {
            b"--" => {
                self.buf.clear();
                self.state = State::Done;
                trace!("multipart body complete");
            }
            b"\r\n" => {
                self.buf.advance(2);
                self.state = State::Headers;
            }
            _ => return Err(ParseError::invalid_body("malformed multipart boundary line")),
        }
        Ok(true)
    }

    fn read_headers(&mut self) -> Result<bool, ParseError> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_PART_HEADERS];
        let (consumed, part) = match httparse::parse_headers(&self.buf, &mut headers).map_err(ParseError::invalid_body)? {
            Status::Complete((consumed, parsed)) => (consumed, part_head(parsed)),
            Status::Partial => {
                ensure!(self.buf.len() <= MAX_PART_HEAD_BYTES, ParseError::invalid_body("multipart part headers too large"));
                return Ok(false);
            }
        };

        self.buf.advance(consumed);
        trace!(name = %part.name, filename = ?part.filename, "multipart part");
        self.part = part;
        self.part_offset = 0;
        self.field_value.clear();
        self.state = State::Data;
        Ok(true)
    }

    fn read_data(&mut self, sink: &mut dyn MultipartSink) -> Result<bool, ParseError> {
        match self.find_delimiter() {
            Some(pos) => {
                let data = self.buf.split_to(pos);
                self.buf.advance(self.delimiter.len());
                self.emit(&data, true, sink)?;
                self.state = State::AfterDelimiter;
                Ok(true)
            }
            None => {
                let safe = self.buf.len().saturating_sub(self.delimiter.len() - 1);
                if safe > 0 {
                    let data = self.buf.split_to(safe);
                    self.emit(&data, false, sink)?;
                }
                Ok(false)
            }
        }
    }

    fn emit(&mut self, data: &[u8], part_done: bool, sink: &mut dyn MultipartSink) -> Result<(), ParseError> {
        if !self.part.is_file() {
            ensure!(
                self.field_value.len() + data.len() <= MAX_FIELD_VALUE,
                ParseError::invalid_body(format!("multipart field {} exceeds {MAX_FIELD_VALUE} bytes", self.part.name))
            );
            self.field_value.extend_from_slice(data);
            if part_done {
                let value = String::from_utf8_lossy(&self.field_value).into_owned();
                sink.field(&self.part.name, value);
                self.field_value.clear();
            }
            return Ok(());
        }

        let mut pieces = data.chunks(UPLOAD_CHUNK_SIZE).peekable();
        while let Some(piece) = pieces.next() {
            let is_final = part_done && pieces.peek().is_none();
            sink.file_chunk(&self.part, self.part_offset, piece, is_final);
            self.part_offset += piece.len();
        }
        if part_done && data.is_empty() {
            sink.file_chunk(&self.part, self.part_offset, &[], true);
        }
        Ok(())
    }
}

fn part_head(headers: &[httparse::Header<'_>]) -> PartHead {
    let mut part = PartHead::default();
    for header in headers {
        let value = String::from_utf8_lossy(header.value);
        if header.name.eq_ignore_ascii_case("content-disposition") {
            for attr in value.split(';').map(str::trim) {
                if let Some((key, val)) = attr.split_once('=') {
                    let val = val.trim().trim_matches('"').to_owned();
                    match key.trim() {
                        k if k.eq_ignore_ascii_case("name") => part.name = val,
                        k if k.eq_ignore_ascii_case("filename") => part.filename = Some(val),
                        _ => {}
                    }
                }
            }
        } else if header.name.eq_ignore_ascii_case("content-type") {
            part.content_type = Some(value.trim().to_owned());
        }
    }
    part
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[derive(Default)]
    struct Collected {
        fields: Vec<(String, String)>,
        files: Vec<(String, Option<String>, usize, Vec<u8>, bool)>,
    }

    impl MultipartSink for Collected {
        fn field(&mut self, name: &str, value: String) {
            self.fields.push((name.to_owned(), value));
        }

        fn file_chunk(&mut self, part: &PartHead, index: usize, data: &[u8], is_final: bool) {
            self.files.push((part.name.clone(), part.filename.clone(), index, data.to_vec(), is_final));
        }
    }

    impl Collected {
        fn file_content(&self) -> Vec<u8> {
            self.files.iter().flat_map(|f| f.3.clone()).collect()
        }
    }

    fn body() -> String {
        indoc! {r#"
        --XyZ
        Content-Disposition: form-data; name="title"

        Living room
        --XyZ
        Content-Disposition: form-data; name="upload"; filename="cfg.json"
        Content-Type: application/json

        {"led": true}
        --XyZ--
        "#}
        .replace('\n', "\r\n")
    }

    #[test]
    fn field_and_file() {
        let mut parser = MultipartParser::new("XyZ");
        let mut sink = Collected::default();
        parser.feed(body().as_bytes(), &mut sink).unwrap();

        assert!(parser.finish().is_ok());
        assert_eq!(sink.fields, vec![("title".to_owned(), "Living room".to_owned())]);
        assert_eq!(sink.file_content(), br#"{"led": true}"#);

        let last = sink.files.last().unwrap();
        assert_eq!(last.0, "upload");
        assert_eq!(last.1.as_deref(), Some("cfg.json"));
        assert!(last.4);
    }

    #[test]
    fn any_split_gives_same_parts() {
        let body = body();
        let bytes = body.as_bytes();
        let mut whole = Collected::default();
        MultipartParser::new("XyZ").feed(bytes, &mut whole).unwrap();

        for split in 1..bytes.len() {
            let mut parser = MultipartParser::new("XyZ");
            let mut sink = Collected::default();
            parser.feed(&bytes[..split], &mut sink).unwrap();
            parser.feed(&bytes[split..], &mut sink).unwrap();

            assert!(parser.is_done(), "split at {split}");
            assert_eq!(sink.fields, whole.fields, "split at {split}");
            assert_eq!(sink.file_content(), whole.file_content(), "split at {split}");
            assert_eq!(sink.files.iter().filter(|f| f.4).count(), 1, "split at {split}");
        }
    }

    #[test]
    fn large_file_is_sliced() {
        let payload = vec![b'x'; UPLOAD_CHUNK_SIZE * 2 + 10];
        let mut body = b"--b\r\nContent-Disposition: form-data; name=\"f\"; filename=\"big.bin\"\r\n\r\n".to_vec();
        body.extend_from_slice(&payload);
        body.extend_from_slice(b"\r\n--b--\r\n");

        let mut sink = Collected::default();
        MultipartParser::new("b").feed(&body, &mut sink).unwrap();

        assert!(sink.files.iter().all(|f| f.3.len() <= UPLOAD_CHUNK_SIZE));
        assert_eq!(sink.file_content(), payload);
        let indexes: Vec<usize> = sink.files.iter().map(|f| f.2).collect();
        assert_eq!(indexes, vec![0, UPLOAD_CHUNK_SIZE, UPLOAD_CHUNK_SIZE * 2]);
    }

    #[test]
    fn data_resembling_boundary_is_kept() {
        let body = b"--b\r\nContent-Disposition: form-data; name=\"f\"; filename=\"a\"\r\n\r\n\r\n--c\r\n-\r\n--b--";
        let mut sink = Collected::default();
        let mut parser = MultipartParser::new("b");
        for byte in body.iter() {
            parser.feed(&[*byte], &mut sink).unwrap();
        }
        assert!(parser.is_done());
        assert_eq!(sink.file_content(), b"\r\n--c\r\n-");
    }

    #[test]
    fn typed_part_without_filename_is_a_field() {
        let body = b"--b\r\nContent-Disposition: form-data; name=\"mode\"\r\nContent-Type: text/plain\r\n\r\nauto\r\n--b--\r\n";
        let mut sink = Collected::default();
        MultipartParser::new("b").feed(body, &mut sink).unwrap();

        assert_eq!(sink.fields, vec![("mode".to_owned(), "auto".to_owned())]);
        assert!(sink.files.is_empty());
    }

    #[test]
    fn unterminated_body_fails() {
        let mut parser = MultipartParser::new("b");
        parser.feed(b"--b\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nvalue", &mut Collected::default()).unwrap();
        assert!(parser.finish().is_err());
    }
}
