use std::sync::Arc;

use bytes::Bytes;
use tracing::trace;

use crate::codec::{MultipartParser, MultipartSink, PartHead};
use crate::handler::Handler;
use crate::protocol::{ParamOrigin, ParseError, PayloadSize, WebParameter, WebRequest};
use crate::utils::ensure;

/// How the body of the current request is consumed.
#[derive(Debug)]
pub(crate) enum BodyReader {
    None,
    /// buffered into the request and streamed to `handle_body`
    Buffered { form: bool, index: usize, total: Option<u64>, max: u64 },
    Multipart(Box<MultipartParser>),
}

impl BodyReader {
    pub(crate) fn for_request(req: &WebRequest, size: PayloadSize, max: u64) -> Self {
        if size.is_empty() {
            return BodyReader::None;
        }
        if let Some(boundary) = req.boundary().filter(|_| req.is_multipart()) {
            return BodyReader::Multipart(Box::new(MultipartParser::new(boundary)));
        }
        let form = req.content_type().eq_ignore_ascii_case(mime::APPLICATION_WWW_FORM_URLENCODED.essence_str());
        BodyReader::Buffered { form, index: 0, total: size.declared_length(), max }
    }

    pub(crate) fn feed(&mut self, req: &mut WebRequest, handler: &Arc<dyn Handler>, data: Bytes) -> Result<(), ParseError> {
        match self {
            BodyReader::None => Ok(()),
            BodyReader::Buffered { index, total, max, .. } => {
                let size = (*index + data.len()) as u64;
                ensure!(size <= *max, ParseError::too_large_body(size, *max));
                req.body_mut().extend_from_slice(&data);
                handler.handle_body(req, &data, *index, *total);
                *index += data.len();
                Ok(())
            }
            BodyReader::Multipart(parser) => parser.feed(&data, &mut UploadSink { req, handler }),
        }
    }

    pub(crate) fn finish(&mut self, req: &mut WebRequest) -> Result<(), ParseError> {
        match self {
            BodyReader::None => Ok(()),
            BodyReader::Buffered { form: false, .. } => Ok(()),
            BodyReader::Buffered { form: true, .. } => {
                let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(req.body()).map_err(ParseError::invalid_body)?;
                trace!(count = pairs.len(), "parsed form body");
                for (name, value) in pairs {
                    req.add_param(WebParameter::new(name, value, ParamOrigin::Post));
                }
                Ok(())
            }
            BodyReader::Multipart(parser) => parser.finish(),
        }
    }
}

/// Turns multipart parts into request parameters and upload callbacks.
struct UploadSink<'a> {
    req: &'a mut WebRequest,
    handler: &'a Arc<dyn Handler>,
}

impl MultipartSink for UploadSink<'_> {
    fn field(&mut self, name: &str, value: String) {
        self.req.add_param(WebParameter::new(name, value, ParamOrigin::Post));
    }

    fn file_chunk(&mut self, part: &PartHead, index: usize, data: &[u8], is_final: bool) {
        let filename = part.filename.as_deref().unwrap_or_default();
        self.handler.handle_upload(self.req, filename, index, data, is_final);
        if is_final {
            let size = (index + data.len()) as u64;
            self.req.add_param(WebParameter::file(part.name.as_str(), filename, size));
        }
    }
}
