//! The seam between the connection and the application.
//!
//! A connection asks its [`Dispatcher`] to rewrite and bind every request to
//! exactly one [`Handler`] as soon as the head is parsed; the bound handler
//! then receives the body, uploads and finally the request itself.

use std::sync::Arc;

use crate::protocol::WebRequest;

pub trait Handler: Send + Sync {
    /// Cheap pre-check, e.g. on the interface the request came in on.
    fn filter(&self, _req: &WebRequest) -> bool {
        true
    }

    /// Claims the request. A handler may register the headers it needs with
    /// [`WebRequest::add_interesting_header`] here; the others are dropped
    /// after binding.
    fn can_handle(&self, req: &mut WebRequest) -> bool;

    /// Called once the whole body has been received; attach a response with
    /// [`WebRequest::send`] or keep a [`WebRequest::defer`] handle.
    fn handle_request(&self, req: &mut WebRequest);

    /// A slice of an uploaded file. `index` is the offset within the file.
    fn handle_upload(&self, _req: &mut WebRequest, _filename: &str, _index: usize, _data: &[u8], _is_final: bool) {}

    /// A slice of a non-multipart body. `total` is the declared length when known.
    fn handle_body(&self, _req: &mut WebRequest, _data: &[u8], _index: usize, _total: Option<u64>) {}
}

/// Routes requests to handlers.
pub trait Dispatcher: Send + Sync {
    /// Applies URL rewrites before matching.
    fn apply_rewrites(&self, req: &mut WebRequest);

    /// Picks the handler for `req`; falls back to a catch-all, never fails.
    fn attach(&self, req: &mut WebRequest) -> Arc<dyn Handler>;
}

/// Answers every request through one closure; handy for tests and tiny servers.
pub struct FnHandler<F> {
    f: F,
}

impl<F> Handler for FnHandler<F>
where
    F: Fn(&mut WebRequest) + Send + Sync,
{
    fn can_handle(&self, _req: &mut WebRequest) -> bool {
        true
    }

    fn handle_request(&self, req: &mut WebRequest) {
        (self.f)(req)
    }
}

pub fn make_handler<F>(f: F) -> FnHandler<F>
where
    F: Fn(&mut WebRequest) + Send + Sync,
{
    FnHandler { f }
}

/// A dispatcher that binds every request to the same handler.
pub struct SingleDispatcher {
    handler: Arc<dyn Handler>,
}

impl SingleDispatcher {
    pub fn new(handler: impl Handler + 'static) -> Self {
        Self { handler: Arc::new(handler) }
    }
}

impl Dispatcher for SingleDispatcher {
    fn apply_rewrites(&self, _req: &mut WebRequest) {}

    fn attach(&self, req: &mut WebRequest) -> Arc<dyn Handler> {
        req.add_interesting_header(crate::protocol::ANY_HEADER);
        Arc::clone(&self.handler)
    }
}
