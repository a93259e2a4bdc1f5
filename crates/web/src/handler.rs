//! The handlers a server is usually assembled from.
//!
//! All of them implement [`ethweb_http::handler::Handler`] and can be
//! registered with [`Server::add_handler`](crate::Server::add_handler).

mod callback;
mod editor;
mod json;
mod static_files;

pub use callback::{BodyFn, CallbackHandler, RequestFn, UploadFn};
pub use editor::EditorHandler;
pub use json::{JSON_MIMETYPE, JsonHandler, JsonRequestFn, JsonResponse};
pub use static_files::StaticHandler;
