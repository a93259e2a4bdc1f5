use std::io::Write;
use std::sync::Arc;

use ethweb_http::fs::{FileSystem, FsFile, OpenMode};
use ethweb_http::handler::Handler;
use ethweb_http::protocol::{ParamOrigin, WebRequest};
use ethweb_http::response::WebResponse;
use http::{Method, StatusCode};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::auth::{Credentials, RequestAuth};
use crate::handler::JSON_MIMETYPE;

const EDITOR_URL: &str = "/edit";

const EDITOR_PAGE: &[u8] = br#"<!DOCTYPE html>
<html><head><meta charset="utf-8"><title>File Editor</title></head>
<body>
<form method="post" enctype="multipart/form-data"><input type="file" name="data"><button>Upload</button></form>
<ul id="files"></ul>
<textarea id="content" rows="24" cols="96"></textarea>
<script>
fetch('/edit?list=/').then(r => r.json()).then(entries => {
  const list = document.getElementById('files');
  for (const e of entries) {
    const item = document.createElement('li');
    item.textContent = e.name + (e.type === 'dir' ? '/' : ' (' + e.size + ')');
    item.onclick = () => fetch('/edit?edit=/' + e.name).then(r => r.text()).then(t => document.getElementById('content').value = t);
    list.appendChild(item);
  }
});
</script>
</body></html>
"#;

/// Browses and edits a filesystem at `/edit`.
///
/// * `GET ?list=<dir>` lists a directory as JSON
/// * `GET ?edit=<path>` returns a file, `?download=<path>` as an attachment
/// * `GET` returns the editor page
/// * `PUT path=<path>` creates an empty file, `DELETE path=<path>` removes one
/// * `POST` with a multipart `data` file uploads it
pub struct EditorHandler {
    fs: Arc<dyn FileSystem>,
    credentials: Option<Credentials>,
}

/// The file being uploaded, kept in the request's temp slot.
struct Upload(Box<dyn FsFile>);

#[derive(Serialize)]
struct ListEntry<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    name: &'a str,
    size: u64,
}

impl EditorHandler {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs, credentials: None }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    fn authorized(&self, req: &WebRequest) -> bool {
        self.credentials.as_ref().is_none_or(|c| !c.is_set() || req.authenticate(&c.username, &c.password, None, false))
    }

    /// Parks the file named by a `GET` param in the request; directories are refused.
    fn open_param(&self, req: &mut WebRequest, name: &str) -> bool {
        let Some(path) = req.arg(name).map(str::to_owned) else {
            return false;
        };
        match self.fs.open(&path, OpenMode::Read) {
            Ok(file) if !file.is_directory() => {
                req.set_temp_file(file, path);
                true
            }
            _ => false,
        }
    }

    fn list(&self, req: &mut WebRequest, dir: &str) {
        let dir = if dir.is_empty() { "/" } else { dir };
        let entries = match self.fs.list(dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir, cause = %e, "can't list directory");
                Vec::new()
            }
        };
        let listing: Vec<ListEntry<'_>> = entries
            .iter()
            .map(|e| ListEntry { kind: if e.is_directory { "dir" } else { "file" }, name: &e.name, size: e.size })
            .collect();
        match serde_json::to_string(&listing) {
            Ok(body) => req.send_content(StatusCode::OK, JSON_MIMETYPE, body),
            Err(e) => {
                warn!(dir, cause = %e, "can't serialize listing");
                req.send_status(StatusCode::INTERNAL_SERVER_ERROR);
            }
        }
    }

    fn create(&self, req: &mut WebRequest) {
        let Some(path) = req.arg("path").map(str::to_owned) else {
            req.send_status(StatusCode::BAD_REQUEST);
            return;
        };
        if self.fs.exists(&path) {
            req.send_status(StatusCode::OK);
            return;
        }
        match self.fs.open(&path, OpenMode::Write) {
            Ok(_) => {
                info!(path, "file created");
                req.send_content(StatusCode::OK, mime::TEXT_PLAIN.as_ref(), format!("CREATE: {path}"));
            }
            Err(e) => {
                warn!(path, cause = %e, "can't create file");
                req.send_status(StatusCode::INTERNAL_SERVER_ERROR);
            }
        }
    }

    fn delete(&self, req: &mut WebRequest) {
        let Some(path) = req.arg("path").map(str::to_owned) else {
            req.send_status(StatusCode::NOT_FOUND);
            return;
        };
        match self.fs.remove(&path) {
            Ok(()) => {
                info!(path, "file deleted");
                req.send_content(StatusCode::OK, mime::TEXT_PLAIN.as_ref(), format!("DELETE: {path}"));
            }
            Err(e) => {
                debug!(path, cause = %e, "can't delete file");
                req.send_status(StatusCode::NOT_FOUND);
            }
        }
    }
}

impl Handler for EditorHandler {
    fn can_handle(&self, req: &mut WebRequest) -> bool {
        if !req.url().eq_ignore_ascii_case(EDITOR_URL) {
            return false;
        }
        match *req.method() {
            Method::GET if req.has_param("list") => true,
            Method::GET if req.has_param("edit") => self.open_param(req, "edit"),
            Method::GET if req.has_param("download") => self.open_param(req, "download"),
            Method::GET | Method::POST | Method::PUT | Method::DELETE => true,
            _ => false,
        }
    }

    fn handle_request(&self, req: &mut WebRequest) {
        if !req.check_credentials(self.credentials.as_ref()) {
            return;
        }

        match *req.method() {
            Method::GET => {
                if let Some(dir) = req.arg("list").map(str::to_owned) {
                    self.list(req, &dir);
                } else if let (Some(file), Some(path)) = (req.take_temp_file(), req.temp_path().map(str::to_owned)) {
                    let download = req.has_param("download");
                    req.send(WebResponse::from_file(file, &path, None, download));
                } else {
                    req.send(WebResponse::from_static(StatusCode::OK, mime::TEXT_HTML.as_ref(), EDITOR_PAGE));
                }
            }
            Method::PUT => self.create(req),
            Method::DELETE => self.delete(req),
            Method::POST => {
                let uploaded = req
                    .param_with("data", ParamOrigin::File)
                    .map(|p| upload_path(p.value()))
                    .filter(|path| self.fs.exists(path));
                match uploaded {
                    Some(path) => req.send_content(StatusCode::OK, mime::TEXT_PLAIN.as_ref(), format!("UPLOADED: {path}")),
                    None => req.send_status(StatusCode::INTERNAL_SERVER_ERROR),
                }
            }
            _ => req.send_status(StatusCode::METHOD_NOT_ALLOWED),
        }
    }

    fn handle_upload(&self, req: &mut WebRequest, filename: &str, index: usize, data: &[u8], is_final: bool) {
        if index == 0 {
            if !self.authorized(req) {
                debug!(filename, "unauthenticated upload ignored");
                return;
            }
            let path = upload_path(filename);
            match self.fs.open(&path, OpenMode::Write) {
                Ok(file) => req.set_temp_object(Upload(file)),
                Err(e) => {
                    warn!(path, cause = %e, "can't open upload target");
                    return;
                }
            }
        }

        let Some(Upload(file)) = req.temp_object_mut::<Upload>() else {
            return;
        };
        if !data.is_empty()
            && let Err(e) = file.write_all(data)
        {
            warn!(filename, cause = %e, "upload write failed");
            req.take_temp_object::<Upload>();
            return;
        }
        if is_final
            && let Some(Upload(mut file)) = req.take_temp_object::<Upload>()
        {
            if let Err(e) = file.flush() {
                warn!(filename, cause = %e, "upload flush failed");
            }
            info!(filename, size = index + data.len(), "upload finished");
        }
    }
}

/// Uploaded file names are stored below the filesystem root.
fn upload_path(filename: &str) -> String {
    if filename.starts_with('/') { filename.to_owned() } else { format!("/{filename}") }
}

impl std::fmt::Debug for EditorHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditorHandler").field("credentials", &self.credentials.is_some()).finish_non_exhaustive()
    }
}
