use std::sync::Arc;

use ethweb_http::fs::{FileSystem, FsFile, OpenMode};
use ethweb_http::handler::Handler;
use ethweb_http::protocol::{RequestedConnType, WebRequest};
use ethweb_http::response::{TemplateCallback, WebResponse};
use http::header::{CACHE_CONTROL, CONTENT_ENCODING, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use http::{HeaderValue, Method, StatusCode};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::auth::{Credentials, RequestAuth};
use crate::filter::Filter;

/// Starting history: three plain hits, five unknown.
const INITIAL_GZIP_STATS: u8 = 0xF8;

/// Learns whether the served tree is mostly gzipped, so the likelier name is
/// opened first. Each found file shifts one bit into an 8 bit history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GzipStats {
    history: u8,
    gzip_first: bool,
}

impl GzipStats {
    fn new() -> Self {
        Self { history: INITIAL_GZIP_STATS, gzip_first: false }
    }

    fn record(&mut self, gzip_found: bool) {
        self.history = (self.history << 1) | u8::from(gzip_found);
        self.gzip_first = match self.history {
            0x00 => false,
            0xFF => true,
            history => history.count_ones() > 4,
        };
    }
}

/// Serves files below `path` of a filesystem for GET requests under `uri`.
///
/// A request for `/static/app.js` with `uri = "/static"` and `path = "/www"`
/// opens `/www/app.js`, or `/www/app.js.gz` sent as `Content-Encoding: gzip`.
/// Directory requests fall back to the default file (`index.htm`).
pub struct StaticHandler {
    fs: Arc<dyn FileSystem>,
    uri: String,
    path: String,
    is_dir: bool,
    default_file: String,
    cache_control: String,
    last_modified: String,
    template: Option<TemplateCallback>,
    credentials: Option<Credentials>,
    filter: Option<Box<dyn Filter>>,
    gzip: Mutex<GzipStats>,
}

impl StaticHandler {
    pub fn new(uri: &str, fs: Arc<dyn FileSystem>, path: &str, cache_control: Option<&str>) -> Self {
        let uri = if uri.starts_with('/') { uri.to_owned() } else { format!("/{uri}") };
        let path = if path.starts_with('/') { path.to_owned() } else { format!("/{path}") };
        let is_dir = path.ends_with('/');

        Self {
            fs,
            uri: uri.strip_suffix('/').unwrap_or(&uri).to_owned(),
            path: path.strip_suffix('/').unwrap_or(&path).to_owned(),
            is_dir,
            default_file: "index.htm".to_owned(),
            cache_control: cache_control.unwrap_or_default().to_owned(),
            last_modified: String::new(),
            template: None,
            credentials: None,
            filter: None,
            gzip: Mutex::new(GzipStats::new()),
        }
    }

    pub fn with_is_dir(mut self, is_dir: bool) -> Self {
        self.is_dir = is_dir;
        self
    }

    /// An empty name disables the directory fallback.
    pub fn with_default_file(mut self, default_file: impl Into<String>) -> Self {
        self.default_file = default_file.into();
        self
    }

    pub fn with_cache_control(mut self, cache_control: impl Into<String>) -> Self {
        self.cache_control = cache_control.into();
        self
    }

    /// An HTTP date, compared verbatim with `If-Modified-Since`.
    pub fn with_last_modified(mut self, last_modified: impl Into<String>) -> Self {
        self.last_modified = last_modified.into();
        self
    }

    pub fn with_template(mut self, template: TemplateCallback) -> Self {
        self.template = Some(template);
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_filter(mut self, filter: impl Filter + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    /// Finds the file for `req` and parks it in the request's temp slot.
    fn find_file(&self, req: &mut WebRequest) -> bool {
        let rest = &req.url()[self.uri.len()..];
        let can_skip_file_check = (self.is_dir && rest.is_empty()) || rest.ends_with('/');
        let mut path = format!("{}{rest}", self.path);

        if !can_skip_file_check && self.open_into(req, &path) {
            return true;
        }
        if self.default_file.is_empty() {
            return false;
        }
        if !path.ends_with('/') {
            path.push('/');
        }
        path.push_str(&self.default_file);
        self.open_into(req, &path)
    }

    fn open_into(&self, req: &mut WebRequest, path: &str) -> bool {
        let gz_path = format!("{path}.gz");
        let mut gzip = self.gzip.lock();

        let order = if gzip.gzip_first { [(gz_path.as_str(), true), (path, false)] } else { [(path, false), (gz_path.as_str(), true)] };
        let found = order.into_iter().find_map(|(candidate, is_gz)| self.open_file(candidate).map(|file| (file, is_gz)));

        let Some((file, is_gz)) = found else {
            return false;
        };
        gzip.record(is_gz);
        trace!(path, gzipped = is_gz, history = gzip.history, "static file found");
        req.set_temp_file(file, path);
        true
    }

    fn open_file(&self, path: &str) -> Option<Box<dyn FsFile>> {
        self.fs.open(path, OpenMode::Read).ok().filter(|file| !file.is_directory())
    }
}

impl Handler for StaticHandler {
    fn filter(&self, req: &WebRequest) -> bool {
        self.filter.as_ref().is_none_or(|filter| filter.check(req))
    }

    fn can_handle(&self, req: &mut WebRequest) -> bool {
        if *req.method() != Method::GET
            || !req.url().starts_with(&self.uri)
            || !req.is_expected_conn_type(&[RequestedConnType::Http])
        {
            return false;
        }
        if !self.find_file(req) {
            return false;
        }

        if !self.last_modified.is_empty() {
            req.add_interesting_header(IF_MODIFIED_SINCE.as_str());
        }
        if !self.cache_control.is_empty() {
            req.add_interesting_header(IF_NONE_MATCH.as_str());
        }
        true
    }

    fn handle_request(&self, req: &mut WebRequest) {
        let path = req.temp_path().map(str::to_owned);
        let file = req.take_temp_file();
        if !req.check_credentials(self.credentials.as_ref()) {
            return;
        }
        let (Some(file), Some(path)) = (file, path) else {
            req.send_status(StatusCode::NOT_FOUND);
            return;
        };

        let etag = file.size().to_string();
        if !self.last_modified.is_empty() && req.header(IF_MODIFIED_SINCE.as_str()) == Some(self.last_modified.as_str()) {
            debug!(path, "not modified since");
            req.send_status(StatusCode::NOT_MODIFIED);
            return;
        }
        if !self.cache_control.is_empty() && req.header(IF_NONE_MATCH.as_str()) == Some(etag.as_str()) {
            debug!(path, etag, "etag matched");
            let mut response = WebResponse::new(StatusCode::NOT_MODIFIED);
            response.add_header(CACHE_CONTROL.as_str(), &self.cache_control).add_header(ETAG.as_str(), &etag);
            req.send(response);
            return;
        }

        let gzipped = file.name().ends_with(".gz");
        let mut response = WebResponse::from_file(file, &path, None, false);
        if gzipped {
            response.insert_header(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        }
        if !self.last_modified.is_empty() {
            response.add_header(LAST_MODIFIED.as_str(), &self.last_modified);
        }
        if !self.cache_control.is_empty() {
            response.add_header(CACHE_CONTROL.as_str(), &self.cache_control).add_header(ETAG.as_str(), &etag);
        }
        if let Some(template) = &self.template {
            response.set_template(Arc::clone(template));
        }
        req.send(response);
    }
}

impl std::fmt::Debug for StaticHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticHandler")
            .field("uri", &self.uri)
            .field("path", &self.path)
            .field("default_file", &self.default_file)
            .field("gzip", &*self.gzip.lock())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestClient, request, server};
    use ethweb_http::fs::MemoryFs;

    fn www() -> Arc<MemoryFs> {
        let fs = MemoryFs::new();
        fs.insert("/www/index.htm", "<h1>home</h1>");
        fs.insert("/www/app.js.gz", vec![0x1f, 0x8b, 0x08, 0x00]);
        fs.insert("/www/docs/index.htm", "docs");
        Arc::new(fs)
    }

    #[test]
    fn gzip_stats_follow_history() {
        let mut stats = GzipStats::new();
        assert!(!stats.gzip_first);
        for _ in 0..8 {
            stats.record(true);
        }
        assert_eq!(stats.history, 0xFF);
        assert!(stats.gzip_first);

        stats.record(false);
        assert!(stats.gzip_first, "seven of eight still gzip");
        for _ in 0..4 {
            stats.record(false);
        }
        assert!(!stats.gzip_first);
        for _ in 0..8 {
            stats.record(false);
        }
        assert_eq!(stats.history, 0x00);
    }

    #[test]
    fn resolves_files_below_the_root() {
        let handler = StaticHandler::new("static/", www(), "www", None);

        let mut req = request("GET /static/docs/ HTTP/1.1\r\n\r\n");
        assert!(handler.can_handle(&mut req));
        assert_eq!(req.temp_path(), Some("/www/docs/index.htm"));

        let mut req = request("GET /static/app.js HTTP/1.1\r\n\r\n");
        assert!(handler.can_handle(&mut req));
        assert_eq!(req.temp_path(), Some("/www/app.js"));
        assert_eq!(handler.gzip.lock().history, (INITIAL_GZIP_STATS << 2) | 0b01);

        assert!(!handler.can_handle(&mut request("POST /static/app.js HTTP/1.1\r\n\r\n")));
        assert!(!handler.can_handle(&mut request("GET /static/none.txt HTTP/1.1\r\n\r\n")));
        assert!(!handler.can_handle(&mut request("GET /other HTTP/1.1\r\n\r\n")));
    }

    #[test]
    fn empty_default_file_disables_directory_fallback() {
        let handler = StaticHandler::new("/", www(), "/www/", None).with_default_file("");
        assert!(!handler.can_handle(&mut request("GET / HTTP/1.1\r\n\r\n")));
    }

    #[test]
    fn last_modified_answers_304() {
        let handler = StaticHandler::new("/", www(), "/www", None).with_last_modified("Mon, 01 Jan 2024 00:00:00 GMT");
        let mut req = request("GET /index.htm HTTP/1.1\r\nIf-Modified-Since: Mon, 01 Jan 2024 00:00:00 GMT\r\n\r\n");

        assert!(handler.can_handle(&mut req));
        req.remove_not_interesting_headers();
        assert!(req.has_header("if-modified-since"));
        handler.handle_request(&mut req);
        assert!(req.has_response());
        assert!(req.take_temp_file().is_none());
    }

    #[test]
    fn credentials_guard_files() {
        let mut server = server();
        server.add_handler(Arc::new(
            StaticHandler::new("/", www(), "/www", None).with_credentials(Credentials::new("admin", "admin")),
        ));
        let mut client = TestClient::new(server);

        let denied = client.send("GET /index.htm HTTP/1.1\r\n\r\n");
        assert!(denied.starts_with("HTTP/1.1 401 Unauthorized\r\n"));
        assert!(denied.contains("www-authenticate: Basic realm=\"Login Required\"\r\n"));
        assert!(!denied.contains("<h1>home</h1>"));

        let allowed = client.send("GET /index.htm HTTP/1.1\r\nAuthorization: Basic YWRtaW46YWRtaW4=\r\n\r\n");
        assert!(allowed.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(allowed.ends_with("<h1>home</h1>"));
    }
}
