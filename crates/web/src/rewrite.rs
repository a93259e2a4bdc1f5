use ethweb_http::protocol::{ParamOrigin, WebParameter, WebRequest};
use tracing::{trace, warn};

use crate::filter::Filter;

/// Maps a request URL to another before handlers are matched.
///
/// A `?query` suffix of the target becomes GET params of the rewritten request:
///
/// ```
/// use ethweb::Rewrite;
///
/// let rewrite = Rewrite::new("/", "/index.htm?lang=en");
/// assert_eq!(rewrite.to(), "/index.htm");
/// assert_eq!(rewrite.params(), "lang=en");
/// ```
pub struct Rewrite {
    from: String,
    to: String,
    params: String,
    filter: Option<Box<dyn Filter>>,
}

impl Rewrite {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        let to = to.into();
        let (to, params) = match to.split_once('?') {
            Some((path, query)) => (path.to_owned(), query.to_owned()),
            None => (to, String::new()),
        };
        Self { from: from.into(), to, params, filter: None }
    }

    pub fn with_filter(mut self, filter: impl Filter + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn to(&self) -> &str {
        &self.to
    }

    pub fn params(&self) -> &str {
        &self.params
    }

    pub fn matches(&self, req: &WebRequest) -> bool {
        req.url() == self.from && self.filter.as_ref().is_none_or(|filter| filter.check(req))
    }

    pub(crate) fn apply(&self, req: &mut WebRequest) {
        trace!(from = self.from, to = self.to, "rewriting request");
        req.set_url(self.to.as_str());
        if self.params.is_empty() {
            return;
        }
        match serde_urlencoded::from_str::<Vec<(String, String)>>(&self.params) {
            Ok(pairs) => {
                for (name, value) in pairs {
                    req.add_param(WebParameter::new(name, value, ParamOrigin::Get));
                }
            }
            Err(e) => warn!(params = self.params, cause = %e, "invalid rewrite params"),
        }
    }
}

impl std::fmt::Debug for Rewrite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rewrite")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("params", &self.params)
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::fn_filter;
    use crate::testing::request;

    #[test]
    fn apply_sets_url_and_get_params() {
        let rewrite = Rewrite::new("/old", "/new?a=1&b=x%20y");
        let mut req = request("GET /old HTTP/1.1\r\n\r\n");

        assert!(rewrite.matches(&req));
        rewrite.apply(&mut req);
        assert_eq!(req.url(), "/new");
        assert_eq!(req.arg("a"), Some("1"));
        assert_eq!(req.arg("b"), Some("x y"));
        assert!(!rewrite.matches(&req));
    }

    #[test]
    fn filter_gates_the_rewrite() {
        let rewrite = Rewrite::new("/", "/ap.htm").with_filter(fn_filter(|req| req.host() == Some("setup")));
        assert!(rewrite.matches(&request("GET / HTTP/1.1\r\nHost: setup\r\n\r\n")));
        assert!(!rewrite.matches(&request("GET / HTTP/1.1\r\nHost: other\r\n\r\n")));
    }
}
