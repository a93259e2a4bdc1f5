use ethweb_http::protocol::WebRequest;
use regex::Regex;
use tracing::warn;

/// How a handler's URI is compared with a request URL.
///
/// | pattern          | matches                                   |
/// |------------------|-------------------------------------------|
/// | `""`             | every URL                                 |
/// | `^/led/(\d+)$`   | the regex; captures become path params    |
/// | `/*.css`         | URLs ending in `.css`                     |
/// | `/api*`          | URLs starting with `/api`                 |
/// | `/api`           | `/api` itself and everything below `/api/`|
#[derive(Debug, Clone)]
pub enum UriPattern {
    Any,
    Exact(String),
    Prefix(String),
    Extension(String),
    Regex(Regex),
    /// a regex that failed to compile, never matches
    Invalid(String),
}

impl UriPattern {
    pub fn parse(uri: &str) -> Self {
        if uri.is_empty() {
            UriPattern::Any
        } else if uri.starts_with('^') && uri.ends_with('$') {
            match Regex::new(uri) {
                Ok(regex) => UriPattern::Regex(regex),
                Err(e) => {
                    warn!(uri, cause = %e, "invalid handler regex");
                    UriPattern::Invalid(uri.to_owned())
                }
            }
        } else if uri.starts_with("/*.") {
            let ext = uri.rfind('.').map_or(uri, |dot| &uri[dot..]);
            UriPattern::Extension(ext.to_owned())
        } else if let Some(prefix) = uri.strip_suffix('*') {
            UriPattern::Prefix(prefix.to_owned())
        } else {
            UriPattern::Exact(uri.to_owned())
        }
    }

    /// Matches without touching the request.
    pub fn is_match(&self, url: &str) -> bool {
        match self {
            UriPattern::Any => true,
            UriPattern::Exact(uri) => url == uri || url.strip_prefix(uri.as_str()).is_some_and(|rest| rest.starts_with('/')),
            UriPattern::Prefix(prefix) => url.starts_with(prefix.as_str()),
            UriPattern::Extension(ext) => url.ends_with(ext.as_str()),
            UriPattern::Regex(regex) => regex.is_match(url),
            UriPattern::Invalid(_) => false,
        }
    }

    /// Matches and stores regex captures as path params of `req`.
    pub fn matches(&self, req: &mut WebRequest) -> bool {
        let UriPattern::Regex(regex) = self else {
            return self.is_match(req.url());
        };

        let Some(captures) = regex.captures(req.url()) else {
            return false;
        };
        let params: Vec<String> =
            captures.iter().skip(1).map(|group| group.map_or_else(String::new, |m| m.as_str().to_owned())).collect();
        for param in params {
            req.add_path_param(param);
        }
        true
    }
}

impl From<&str> for UriPattern {
    fn from(uri: &str) -> Self {
        UriPattern::parse(uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::request;

    #[test]
    fn pattern_kinds() {
        assert!(UriPattern::parse("").is_match("/anything"));

        let exact = UriPattern::parse("/api");
        assert!(exact.is_match("/api"));
        assert!(exact.is_match("/api/v1"));
        assert!(!exact.is_match("/apiary"));

        let prefix = UriPattern::parse("/api*");
        assert!(prefix.is_match("/apiary"));
        assert!(!prefix.is_match("/ap"));

        let ext = UriPattern::parse("/*.css");
        assert!(ext.is_match("/style/site.css"));
        assert!(!ext.is_match("/site.js"));

        assert!(matches!(UriPattern::parse("^/led/([0-9+$"), UriPattern::Invalid(_)));
    }

    #[test]
    fn regex_captures_become_path_params() {
        let pattern = UriPattern::parse(r"^/sensor/(\d+)/(\w+)$");
        let mut req = request("GET /sensor/12/temp HTTP/1.1\r\n\r\n");

        assert!(pattern.matches(&mut req));
        assert_eq!(req.path_params(), ["12", "temp"]);
        assert_eq!(req.path_arg(1), Some("temp"));

        let mut other = request("GET /sensor/x/temp HTTP/1.1\r\n\r\n");
        assert!(!pattern.matches(&mut other));
        assert!(other.path_params().is_empty());
    }
}
