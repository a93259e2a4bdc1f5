//! HTTP Basic and Digest authentication.
//!
//! Digest follows RFC 2617 with `qop="auth"` and MD5, which is what
//! browsers still speak to small devices.

use base64ct::{Base64, Encoding};
use ethweb_http::protocol::{Authorization, WebRequest};
use ethweb_http::response::WebResponse;
use http::StatusCode;
use http::header::WWW_AUTHENTICATE;
use http::HeaderValue;
use md5::{Digest, Md5};
use tracing::debug;

pub const DEFAULT_REALM: &str = "asyncesp";

const BASIC_CHALLENGE: &str = "Basic realm=\"Login Required\"";

/// User name and password guarding a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self { username: username.into(), password: password.into() }
    }

    /// Empty credentials disable the check.
    pub fn is_set(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

/// True when `hash` is `base64("username:password")`.
pub fn check_basic_authentication(hash: &str, username: &str, password: &str) -> bool {
    let expected = Base64::encode_string(format!("{username}:{password}").as_bytes());
    hash == expected
}

fn md5_hex(data: &[u8]) -> String {
    let digest = Md5::digest(data);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn random_md5() -> String {
    md5_hex(&rand::random::<u32>().to_le_bytes())
}

/// `username:realm:` followed by the hex MD5 of `username:realm:password`.
pub fn generate_digest_hash(username: &str, password: &str, realm: &str) -> String {
    let prefix = format!("{username}:{realm}:");
    let ha1 = md5_hex(format!("{prefix}{password}").as_bytes());
    format!("{prefix}{ha1}")
}

/// The parameters of a `WWW-Authenticate: Digest` challenge, fresh nonce and opaque.
pub fn request_digest_authentication(realm: Option<&str>) -> String {
    format!(
        "realm=\"{}\", qop=\"auth\", nonce=\"{}\", opaque=\"{}\"",
        realm.unwrap_or(DEFAULT_REALM),
        random_md5(),
        random_md5()
    )
}

/// Expected values a digest answer is checked against; `None` accepts any.
#[derive(Debug, Default, Clone, Copy)]
pub struct DigestExpectations<'a> {
    pub realm: Option<&'a str>,
    pub nonce: Option<&'a str>,
    pub opaque: Option<&'a str>,
    pub uri: Option<&'a str>,
}

/// Verifies the parameters of an `Authorization: Digest` header.
///
/// When `password_is_hash` is set, `password` is already the HA1 hex digest.
/// Missing fields count as empty, so a malformed header simply fails.
pub fn check_digest_authentication(
    header: &str,
    method: &str,
    username: &str,
    password: &str,
    password_is_hash: bool,
    expect: DigestExpectations<'_>,
) -> bool {
    if !header.contains(',') {
        return false;
    }

    let mut fields = DigestFields::default();
    for pair in header.split(',').map(str::trim).filter(|pair| !pair.is_empty()) {
        let Some((name, value)) = pair.split_once('=') else {
            return false;
        };
        let value = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')).unwrap_or(value);
        let checked = |expected: Option<&str>| expected.is_none_or(|e| e == value);

        match name.trim() {
            "username" if value != username => return false,
            "username" => fields.username = value,
            "realm" if !checked(expect.realm) => return false,
            "realm" => fields.realm = value,
            "nonce" if !checked(expect.nonce) => return false,
            "nonce" => fields.nonce = value,
            "opaque" if !checked(expect.opaque) => return false,
            "uri" if !checked(expect.uri) => return false,
            "uri" => fields.uri = value,
            "response" => fields.response = value,
            "qop" => fields.qop = value,
            "nc" => fields.nc = value,
            "cnonce" => fields.cnonce = value,
            _ => {}
        }
    }

    let ha1 = if password_is_hash {
        password.to_owned()
    } else {
        md5_hex(format!("{}:{}:{password}", fields.username, fields.realm).as_bytes())
    };
    let ha2 = md5_hex(format!("{method}:{}", fields.uri).as_bytes());
    let expected = md5_hex(
        format!("{ha1}:{}:{}:{}:{}:{ha2}", fields.nonce, fields.nc, fields.cnonce, fields.qop).as_bytes(),
    );
    fields.response == expected
}

#[derive(Default)]
struct DigestFields<'a> {
    username: &'a str,
    realm: &'a str,
    nonce: &'a str,
    uri: &'a str,
    response: &'a str,
    qop: &'a str,
    nc: &'a str,
    cnonce: &'a str,
}

/// Authentication helpers on a request.
pub trait RequestAuth {
    /// Checks the request's `Authorization` header against the given user.
    fn authenticate(&self, username: &str, password: &str, realm: Option<&str>, password_is_hash: bool) -> bool;

    /// Answers 401 with a Basic or Digest challenge.
    fn request_authentication(&mut self, realm: Option<&str>, digest: bool);

    /// Authenticates against `credentials`, answering 401 on failure.
    /// Unset credentials always pass.
    fn check_credentials(&mut self, credentials: Option<&Credentials>) -> bool {
        match credentials {
            Some(c) if c.is_set() && !self.authenticate(&c.username, &c.password, None, false) => {
                self.request_authentication(None, false);
                false
            }
            _ => true,
        }
    }
}

impl RequestAuth for WebRequest {
    fn authenticate(&self, username: &str, password: &str, realm: Option<&str>, password_is_hash: bool) -> bool {
        let authenticated = match self.authorization() {
            None => false,
            Some(Authorization::Digest(header)) => check_digest_authentication(
                header,
                self.method().as_str(),
                username,
                password,
                password_is_hash,
                DigestExpectations { realm, ..Default::default() },
            ),
            Some(Authorization::Basic(hash)) if password_is_hash => hash == password,
            Some(Authorization::Basic(hash)) => check_basic_authentication(hash, username, password),
        };
        debug!(url = self.url(), username, authenticated, "authentication checked");
        authenticated
    }

    fn request_authentication(&mut self, realm: Option<&str>, digest: bool) {
        let challenge = match (digest, realm) {
            (true, realm) => format!("Digest {}", request_digest_authentication(realm)),
            (false, Some(realm)) => format!("Basic realm=\"{realm}\""),
            (false, None) => BASIC_CHALLENGE.to_owned(),
        };

        let mut response = WebResponse::new(StatusCode::UNAUTHORIZED);
        if let Ok(value) = HeaderValue::from_str(&challenge) {
            response.insert_header(WWW_AUTHENTICATE, value);
        }
        self.send(response);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::request;
    use indoc::formatdoc;

    #[test]
    fn basic_hash_must_match_exactly() {
        assert!(check_basic_authentication("YWRtaW46YWRtaW4=", "admin", "admin"));
        assert!(!check_basic_authentication("YWRtaW46YWRtaW4", "admin", "admin"));
        assert!(!check_basic_authentication("YWRtaW46YWRtaW4=", "admin", "nimda"));
    }

    #[test]
    fn digest_hash_layout() {
        let hash = generate_digest_hash("admin", "secret", "asyncesp");
        let (prefix, ha1) = hash.rsplit_once(':').unwrap();
        assert_eq!(prefix, "admin:asyncesp");
        assert_eq!(ha1.len(), 32);
        assert_eq!(ha1, md5_hex(b"admin:asyncesp:secret"));
    }

    #[test]
    fn digest_challenge_has_fresh_nonce() {
        let first = request_digest_authentication(None);
        assert!(first.starts_with("realm=\"asyncesp\", qop=\"auth\", nonce=\""));
        assert_ne!(first, request_digest_authentication(None));
    }

    fn digest_answer(nc: &str) -> String {
        // RFC 2617 section 3.5 example
        let ha1 = md5_hex(b"Mufasa:testrealm@host.com:Circle Of Life");
        let ha2 = md5_hex(b"GET:/dir/index.html");
        let response = md5_hex(format!("{ha1}:dcd98b7102dd2f0e8b11d0f600bfb0c093:00000001:0a4f113b:auth:{ha2}").as_bytes());
        format!(
            "username=\"Mufasa\", realm=\"testrealm@host.com\", nonce=\"dcd98b7102dd2f0e8b11d0f600bfb0c093\", \
             uri=\"/dir/index.html\", qop=auth, nc={nc}, cnonce=\"0a4f113b\", response=\"{response}\", \
             opaque=\"5ccc069c403ebaf9f0171e9517f40e41\""
        )
    }

    #[test]
    fn digest_answer_is_verified() {
        let header = digest_answer("00000001");
        let expect = DigestExpectations { realm: Some("testrealm@host.com"), ..Default::default() };
        assert!(check_digest_authentication(&header, "GET", "Mufasa", "Circle Of Life", false, expect));
        assert!(!check_digest_authentication(&header, "GET", "Mufasa", "wrong", false, expect));
        assert!(!check_digest_authentication(&header, "GET", "Simba", "Circle Of Life", false, expect));

        let wrong_realm = DigestExpectations { realm: Some("other"), ..Default::default() };
        assert!(!check_digest_authentication(&header, "GET", "Mufasa", "Circle Of Life", false, wrong_realm));
    }

    #[test]
    fn digest_with_wrong_nc_or_missing_fields_fails() {
        let header = digest_answer("00000002");
        assert!(!check_digest_authentication(&header, "GET", "Mufasa", "Circle Of Life", false, DigestExpectations::default()));

        assert!(!check_digest_authentication("username=\"Mufasa\", response", "GET", "Mufasa", "x", false, DigestExpectations::default()));
        assert!(!check_digest_authentication("username=\"Mufasa\"", "GET", "Mufasa", "x", false, DigestExpectations::default()));
        assert!(!check_digest_authentication("username=\"Mufasa\", qop=auth", "GET", "Mufasa", "x", false, DigestExpectations::default()));
    }

    #[test]
    fn request_level_basic_auth() {
        let mut req = request(&formatdoc! {"
            GET /admin HTTP/1.1\r
            Authorization: Basic {}\r
            \r
        ", Base64::encode_string(b"admin:pw")});

        assert!(req.authenticate("admin", "pw", None, false));
        assert!(!req.authenticate("admin", "other", None, false));
        assert!(req.check_credentials(Some(&Credentials::new("admin", "pw"))));
        assert!(!req.has_response());

        assert!(!req.check_credentials(Some(&Credentials::new("admin", "other"))));
        assert!(req.has_response());
    }

    #[test]
    fn unset_credentials_pass() {
        let mut req = request("GET / HTTP/1.1\r\n\r\n");
        assert!(req.check_credentials(None));
        assert!(req.check_credentials(Some(&Credentials::new("", ""))));
        assert!(!req.has_response());
    }
}
