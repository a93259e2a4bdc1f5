//! Request filters that gate handlers and rewrites.
//!
//! A filter only looks at the request; it runs before `can_handle` and
//! before a rewrite is applied.

use std::net::IpAddr;

use ethweb_http::protocol::{MethodSet, WebRequest};

pub trait Filter: Send + Sync {
    fn check(&self, req: &WebRequest) -> bool;
}

struct FnFilter<F>(F);

impl<F: Fn(&WebRequest) -> bool + Send + Sync> Filter for FnFilter<F> {
    fn check(&self, req: &WebRequest) -> bool {
        (self.0)(req)
    }
}

pub fn fn_filter<F>(f: F) -> impl Filter
where
    F: Fn(&WebRequest) -> bool + Send + Sync,
{
    FnFilter(f)
}

/// Passes when any inner filter passes; an empty set passes everything.
#[derive(Default)]
pub struct AnyOf(Vec<Box<dyn Filter>>);

impl AnyOf {
    pub fn or(mut self, filter: impl Filter + 'static) -> Self {
        self.0.push(Box::new(filter));
        self
    }
}

impl Filter for AnyOf {
    fn check(&self, req: &WebRequest) -> bool {
        self.0.is_empty() || self.0.iter().any(|filter| filter.check(req))
    }
}

/// Passes when every inner filter passes.
#[derive(Default)]
pub struct AllOf(Vec<Box<dyn Filter>>);

impl AllOf {
    pub fn and(mut self, filter: impl Filter + 'static) -> Self {
        self.0.push(Box::new(filter));
        self
    }
}

impl Filter for AllOf {
    fn check(&self, req: &WebRequest) -> bool {
        self.0.iter().all(|filter| filter.check(req))
    }
}

pub fn any_of() -> AnyOf {
    AnyOf::default()
}

pub fn all_of() -> AllOf {
    AllOf::default()
}

/// Passes requests whose method is in the set.
pub fn methods(methods: MethodSet) -> MethodFilter {
    MethodFilter(methods)
}

#[derive(Debug)]
pub struct MethodFilter(MethodSet);

impl Filter for MethodFilter {
    fn check(&self, req: &WebRequest) -> bool {
        self.0.contains(req.method())
    }
}

/// Matches when header `name` is present with exactly `value`.
///
/// Only headers that survived dispatch are visible to filters run after
/// binding; rewrites and handler filters see all of them.
pub fn header(name: impl Into<String>, value: impl Into<String>) -> HeaderFilter {
    HeaderFilter { name: name.into(), value: value.into() }
}

#[derive(Debug)]
pub struct HeaderFilter {
    name: String,
    value: String,
}

impl Filter for HeaderFilter {
    fn check(&self, req: &WebRequest) -> bool {
        req.header(&self.name).is_some_and(|value| value == self.value)
    }
}

/// Passes requests that arrived on the interface with address `ip`.
#[derive(Debug)]
pub struct InterfaceFilter(IpAddr);

impl Filter for InterfaceFilter {
    fn check(&self, req: &WebRequest) -> bool {
        req.local_addr().is_some_and(|addr| addr.ip() == self.0)
    }
}

/// Requests received on the station (uplink) address.
pub fn on_sta_filter(sta_ip: IpAddr) -> InterfaceFilter {
    InterfaceFilter(sta_ip)
}

/// Requests received on the access point address.
pub fn on_ap_filter(ap_ip: IpAddr) -> InterfaceFilter {
    InterfaceFilter(ap_ip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{request, request_on};
    use indoc::indoc;
    use std::net::SocketAddr;

    #[test]
    fn compose_method_and_header() {
        let req = request(indoc! {"
            POST /api HTTP/1.1\r
            X-Token: abc\r
            \r
        "});

        assert!(methods(MethodSet::POST).check(&req));
        assert!(!methods(MethodSet::GET | MethodSet::HEAD).check(&req));
        assert!(all_of().and(methods(MethodSet::POST)).and(header("x-token", "abc")).check(&req));
        assert!(!all_of().and(methods(MethodSet::POST)).and(header("x-token", "nope")).check(&req));
        assert!(any_of().or(methods(MethodSet::GET)).or(fn_filter(|r| r.url() == "/api")).check(&req));
        assert!(any_of().check(&req));
        assert!(!any_of().or(fn_filter(|_| false)).check(&req));
    }

    #[test]
    fn interface_filters_compare_local_address() {
        let sta: SocketAddr = "192.168.1.20:80".parse().unwrap();
        let req = request_on("GET / HTTP/1.1\r\n\r\n", Some(sta));

        assert!(on_sta_filter(sta.ip()).check(&req));
        assert!(!on_ap_filter("192.168.4.1".parse().unwrap()).check(&req));
        assert!(!on_sta_filter(sta.ip()).check(&request("GET / HTTP/1.1\r\n\r\n")));
    }
}
