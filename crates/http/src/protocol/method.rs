//! Bitmask sets of request methods.

use http::Method;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// A set of HTTP methods, composable with `|`.
///
/// ```
/// use ethweb_http::protocol::MethodSet;
/// use http::Method;
///
/// let set = MethodSet::GET | MethodSet::POST;
/// assert!(set.contains(&Method::POST));
/// assert!(!set.contains(&Method::DELETE));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodSet(u8);

impl MethodSet {
    pub const GET: MethodSet = MethodSet(0b0000_0001);
    pub const POST: MethodSet = MethodSet(0b0000_0010);
    pub const DELETE: MethodSet = MethodSet(0b0000_0100);
    pub const PUT: MethodSet = MethodSet(0b0000_1000);
    pub const PATCH: MethodSet = MethodSet(0b0001_0000);
    pub const HEAD: MethodSet = MethodSet(0b0010_0000);
    pub const OPTIONS: MethodSet = MethodSet(0b0100_0000);
    pub const ANY: MethodSet = MethodSet(0b0111_1111);

    const NAMED: [(MethodSet, Method); 7] = [
        (Self::GET, Method::GET),
        (Self::POST, Method::POST),
        (Self::DELETE, Method::DELETE),
        (Self::PUT, Method::PUT),
        (Self::PATCH, Method::PATCH),
        (Self::HEAD, Method::HEAD),
        (Self::OPTIONS, Method::OPTIONS),
    ];

    pub const fn empty() -> Self {
        MethodSet(0)
    }

    /// The single-method set for `method`, empty for methods outside the set.
    pub fn of(method: &Method) -> Self {
        Self::NAMED.iter().find(|(_, m)| m == method).map_or(Self::empty(), |(set, _)| *set)
    }

    pub fn contains(self, method: &Method) -> bool {
        self.0 & Self::of(method).0 != 0
    }

    pub const fn union(self, other: MethodSet) -> Self {
        MethodSet(self.0 | other.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for MethodSet {
    type Output = MethodSet;

    fn bitor(self, rhs: MethodSet) -> MethodSet {
        self.union(rhs)
    }
}

impl BitOrAssign for MethodSet {
    fn bitor_assign(&mut self, rhs: MethodSet) {
        *self = self.union(rhs);
    }
}

impl From<&Method> for MethodSet {
    fn from(method: &Method) -> Self {
        Self::of(method)
    }
}

impl fmt::Debug for MethodSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();
        for (flag, method) in &Self::NAMED {
            if self.0 & flag.0 != 0 {
                set.entry(&method.as_str());
            }
        }
        set.finish()
    }
}
