//! HTTP method as a closed, typed enum plus the route-level `ANY` fallback.
//!
//! Routes are registered against a [`MethodFilter`]: either one exact
//! [`Method`] or [`MethodFilter::Any`]. Requests carrying a method outside the
//! closed set (WebDAV verbs, `PURGE`, ...) can still reach `ANY` routes.

use std::fmt;
use std::str::FromStr;

/// A method a route can be registered for (RFC 9110 §9).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Method {
    Connect,
    Delete,
    Get,
    Head,
    Options,
    Patch,
    Post,
    Put,
    Trace,
}

impl Method {
    /// Returns the uppercase wire representation (e.g. `"GET"`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Delete  => "DELETE",
            Self::Get     => "GET",
            Self::Head    => "HEAD",
            Self::Options => "OPTIONS",
            Self::Patch   => "PATCH",
            Self::Post    => "POST",
            Self::Put     => "PUT",
            Self::Trace   => "TRACE",
        }
    }

    /// Maps a wire method onto the closed set. `None` for extension methods.
    pub fn from_http(method: &http::Method) -> Option<Self> {
        method.as_str().parse().ok()
    }
}

/// Parses a method name. Registration code often spells methods in lower
/// case (`"get"`), so matching ignores ASCII case.
impl FromStr for Method {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const ALL: [Method; 9] = [
            Method::Connect,
            Method::Delete,
            Method::Get,
            Method::Head,
            Method::Options,
            Method::Patch,
            Method::Post,
            Method::Put,
            Method::Trace,
        ];
        ALL.into_iter().find(|m| m.as_str().eq_ignore_ascii_case(s)).ok_or(())
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Method> for http::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Connect => http::Method::CONNECT,
            Method::Delete  => http::Method::DELETE,
            Method::Get     => http::Method::GET,
            Method::Head    => http::Method::HEAD,
            Method::Options => http::Method::OPTIONS,
            Method::Patch   => http::Method::PATCH,
            Method::Post    => http::Method::POST,
            Method::Put     => http::Method::PUT,
            Method::Trace   => http::Method::TRACE,
        }
    }
}

/// The method half of a route key.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum MethodFilter {
    /// Fallback: matched only when no exact-method route matches the path.
    Any,
    Exact(Method),
}

impl MethodFilter {
    pub(crate) fn is_any(self) -> bool {
        matches!(self, Self::Any)
    }
}

impl From<Method> for MethodFilter {
    fn from(method: Method) -> Self {
        Self::Exact(method)
    }
}

impl fmt::Display for MethodFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("ANY"),
            Self::Exact(m) => m.fmt(f),
        }
    }
}
