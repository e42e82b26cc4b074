//! Cookie header parsing and `Set-Cookie` serialization.
//!
//! Only what sessions need: look a cookie up by name and render one
//! `Set-Cookie` line with its attributes. Values are written verbatim, so
//! callers must pass cookie-safe text (the session layer uses URL-safe
//! base64).

use std::fmt;
use std::time::Duration;

use http::HeaderMap;
use http::header::COOKIE;

/// Finds the first cookie called `name` across every `Cookie` header.
pub(crate) fn find(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|line| line.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| unquote(value.trim()).to_owned())
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// The `SameSite` cookie attribute.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "Strict",
            Self::Lax    => "Lax",
            Self::None   => "None",
        }
    }
}

/// Attributes applied to every cookie a session writes.
///
/// Defaults: `Path=/; HttpOnly; Secure; SameSite=Lax`.
#[derive(Clone, Debug)]
pub struct CookieOptions {
    pub path: Option<String>,
    pub domain: Option<String>,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: Option<SameSite>,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            path: Some("/".to_owned()),
            domain: None,
            http_only: true,
            secure: true,
            same_site: Some(SameSite::Lax),
        }
    }
}

/// One `Set-Cookie` line.
#[derive(Clone, Debug)]
pub struct SetCookie {
    name: String,
    value: String,
    max_age: Option<Duration>,
    options: CookieOptions,
}

impl SetCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            max_age: None,
            options: CookieOptions::default(),
        }
    }

    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn options(mut self, options: CookieOptions) -> Self {
        self.options = options;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for SetCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)?;
        if let Some(max_age) = self.max_age {
            write!(f, "; Max-Age={}", max_age.as_secs())?;
        }
        if let Some(domain) = &self.options.domain {
            write!(f, "; Domain={domain}")?;
        }
        if let Some(path) = &self.options.path {
            write!(f, "; Path={path}")?;
        }
        if self.options.http_only {
            f.write_str("; HttpOnly")?;
        }
        if self.options.secure {
            f.write_str("; Secure")?;
        }
        if let Some(same_site) = self.options.same_site {
            write!(f, "; SameSite={}", same_site.as_str())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn finds_cookie_across_headers() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("a=1; theme=dark"));
        headers.append(COOKIE, HeaderValue::from_static("sid=\"abc.def\""));

        assert_eq!(find(&headers, "theme").as_deref(), Some("dark"));
        assert_eq!(find(&headers, "sid").as_deref(), Some("abc.def"));
        assert_eq!(find(&headers, "missing"), None);
    }

    #[test]
    fn renders_default_attributes() {
        let line = SetCookie::new("sid", "v1.x").max_age(Duration::from_secs(60)).to_string();
        assert_eq!(line, "sid=v1.x; Max-Age=60; Path=/; HttpOnly; Secure; SameSite=Lax");
    }

    #[test]
    fn renders_custom_attributes() {
        let options = CookieOptions {
            path: None,
            domain: Some("example.com".to_owned()),
            http_only: false,
            secure: false,
            same_site: Some(SameSite::Strict),
        };
        let line = SetCookie::new("sid", "").options(options).to_string();
        assert_eq!(line, "sid=; Domain=example.com; SameSite=Strict");
    }
}
