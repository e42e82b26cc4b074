//! Incoming HTTP request type.
//!
//! A [`Request`] comes either from the transport (hyper's streaming body) or
//! from an in-memory `http::Request` built by embedding code and tests. The
//! body is not read here: [`Event::body`](crate::Event::body) reads it on
//! first use.

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Uri};
use http_body_util::BodyExt;
use hyper::body::Incoming;

use crate::event::Event;

/// An incoming HTTP request.
pub struct Request {
    pub(crate) method: http::Method,
    pub(crate) uri: Uri,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Body,
}

pub(crate) enum Body {
    Full(Bytes),
    Incoming(Incoming),
}

impl Body {
    pub(crate) async fn collect(self) -> Result<Bytes, hyper::Error> {
        match self {
            Self::Full(bytes) => Ok(bytes),
            Self::Incoming(incoming) => Ok(incoming.collect().await?.to_bytes()),
        }
    }
}

impl Request {
    pub fn method(&self) -> &http::Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn path(&self) -> &str { self.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.headers }

    /// Case-insensitive header lookup. Values that are not visible ASCII
    /// are treated as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub(crate) fn forwarded(
        method: http::Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
    ) -> Self {
        Self { method, uri, headers, body: Body::Full(body) }
    }

    fn from_parts(parts: http::request::Parts, body: Body) -> Self {
        Self { method: parts.method, uri: parts.uri, headers: parts.headers, body }
    }
}

type Seed = Box<dyn FnOnce(&Event) + Send>;

/// Method, headers, body and initial context for an in-process request.
///
/// ```rust
/// use kite::{App, Event, RequestOptions};
///
/// # async fn run(app: App) {
/// let options = RequestOptions::new()
///     .method(http::Method::POST)
///     .header("content-type", "application/json")
///     .body(r#"{"name":"kite"}"#)
///     .context("tenant", "acme".to_owned());
/// let res = app.request_with("/users", options).await;
/// # }
/// ```
#[derive(Default)]
pub struct RequestOptions {
    method: http::Method,
    headers: HeaderMap,
    body: Bytes,
    seeds: Vec<Seed>,
    error: Option<http::Error>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults to `GET`.
    pub fn method(mut self, method: http::Method) -> Self {
        self.method = method;
        self
    }

    /// Appends a header. An invalid name or value makes the request fail to
    /// build, like `http::request::Builder::header`.
    pub fn header<K, V>(mut self, name: K, value: V) -> Self
    where
        K: TryInto<HeaderName>,
        K::Error: Into<http::Error>,
        V: TryInto<HeaderValue>,
        V::Error: Into<http::Error>,
    {
        if self.error.is_some() {
            return self;
        }
        match (name.try_into(), value.try_into()) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            (Err(e), _) => self.error = Some(e.into()),
            (_, Err(e)) => self.error = Some(e.into()),
        }
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Seeds an extension slot of the request's event, as if a middleware had
    /// called [`Event::set_context`] first.
    pub fn context<T>(mut self, key: impl Into<String>, value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        let key = key.into();
        self.seeds.push(Box::new(move |event: &Event| event.set_context(&key, value)));
        self
    }

    pub(crate) fn build(self, uri: &str) -> Result<(Request, Vec<Seed>), crate::Error> {
        if let Some(err) = self.error {
            return Err(err.into());
        }
        let mut req = http::Request::builder().method(self.method).uri(uri).body(self.body)?;
        *req.headers_mut() = self.headers;
        Ok((req.into(), self.seeds))
    }
}

impl From<http::Request<Incoming>> for Request {
    fn from(req: http::Request<Incoming>) -> Self {
        let (parts, body) = req.into_parts();
        Self::from_parts(parts, Body::Incoming(body))
    }
}

macro_rules! from_buffered {
    ($($body:ty),* $(,)?) => {$(
        impl From<http::Request<$body>> for Request {
            fn from(req: http::Request<$body>) -> Self {
                let (parts, body) = req.into_parts();
                Self::from_parts(parts, Body::Full(Bytes::from(body)))
            }
        }
    )*};
}

from_buffered!(Bytes, String, Vec<u8>, &'static str);

impl From<http::Request<()>> for Request {
    fn from(req: http::Request<()>) -> Self {
        let (parts, ()) = req.into_parts();
        Self::from_parts(parts, Body::Full(Bytes::new()))
    }
}
