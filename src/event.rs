//! Per-request event context.
//!
//! An [`Event`] is created once for every inbound request and handed to every
//! middleware and handler that request passes through. It is a cheap handle
//! (`Clone` is one atomic increment), so a handler can fan work out over
//! several futures that all see the same request state.
//!
//! Besides read access to the request it carries:
//!
//! - the path parameters and route meta, attached once the router matched;
//! - the request body, read on first use and cached;
//! - extension slots: values keyed by name and type, computed at most once
//!   per request even when several futures ask for them at the same time;
//! - response overrides (status, headers, cookies) staged during the request
//!   and committed exactly once onto the final response.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use bytes::Bytes;
use http::header::SET_COOKIE;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::warn;
use url::form_urlencoded;

use crate::cookie::{self, SetCookie};
use crate::error::HttpError;
use crate::request::{Body, Request};
use crate::response::Response;

/// Path parameters bound by the matched route.
pub type Params = HashMap<String, String>;

/// Opaque per-route metadata.
pub type Meta = serde_json::Map<String, Value>;

pub(crate) type SharedOverrides = Arc<Mutex<ResponseOverrides>>;

type SlotKey = (TypeId, String);
type Slot = Arc<dyn Any + Send + Sync>;

/// Locks `mutex`, recovering the data if a panicking holder poisoned it.
/// Request state stays usable after a handler panic so the error response
/// can still be produced.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The per-request context threaded through middleware and handlers.
#[derive(Clone)]
pub struct Event {
    inner: Arc<Inner>,
}

struct Inner {
    method: http::Method,
    uri: Uri,
    headers: HeaderMap,
    body: Mutex<Option<Body>>,
    body_cache: OnceCell<Bytes>,
    route: OnceLock<RouteInfo>,
    slots: Mutex<HashMap<SlotKey, Slot>>,
    response: SharedOverrides,
    handled: AtomicBool,
}

struct RouteInfo {
    params: Params,
    meta: Arc<Meta>,
}

/// Response state staged by handlers and subsystems before the response
/// exists.
#[derive(Default)]
pub(crate) struct ResponseOverrides {
    status: Option<StatusCode>,
    headers: HeaderMap,
    cookies: Vec<SetCookie>,
    committed: bool,
}

impl ResponseOverrides {
    /// Stages a cookie; a later cookie with the same name replaces it.
    /// Cookies staged after the response was finalized are never sent.
    pub(crate) fn stage_cookie(&mut self, cookie: SetCookie) {
        if self.committed {
            warn!(cookie = cookie.name(), "cookie staged after the response was finalized");
        }
        self.cookies.retain(|c| c.name() != cookie.name());
        self.cookies.push(cookie);
    }
}

impl Event {
    pub(crate) fn new(request: Request) -> Self {
        let Request { method, uri, headers, body } = request;
        Self {
            inner: Arc::new(Inner {
                method,
                uri,
                headers,
                body: Mutex::new(Some(body)),
                body_cache: OnceCell::new(),
                route: OnceLock::new(),
                slots: Mutex::new(HashMap::new()),
                response: SharedOverrides::default(),
                handled: AtomicBool::new(false),
            }),
        }
    }

    // ── Request ───────────────────────────────────────────────────────────────

    pub fn method(&self) -> &http::Method { &self.inner.method }
    pub fn uri(&self) -> &Uri { &self.inner.uri }
    pub fn path(&self) -> &str { self.inner.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.inner.headers }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The value of the request cookie called `name`.
    pub fn cookie(&self, name: &str) -> Option<String> {
        cookie::find(&self.inner.headers, name)
    }

    /// The first query-string value for `name`, form-decoded. A key
    /// without `=` yields an empty string.
    pub fn query(&self, name: &str) -> Option<String> {
        let query = self.inner.uri.query()?;
        form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/:id`, `event.param("id")` on `/users/42` returns
    /// `Some("42")`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.inner.route.get()?.params.get(name).map(String::as_str)
    }

    /// All path parameters; empty before routing or when nothing matched.
    pub fn params(&self) -> Params {
        self.inner.route.get().map(|r| r.params.clone()).unwrap_or_default()
    }

    /// A meta value of the matched route.
    pub fn meta(&self, key: &str) -> Option<&Value> {
        self.inner.route.get()?.meta.get(key)
    }

    pub(crate) fn attach_route(&self, params: Params, meta: Arc<Meta>) {
        let _ = self.inner.route.set(RouteInfo { params, meta });
    }

    // ── Body ──────────────────────────────────────────────────────────────────

    /// The full request body. Read from the transport on the first call; every
    /// later call, from any clone of the event, returns the cached bytes.
    pub async fn body(&self) -> Result<Bytes, HttpError> {
        self.inner
            .body_cache
            .get_or_try_init(|| async {
                let body = lock(&self.inner.body).take();
                match body {
                    Some(body) => body.collect().await.map_err(|e| {
                        HttpError::bad_request("Failed to read request body").with_cause(e)
                    }),
                    None => Ok(Bytes::new()),
                }
            })
            .await
            .cloned()
    }

    /// Rebuilds the request for a mounted fetch handler: the path becomes the
    /// wildcard parameter `param`, method, query and headers are kept and the
    /// body is buffered.
    pub(crate) async fn forward(&self, param: &str) -> Result<Request, HttpError> {
        let body = self.body().await?;
        let path = self.param(param).unwrap_or_default();
        let uri = match self.uri().query() {
            Some(query) => format!("/{path}?{query}"),
            None => format!("/{path}"),
        };
        let uri: Uri = uri
            .parse()
            .map_err(|e| HttpError::bad_request("Invalid forwarded path").with_cause(e))?;
        Ok(Request::forwarded(self.method().clone(), uri, self.headers().clone(), body))
    }

    /// The body parsed as JSON. Malformed input is a `400`.
    pub async fn json<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        let bytes = self.body().await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| HttpError::bad_request("Invalid JSON body").with_cause(e))
    }

    /// The body as UTF-8 text. Invalid UTF-8 is a `400`.
    pub async fn text(&self) -> Result<String, HttpError> {
        let bytes = self.body().await?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| HttpError::bad_request("Request body is not UTF-8").with_cause(e))
    }

    // ── Extension slots ───────────────────────────────────────────────────────

    /// Returns the value stored under `key`, computing it with `init` if this
    /// is the first request for it.
    ///
    /// Concurrent callers on the same event await the single in-flight
    /// computation instead of starting their own. If `init` fails the slot
    /// stays empty and the next caller retries.
    pub async fn get_or_init<T, E, F, Fut>(&self, key: &str, init: F) -> Result<T, E>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let cell = self.slot::<T>(key);
        cell.get_or_try_init(init).await.cloned()
    }

    /// The value stored under `key`, if it has been computed or set.
    pub fn context<T>(&self, key: &str) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let slots = lock(&self.inner.slots);
        let slot = slots.get(&slot_key::<T>(key))?;
        slot.downcast_ref::<OnceCell<T>>()?.get().cloned()
    }

    /// Stores `value` under `key`, replacing whatever was there.
    pub fn set_context<T>(&self, key: &str, value: T)
    where
        T: Send + Sync + 'static,
    {
        let cell: Slot = Arc::new(OnceCell::new_with(Some(value)));
        lock(&self.inner.slots).insert(slot_key::<T>(key), cell);
    }

    /// Drops the value stored under `key`. Returns whether one existed.
    pub fn remove_context<T: 'static>(&self, key: &str) -> bool {
        lock(&self.inner.slots).remove(&slot_key::<T>(key)).is_some()
    }

    fn slot<T>(&self, key: &str) -> Arc<OnceCell<T>>
    where
        T: Send + Sync + 'static,
    {
        let slot = {
            let mut slots = lock(&self.inner.slots);
            Arc::clone(
                slots
                    .entry(slot_key::<T>(key))
                    .or_insert_with(|| Arc::new(OnceCell::<T>::new()) as Slot),
            )
        };
        match slot.downcast::<OnceCell<T>>() {
            Ok(cell) => cell,
            Err(_) => unreachable!("slots are keyed by value type"),
        }
    }

    // ── Response overrides ────────────────────────────────────────────────────

    /// Status for the final response. Applied only when the pipeline produced
    /// a plain `200 OK`.
    pub fn set_status(&self, status: StatusCode) {
        lock(&self.inner.response).status = Some(status);
    }

    /// Sets a header on the final response unless the response already
    /// carries one with that name.
    pub fn set_header(&self, name: HeaderName, value: HeaderValue) {
        lock(&self.inner.response).headers.insert(name, value);
    }

    /// Like [`set_header`](Self::set_header) but keeps earlier values.
    pub fn append_header(&self, name: HeaderName, value: HeaderValue) {
        lock(&self.inner.response).headers.append(name, value);
    }

    /// Stages a `Set-Cookie`. The last cookie staged for a name wins.
    pub fn set_cookie(&self, cookie: SetCookie) {
        lock(&self.inner.response).stage_cookie(cookie);
    }

    pub(crate) fn overrides(&self) -> SharedOverrides {
        Arc::clone(&self.inner.response)
    }

    /// `true` once the response for this event has been finalized.
    pub fn is_handled(&self) -> bool {
        self.inner.handled.load(Ordering::Acquire)
    }

    /// Applies the staged overrides to `response`. Runs at most once per
    /// event; later calls leave the response untouched.
    pub(crate) fn commit(&self, response: &mut Response) {
        if self.inner.handled.swap(true, Ordering::AcqRel) {
            return;
        }
        let staged = {
            let mut overrides = lock(&self.inner.response);
            let staged = std::mem::take(&mut *overrides);
            overrides.committed = true;
            staged
        };

        if let Some(status) = staged.status {
            if response.status_code() == StatusCode::OK {
                response.set_status(status);
            }
        }

        let headers = response.headers_mut();
        for name in staged.headers.keys() {
            if headers.contains_key(name) {
                continue;
            }
            for value in staged.headers.get_all(name) {
                headers.append(name.clone(), value.clone());
            }
        }

        for cookie in staged.cookies {
            match HeaderValue::from_str(&cookie.to_string()) {
                Ok(value) => {
                    headers.append(SET_COOKIE, value);
                }
                Err(_) => warn!(cookie = cookie.name(), "dropping cookie with invalid value"),
            }
        }
    }
}

fn slot_key<T: 'static>(key: &str) -> SlotKey {
    (TypeId::of::<T>(), key.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn event(body: &'static str) -> Event {
        Event::new(http::Request::post("/").body(body).unwrap().into())
    }

    #[tokio::test]
    async fn body_is_read_once_and_shared() {
        let event = event(r#"{"n":1}"#);
        let clone = event.clone();
        let first: Value = event.json().await.unwrap();
        let second = clone.body().await.unwrap();
        assert_eq!(first["n"], 1);
        assert_eq!(&second[..], br#"{"n":1}"#);
    }

    #[tokio::test]
    async fn invalid_json_is_a_bad_request() {
        let err = event("{").json::<Value>().await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(!err.is_unhandled());
    }

    #[tokio::test]
    async fn concurrent_slot_requests_share_one_computation() {
        let event = event("");
        let calls = &AtomicUsize::new(0);
        let init = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok::<_, ()>(7u32)
        };
        let (a, b, c) = tokio::join!(
            event.get_or_init("n", init),
            event.get_or_init("n", init),
            event.get_or_init("n", init),
        );
        assert_eq!((a, b, c), (Ok(7), Ok(7), Ok(7)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(event.context::<u32>("n"), Some(7));
    }

    #[test]
    fn query_values_are_decoded() {
        let uri = "/s?q=a+b%21&flag&caf%C3%A9=1&q=second";
        let event = Event::new(http::Request::get(uri).body(()).unwrap().into());
        assert_eq!(event.query("q").as_deref(), Some("a b!"));
        assert_eq!(event.query("flag").as_deref(), Some(""));
        assert_eq!(event.query("café").as_deref(), Some("1"));
        assert_eq!(event.query("missing"), None);
    }

    #[tokio::test]
    async fn forwarding_strips_the_mount_and_keeps_the_rest() {
        let event = Event::new(
            http::Request::put("/legacy/a/b?x=1").header("x-id", "7").body("payload").unwrap().into(),
        );
        let mut params = Params::new();
        params.insert("rest".to_owned(), "a/b".to_owned());
        event.attach_route(params, Arc::default());

        let forwarded = event.forward("rest").await.unwrap();
        assert_eq!(forwarded.method(), http::Method::PUT);
        assert_eq!(forwarded.uri(), "/a/b?x=1");
        assert_eq!(forwarded.header("x-id"), Some("7"));
        let body = forwarded.body.collect().await.unwrap();
        assert_eq!(&body[..], b"payload");
    }

    #[tokio::test]
    async fn slots_are_separated_by_type() {
        let event = event("");
        event.set_context("k", 1u8);
        event.set_context("k", "one".to_owned());
        assert_eq!(event.context::<u8>("k"), Some(1));
        assert_eq!(event.context::<String>("k").as_deref(), Some("one"));
        assert!(event.remove_context::<u8>("k"));
        assert_eq!(event.context::<u8>("k"), None);
    }

    #[test]
    fn commit_applies_overrides_once() {
        let event = event("");
        event.set_status(StatusCode::CREATED);
        event.set_cookie(SetCookie::new("a", "1"));
        event.set_cookie(SetCookie::new("a", "2"));
        event.set_header(http::header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

        let mut res = Response::text("ok");
        event.commit(&mut res);
        assert_eq!(res.status_code(), StatusCode::CREATED);
        assert_eq!(res.set_cookies().len(), 1);
        assert!(res.set_cookies()[0].starts_with("a=2;"));
        assert_eq!(res.header("cache-control"), Some("no-store"));
        assert!(event.is_handled());

        let mut again = Response::text("ok");
        event.commit(&mut again);
        assert!(again.set_cookies().is_empty());
    }

    #[test]
    fn overrides_remember_that_they_were_committed() {
        let event = event("");
        event.commit(&mut Response::text("ok"));
        let overrides = event.overrides();
        assert!(lock(&overrides).committed);
        event.set_cookie(SetCookie::new("late", "1"));
        assert_eq!(lock(&overrides).cookies.len(), 1);
    }
}
