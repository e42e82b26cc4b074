//! Request router.
//!
//! Maps `(method, path)` to a registered [`Route`] plus its path parameters.
//!
//! # Pattern syntax
//!
//! | Segment | Matches | Binds |
//! |---|---|---|
//! | `users` | exactly `users` | nothing |
//! | `:id` or `{id}` | one segment | `id` |
//! | `*` | one segment | `_0`, `_1`, ... in order |
//! | `**` | zero or more trailing segments | `_` |
//! | `**:rest` or `{*rest}` | zero or more trailing segments | `rest` |
//!
//! Empty segments are ignored, so `/users/` and `/users` are the same path.
//!
//! # Precedence
//!
//! When several routes match, segments are compared left to right: static
//! beats parameter, parameter beats wildcard, and a pattern that ends where
//! the path ends beats one that continues with a wildcard. Among equally
//! specific patterns the first registered wins. Routes registered for `ANY`
//! method are only considered when no exact-method route matches the path.
//!
//! Lookup is a read-only scan, so one `Router` can serve any number of
//! concurrent requests.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::error::Error;
use crate::event::{Meta, Params};
use crate::handler::{BoxedHandler, Handler};
use crate::method::{Method, MethodFilter};
use crate::middleware::{Layer, Middleware};

// ── Pattern ───────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Eq, PartialEq)]
enum Segment {
    Static(String),
    Param(String),
    Wildcard(String),
}

impl Segment {
    fn rank(&self) -> u8 {
        match self {
            Self::Wildcard(_) => 0,
            Self::Param(_) => 1,
            Self::Static(_) => 2,
        }
    }
}

/// Rank of "the pattern ends here"; outranks a trailing wildcard.
const END: u8 = 3;

/// A compiled path pattern.
#[derive(Clone, Debug)]
pub(crate) struct Pattern {
    segments: Vec<Segment>,
    rank: Vec<u8>,
}

impl Pattern {
    pub(crate) fn parse(source: &str) -> Result<Self, Error> {
        let invalid = |reason| Error::InvalidPattern { pattern: source.to_owned(), reason };

        let mut segments = Vec::new();
        let mut unnamed = 0;
        for raw in source.split('/').filter(|s| !s.is_empty()) {
            let segment = if let Some(inner) = raw.strip_prefix('{') {
                let inner = inner.strip_suffix('}').ok_or_else(|| invalid("unbalanced `{`"))?;
                if inner.contains(['{', '}']) {
                    return Err(invalid("nested braces"));
                }
                match inner.strip_prefix('*') {
                    Some(name) => Segment::Wildcard(name.to_owned()),
                    None => Segment::Param(inner.to_owned()),
                }
            } else if raw.contains(['{', '}']) {
                return Err(invalid("parameter braces must enclose a whole segment"));
            } else if raw == "**" {
                Segment::Wildcard("_".to_owned())
            } else if let Some(name) = raw.strip_prefix("**:") {
                Segment::Wildcard(name.to_owned())
            } else if raw == "*" {
                unnamed += 1;
                Segment::Param(format!("_{}", unnamed - 1))
            } else if let Some(name) = raw.strip_prefix(':') {
                Segment::Param(name.to_owned())
            } else {
                Segment::Static(raw.to_owned())
            };
            segments.push(segment);
        }

        let mut names = HashSet::new();
        for (i, segment) in segments.iter().enumerate() {
            let name = match segment {
                Segment::Static(_) => continue,
                Segment::Param(name) => name,
                Segment::Wildcard(name) => {
                    if i + 1 != segments.len() {
                        return Err(invalid("wildcard must be the last segment"));
                    }
                    name
                }
            };
            if name.is_empty() {
                return Err(invalid("empty parameter name"));
            }
            if !names.insert(name.as_str()) {
                return Err(invalid("duplicate parameter name"));
            }
        }

        Ok(Self::from_segments(segments))
    }

    fn from_segments(segments: Vec<Segment>) -> Self {
        let mut rank: Vec<u8> = segments.iter().map(Segment::rank).collect();
        if !matches!(segments.last(), Some(Segment::Wildcard(_))) {
            rank.push(END);
        }
        Self { segments, rank }
    }

    /// `base` followed by this pattern.
    pub(crate) fn prefixed(&self, base: &Pattern) -> Pattern {
        let segments = base.segments.iter().chain(&self.segments).cloned().collect();
        Self::from_segments(segments)
    }

    pub(crate) fn is_static(&self) -> bool {
        self.segments.iter().all(|s| matches!(s, Segment::Static(_)))
    }

    /// Whether the leading segments of `path` satisfy this pattern. Empty
    /// segments are skipped exactly as in [`matches`](Self::matches), so a
    /// prefix check never disagrees with the router.
    pub(crate) fn is_prefix_of(&self, path: &str) -> bool {
        let mut parts = path.split('/').filter(|s| !s.is_empty());
        self.segments.iter().all(|segment| match (segment, parts.next()) {
            (Segment::Static(text), Some(part)) => part == text,
            (Segment::Param(_), Some(_)) | (Segment::Wildcard(_), _) => true,
            (_, None) => false,
        })
    }

    pub(crate) fn matches(&self, path: &str) -> Option<Params> {
        let mut parts = path.split('/').filter(|s| !s.is_empty());
        let mut params = Params::new();
        for segment in &self.segments {
            match segment {
                Segment::Static(text) => {
                    if parts.next()? != text.as_str() {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    params.insert(name.clone(), parts.next()?.to_owned());
                }
                Segment::Wildcard(name) => {
                    let rest: Vec<&str> = parts.collect();
                    params.insert(name.clone(), rest.join("/"));
                    return Some(params);
                }
            }
        }
        parts.next().is_none().then_some(params)
    }
}

/// Canonical form: `/users/:id/**:rest`. Two patterns with the same
/// canonical form are the same route key.
impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            match segment {
                Segment::Static(text) => write!(f, "/{text}")?,
                Segment::Param(name) => write!(f, "/:{name}")?,
                Segment::Wildcard(name) => write!(f, "/**:{name}")?,
            }
        }
        Ok(())
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.segments == other.segments
    }
}

// ── Route ─────────────────────────────────────────────────────────────────────

/// Per-route options: middleware that wraps only this route's handler, and
/// opaque metadata visible through [`Event::meta`](crate::Event::meta).
#[derive(Clone, Default)]
pub struct RouteOptions {
    pub(crate) middleware: Vec<Layer>,
    pub(crate) meta: Meta,
}

impl RouteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a route middleware. They run in the order added, after all
    /// global middleware and right before the handler.
    pub fn middleware(mut self, middleware: impl Middleware) -> Self {
        self.middleware.push(Layer::new(middleware));
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }
}

/// A registered `(method, pattern) → handler` binding.
#[derive(Clone)]
pub struct Route {
    method: MethodFilter,
    pattern: Pattern,
    pub(crate) middleware: Arc<[Layer]>,
    pub(crate) meta: Arc<Meta>,
    pub(crate) handler: BoxedHandler,
}

impl Route {
    /// Compiles `pattern`. Fails only when the pattern is structurally
    /// invalid (unbalanced braces, empty or duplicate names, a wildcard that
    /// is not last).
    pub fn new(
        method: impl Into<MethodFilter>,
        pattern: &str,
        handler: impl Handler,
    ) -> Result<Self, Error> {
        Ok(Self {
            method: method.into(),
            pattern: Pattern::parse(pattern)?,
            middleware: Arc::from(Vec::new()),
            meta: Arc::default(),
            handler: handler.into_boxed_handler(),
        })
    }

    pub fn with_options(mut self, options: RouteOptions) -> Self {
        self.middleware = Arc::from(options.middleware);
        self.meta = Arc::new(options.meta);
        self
    }

    pub fn method(&self) -> MethodFilter {
        self.method
    }

    /// The canonical pattern, e.g. `/users/:id`.
    pub fn pattern(&self) -> String {
        self.pattern.to_string()
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub(crate) fn rebased(mut self, base: &Pattern) -> Self {
        self.pattern = self.pattern.prefixed(base);
        self
    }

    fn same_key(&self, other: &Route) -> bool {
        self.method == other.method && self.pattern == other.pattern
    }
}

// ── Router ────────────────────────────────────────────────────────────────────

/// The result of a successful lookup.
pub struct Match {
    pub route: Arc<Route>,
    pub params: Params,
}

/// The route table.
#[derive(Clone, Default)]
pub struct Router {
    routes: Vec<Arc<Route>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `route`. Registering the same method and pattern again
    /// replaces the earlier handler but keeps its precedence slot.
    pub fn add(&mut self, route: Route) {
        tracing::trace!(method = %route.method, pattern = %route.pattern, "route registered");
        match self.routes.iter_mut().find(|r| r.same_key(&route)) {
            Some(slot) => *slot = Arc::new(route),
            None => self.routes.push(Arc::new(route)),
        }
    }

    /// Finds the most specific route for `method` and `path`.
    pub fn find(&self, method: &http::Method, path: &str) -> Option<Match> {
        let method = Method::from_http(method);
        self.best(path, |m| matches!(m, MethodFilter::Exact(m) if Some(m) == method))
            .or_else(|| self.best(path, MethodFilter::is_any))
            .map(|(route, params)| Match { route: Arc::clone(route), params })
    }

    fn best(
        &self,
        path: &str,
        accepts: impl Fn(MethodFilter) -> bool,
    ) -> Option<(&Arc<Route>, Params)> {
        let mut best: Option<(&Arc<Route>, Params)> = None;
        for route in self.routes.iter().filter(|r| accepts(r.method)) {
            let Some(params) = route.pattern.matches(path) else { continue };
            // Strictly greater: the earlier route keeps a tie.
            if best.as_ref().is_none_or(|(b, _)| route.pattern.rank > b.pattern.rank) {
                best = Some((route, params));
            }
        }
        best
    }

    pub(crate) fn into_routes(self) -> impl Iterator<Item = Route> {
        self.routes.into_iter().map(Arc::unwrap_or_clone)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Event;

    async fn noop(_: Event) {}

    fn router(routes: &[(MethodFilter, &str)]) -> Router {
        let mut router = Router::new();
        for (method, pattern) in routes {
            router.add(Route::new(*method, pattern, noop).unwrap());
        }
        router
    }

    fn found(router: &Router, method: http::Method, path: &str) -> Option<(String, Params)> {
        router.find(&method, path).map(|m| (m.route.pattern(), m.params))
    }

    const GET: MethodFilter = MethodFilter::Exact(Method::Get);

    #[test]
    fn binds_params_and_wildcards() {
        let r = router(&[(GET, "/users/:id"), (GET, "/files/**:path"), (GET, "/x/*/*")]);

        let (_, params) = found(&r, http::Method::GET, "/users/42").unwrap();
        assert_eq!(params["id"], "42");

        let (_, params) = found(&r, http::Method::GET, "/files/a/b/c.txt").unwrap();
        assert_eq!(params["path"], "a/b/c.txt");

        let (_, params) = found(&r, http::Method::GET, "/files").unwrap();
        assert_eq!(params["path"], "");

        let (_, params) = found(&r, http::Method::GET, "/x/1/2").unwrap();
        assert_eq!((params["_0"].as_str(), params["_1"].as_str()), ("1", "2"));

        assert!(found(&r, http::Method::GET, "/users/42/posts").is_none());
        assert!(found(&r, http::Method::GET, "/users").is_none());
    }

    #[test]
    fn static_beats_param_beats_wildcard() {
        let r = router(&[(GET, "/a/**"), (GET, "/a/:b"), (GET, "/a/new")]);
        assert_eq!(found(&r, http::Method::GET, "/a/new").unwrap().0, "/a/new");
        assert_eq!(found(&r, http::Method::GET, "/a/old").unwrap().0, "/a/:b");
        assert_eq!(found(&r, http::Method::GET, "/a/old/deeper").unwrap().0, "/a/**:_");
        assert_eq!(found(&r, http::Method::GET, "/a").unwrap().0, "/a/**:_");
    }

    #[test]
    fn exact_end_beats_trailing_wildcard() {
        let r = router(&[(GET, "/a/**"), (GET, "/a")]);
        assert_eq!(found(&r, http::Method::GET, "/a").unwrap().0, "/a");
    }

    #[test]
    fn first_registered_wins_ties() {
        let r = router(&[(GET, "/a/:first"), (GET, "/a/*")]);
        let (pattern, params) = found(&r, http::Method::GET, "/a/x").unwrap();
        assert_eq!(pattern, "/a/:first");
        assert_eq!(params["first"], "x");
    }

    #[test]
    fn any_is_only_a_fallback() {
        let r = router(&[(MethodFilter::Any, "/a/new"), (GET, "/a/:b")]);
        // The exact GET route matches, so the more specific ANY route is ignored.
        assert_eq!(found(&r, http::Method::GET, "/a/new").unwrap().0, "/a/:b");
        assert_eq!(found(&r, http::Method::POST, "/a/new").unwrap().0, "/a/new");
        let purge = http::Method::from_bytes(b"PURGE").unwrap();
        assert_eq!(found(&r, purge, "/a/new").unwrap().0, "/a/new");
        assert!(found(&r, http::Method::POST, "/a/old").is_none());
    }

    #[test]
    fn reregistering_replaces_in_place() {
        let mut r = router(&[(GET, "/a/:x"), (GET, "/a/:y")]);
        r.add(Route::new(GET, "/a/{x}", noop).unwrap());
        assert_eq!(r.len(), 2);
        assert_eq!(found(&r, http::Method::GET, "/a/1").unwrap().0, "/a/:x");
    }

    #[test]
    fn trailing_and_duplicate_slashes_are_ignored() {
        let r = router(&[(GET, "/users/")]);
        assert!(found(&r, http::Method::GET, "/users").is_some());
        assert!(found(&r, http::Method::GET, "//users//").is_some());
    }

    #[test]
    fn rejects_structurally_invalid_patterns() {
        for bad in ["/a/{id", "/a/id}", "/a/{}", "/a/:", "/a/**/b", "/a/:x/:x", "/a/x{id}", "/{{x}}"] {
            assert!(
                matches!(Pattern::parse(bad), Err(Error::InvalidPattern { .. })),
                "{bad} should be rejected",
            );
        }
    }

    #[test]
    fn prefixing_keeps_precedence() {
        let base = Pattern::parse("/api").unwrap();
        let p = Pattern::parse("/users/:id").unwrap().prefixed(&base);
        assert_eq!(p.to_string(), "/api/users/:id");
        assert_eq!(p.matches("/api/users/7").unwrap()["id"], "7");
        assert!(Pattern::parse("/").unwrap().prefixed(&base).matches("/api").is_some());
    }

    #[test]
    fn prefix_checks_skip_empty_segments() {
        let base = Pattern::parse("/api/v1").unwrap();
        for path in ["/api/v1", "/api/v1/users", "//api/v1", "/api//v1/", "///api/v1//users"] {
            assert!(base.is_prefix_of(path), "{path}");
        }
        for path in ["/api", "/apiv1", "/api/v2/users", "/v1/api"] {
            assert!(!base.is_prefix_of(path), "{path}");
        }
        assert!(Pattern::parse("/").unwrap().is_prefix_of("/anything"));
    }
}
