//! Middleware pipeline.
//!
//! A middleware is an async function of the request [`Event`] and a [`Next`]
//! continuation standing for "everything after me": the remaining global
//! middleware, the route's own middleware and finally the handler.
//!
//! ```rust
//! use kite::{Event, Next, Outcome};
//!
//! async fn timing(event: Event, next: Next) -> Outcome {
//!     let started = std::time::Instant::now();
//!     let res = next.run().await;
//!     tracing::debug!(path = event.path(), elapsed = ?started.elapsed());
//!     res
//! }
//! ```
//!
//! What a middleware returns decides how the chain continues (see
//! [`IntoFlow`]): returning a response short-circuits everything after it,
//! returning `()` hands control to the rest of the chain. `next` runs at most
//! once: a middleware that awaited `next.run()` and then returned `()` yields
//! the downstream result instead of running it a second time.
//!
//! # Composition
//!
//! The chain is a linked continuation, not a flat list. Mounting a sub-app
//! splices its whole middleware list in as one group layer whose own tail
//! resumes the parent chain, so siblings keep their registration order.

mod trace;

pub use trace::trace;

use std::future::Future;
use std::sync::{Arc, Mutex};

use crate::error::HttpError;
use crate::event::{Event, lock};
use crate::handler::{BoxFuture, BoxedHandler};
use crate::method::Method;
use crate::response::{Outcome, Response};
use crate::router::{Pattern, Route};

// ── Flow ──────────────────────────────────────────────────────────────────────

/// How the chain proceeds after a middleware returns.
pub enum Flow {
    /// Hand over to the rest of the chain.
    Continue,
    /// Stop here with this outcome.
    Respond(Outcome),
}

/// Conversion of a middleware's return value into a [`Flow`].
///
/// | Returned | Effect |
/// |---|---|
/// | `()`, `None`, `Ok(())`, `Ok(None)` | continue |
/// | `Response`, `Some(response)`, `Ok(response)` | respond |
/// | `Err(error)`, `HttpError` | fail |
pub trait IntoFlow {
    fn into_flow(self) -> Flow;
}

impl IntoFlow for Flow {
    fn into_flow(self) -> Flow { self }
}

impl IntoFlow for () {
    fn into_flow(self) -> Flow { Flow::Continue }
}

impl IntoFlow for Response {
    fn into_flow(self) -> Flow { Flow::Respond(Ok(self)) }
}

impl IntoFlow for HttpError {
    fn into_flow(self) -> Flow { Flow::Respond(Err(self)) }
}

impl IntoFlow for Option<Response> {
    fn into_flow(self) -> Flow {
        self.map_or(Flow::Continue, IntoFlow::into_flow)
    }
}

impl IntoFlow for Outcome {
    fn into_flow(self) -> Flow { Flow::Respond(self) }
}

impl IntoFlow for Result<(), HttpError> {
    fn into_flow(self) -> Flow {
        match self {
            Ok(()) => Flow::Continue,
            Err(e) => Flow::Respond(Err(e)),
        }
    }
}

impl IntoFlow for Result<Option<Response>, HttpError> {
    fn into_flow(self) -> Flow {
        match self {
            Ok(res) => res.into_flow(),
            Err(e) => Flow::Respond(Err(e)),
        }
    }
}

// ── Middleware ────────────────────────────────────────────────────────────────

/// Implemented for every `Fn(Event, Next) -> impl Future<Output = impl IntoFlow>`.
pub trait Middleware: Send + Sync + 'static {
    fn call(&self, event: Event, next: Next) -> BoxFuture<Flow>;
}

impl<F, Fut, R> Middleware for F
where
    F: Fn(Event, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoFlow + Send + 'static,
{
    fn call(&self, event: Event, next: Next) -> BoxFuture<Flow> {
        let fut = self(event, next);
        Box::pin(async move { fut.await.into_flow() })
    }
}

type BoxedMiddleware = Arc<dyn Middleware>;
type Predicate = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// Restricts a global middleware to some requests. A request that does not
/// satisfy every condition skips the middleware entirely.
#[derive(Clone, Default)]
pub struct MiddlewareOptions {
    pub(crate) route: Option<String>,
    pub(crate) method: Option<Method>,
    pub(crate) predicate: Option<Predicate>,
}

impl MiddlewareOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only paths matching this route pattern.
    pub fn route(mut self, pattern: impl Into<String>) -> Self {
        self.route = Some(pattern.into());
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Only requests for which `predicate` returns `true`.
    pub fn matching(mut self, predicate: impl Fn(&Event) -> bool + Send + Sync + 'static) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }
}

// ── Layers ────────────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub(crate) struct Filter {
    prefix: Option<Pattern>,
    pattern: Option<Pattern>,
    method: Option<Method>,
    predicate: Option<Predicate>,
}

impl Filter {
    pub(crate) fn new(pattern: Option<Pattern>, options: MiddlewareOptions) -> Self {
        Self { prefix: None, pattern, method: options.method, predicate: options.predicate }
    }

    fn matches(&self, event: &Event) -> bool {
        let path = event.path();
        if let Some(prefix) = &self.prefix {
            if !prefix.is_prefix_of(path) {
                return false;
            }
        }
        if let Some(pattern) = &self.pattern {
            if pattern.matches(path).is_none() {
                return false;
            }
        }
        if let Some(method) = self.method {
            if Method::from_http(event.method()) != Some(method) {
                return false;
            }
        }
        self.predicate.as_ref().is_none_or(|p| p(event))
    }

    fn rebased(&self, base: &Pattern) -> Self {
        Self {
            prefix: self.prefix.as_ref().map(|p| p.prefixed(base)),
            pattern: self.pattern.as_ref().map(|p| p.prefixed(base)),
            ..self.clone()
        }
    }
}

#[derive(Clone)]
enum Kind {
    Single(BoxedMiddleware),
    Group(Arc<[Layer]>),
}

/// One entry of a middleware list.
#[derive(Clone)]
pub(crate) struct Layer {
    filter: Filter,
    kind: Kind,
}

impl Layer {
    pub(crate) fn new(middleware: impl Middleware) -> Self {
        Self { filter: Filter::default(), kind: Kind::Single(Arc::new(middleware)) }
    }

    pub(crate) fn filtered(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Wraps a mounted app's middleware as one layer scoped to `base`.
    ///
    /// `base` is a static pattern. A path is under it when its leading
    /// non-empty segments equal the base segments, the same rule the router
    /// applies, so `//api/x` cannot reach a mounted route without its
    /// middleware. Inner filters are rewritten to full paths so nested
    /// mounts keep working.
    pub(crate) fn mounted(base: &Pattern, layers: Vec<Layer>) -> Self {
        let layers: Vec<Layer> = layers.iter().map(|l| l.rebased(base)).collect();
        Self {
            filter: Filter { prefix: Some(base.clone()), ..Filter::default() },
            kind: Kind::Group(Arc::from(layers)),
        }
    }

    fn rebased(&self, base: &Pattern) -> Self {
        let kind = match &self.kind {
            Kind::Single(mw) => Kind::Single(Arc::clone(mw)),
            Kind::Group(inner) => Kind::Group(inner.iter().map(|l| l.rebased(base)).collect()),
        };
        Self { filter: self.filter.rebased(base), kind }
    }
}

// ── Chain ─────────────────────────────────────────────────────────────────────

/// What runs once every layer of a chain has been passed.
#[derive(Clone)]
pub(crate) enum Tail {
    /// The matched route: its middleware, then its handler.
    Route(Arc<Route>),
    Handler(BoxedHandler),
    /// No route matched.
    NotFound,
    /// The rest of an enclosing chain (after a mounted group).
    Resume(Box<Chain>),
}

impl Tail {
    async fn run(self, event: Event) -> Outcome {
        match self {
            Self::Route(route) => {
                let tail = Tail::Handler(Arc::clone(&route.handler));
                Chain::new(Arc::clone(&route.middleware), tail).run(event).await
            }
            Self::Handler(handler) => handler.call(event).await,
            Self::NotFound => Err(HttpError::not_found(format!(
                "Cannot find any route matching [{}] {}",
                event.method(),
                event.path(),
            ))),
            Self::Resume(chain) => chain.run(event).await,
        }
    }
}

/// A position in a middleware list plus what follows it.
#[derive(Clone)]
pub(crate) struct Chain {
    layers: Arc<[Layer]>,
    index: usize,
    tail: Tail,
}

impl Chain {
    pub(crate) fn new(layers: Arc<[Layer]>, tail: Tail) -> Self {
        Self { layers, index: 0, tail }
    }

    pub(crate) fn run(mut self, event: Event) -> BoxFuture<Outcome> {
        Box::pin(async move {
            // Skipped layers cost nothing: no call, no allocation.
            while let Some(layer) = self.layers.get(self.index) {
                if layer.filter.matches(&event) {
                    break;
                }
                self.index += 1;
            }
            let Some(layer) = self.layers.get(self.index).cloned() else {
                return self.tail.run(event).await;
            };
            let rest = Chain { index: self.index + 1, ..self };

            match layer.kind {
                Kind::Group(inner) => {
                    Chain::new(inner, Tail::Resume(Box::new(rest))).run(event).await
                }
                Kind::Single(middleware) => {
                    let memo = Memo::default();
                    let next = Next { chain: rest.clone(), event: event.clone(), memo: Arc::clone(&memo) };
                    match middleware.call(event.clone(), next).await {
                        Flow::Respond(outcome) => outcome,
                        Flow::Continue => {
                            let memoized = lock(&memo).take();
                            match memoized {
                                Some(outcome) => outcome,
                                None => rest.run(event).await,
                            }
                        }
                    }
                }
            }
        })
    }
}

type Memo = Arc<Mutex<Option<Outcome>>>;

/// The rest of the chain, handed to each middleware.
pub struct Next {
    chain: Chain,
    event: Event,
    memo: Memo,
}

impl Next {
    /// Runs everything after the current middleware and returns its outcome.
    pub async fn run(self) -> Outcome {
        let outcome = self.chain.run(self.event).await;
        *lock(&self.memo) = Some(outcome.clone());
        outcome
    }
}
