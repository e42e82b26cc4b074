//! The app: route table, global middleware and the per-request dispatch.
//!
//! Every request goes through the same steps:
//!
//! 1. an [`Event`] is created for it;
//! 2. the `on_request` hook runs;
//! 3. the router resolves the route and attaches its params;
//! 4. global middleware, then route middleware, then the handler run as one
//!    chain (an unmatched request runs the global middleware around a `404`);
//! 5. a failure anywhere is normalized into an error response;
//! 6. staged headers and cookies are committed, `on_response` runs.
//!
//! A response is always produced. Panics in middleware or handlers are
//! caught and answered like any other unhandled error; a panicking
//! `on_response` hook yields a bare `500`.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tracing::{debug, error};

use crate::config::AppConfig;
use crate::error::{self, HttpError};
use crate::event::Event;
use crate::handler::Handler;
use crate::method::{Method, MethodFilter};
use crate::middleware::{Chain, Filter, Layer, Middleware, MiddlewareOptions, Tail};
use crate::request::{Request, RequestOptions};
use crate::response::{Outcome, Response};
use crate::router::{Match, Pattern, Route, RouteOptions, Router};

/// A composable application.
///
/// Built once at startup with chained registration calls, then shared by
/// reference for every request.
///
/// ```rust
/// use kite::{App, Event, RouteOptions};
///
/// async fn get_user(event: Event) -> String {
///     format!("user {}", event.param("id").unwrap_or("?"))
/// }
///
/// let app = App::new()
///     .get("/users/:id", get_user)
///     .on_with(kite::Method::Delete, "/users/:id", get_user, RouteOptions::new().meta("auth", true));
/// ```
pub struct App {
    config: Arc<AppConfig>,
    router: Router,
    middleware: Arc<[Layer]>,
}

/// A reusable bundle of registrations: any `FnOnce(App) -> App`.
pub trait Plugin {
    fn apply(self, app: App) -> App;
}

impl<F> Plugin for F
where
    F: FnOnce(App) -> App,
{
    fn apply(self, app: App) -> App {
        self(app)
    }
}

/// Turns a two-argument definition into a plugin factory taking options.
///
/// ```rust
/// use kite::{App, define_plugin};
///
/// let health = define_plugin(|app: App, path: &'static str| app.get(path, |_: kite::Event| async { "ok" }));
/// let app = App::new().register(health("/healthz"));
/// ```
pub fn define_plugin<T, F>(def: F) -> impl Fn(T) -> Box<dyn FnOnce(App) -> App>
where
    F: Fn(App, T) -> App + Clone + 'static,
    T: 'static,
{
    move |options| {
        let def = def.clone();
        Box::new(move |app| def(app, options))
    }
}

macro_rules! method_shortcuts {
    ($($name:ident => $method:ident),* $(,)?) => {$(
        #[doc = concat!("Registers a `", stringify!($method), "` route. See [`App::on`].")]
        pub fn $name(self, pattern: &str, handler: impl Handler) -> Self {
            self.on(Method::$method, pattern, handler)
        }
    )*};
}

impl App {
    pub fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    pub fn with_config(config: AppConfig) -> Self {
        Self {
            config: Arc::new(config),
            router: Router::new(),
            middleware: Arc::from(Vec::new()),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    // ── Routes ────────────────────────────────────────────────────────────────

    /// Registers a handler for a method (or [`MethodFilter::Any`]) and a
    /// pattern. Returns `self` for chaining.
    ///
    /// # Panics
    ///
    /// Panics if `pattern` is structurally invalid. Routes are registered at
    /// startup, so a typo fails fast instead of becoming a silent `404`.
    pub fn on(self, method: impl Into<MethodFilter>, pattern: &str, handler: impl Handler) -> Self {
        self.on_with(method, pattern, handler, RouteOptions::default())
    }

    /// Like [`on`](Self::on), with route middleware and meta.
    pub fn on_with(
        self,
        method: impl Into<MethodFilter>,
        pattern: &str,
        handler: impl Handler,
        options: RouteOptions,
    ) -> Self {
        let route = Route::new(method, pattern, handler)
            .unwrap_or_else(|e| panic!("{e}"))
            .with_options(options);
        self.route(route)
    }

    /// Registers a prebuilt [`Route`].
    pub fn route(mut self, route: Route) -> Self {
        self.router.add(route);
        self
    }

    /// Registers a handler for every method. Exact-method routes on the same
    /// path take precedence.
    pub fn all(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(MethodFilter::Any, pattern, handler)
    }

    method_shortcuts! {
        get     => Get,
        post    => Post,
        put     => Put,
        delete  => Delete,
        patch   => Patch,
        head    => Head,
        options => Options,
        connect => Connect,
        trace   => Trace,
    }

    // ── Middleware ────────────────────────────────────────────────────────────

    /// Appends a global middleware. Global middleware run in registration
    /// order, before any route middleware.
    pub fn middleware(self, middleware: impl Middleware) -> Self {
        self.push_layer(Layer::new(middleware))
    }

    /// Appends a global middleware that only runs for paths matching
    /// `pattern`.
    ///
    /// # Panics
    ///
    /// Panics if `pattern` is structurally invalid.
    pub fn middleware_at(self, pattern: &str, middleware: impl Middleware) -> Self {
        self.middleware_with(middleware, MiddlewareOptions::new().route(pattern))
    }

    /// Appends a global middleware restricted by `options`.
    ///
    /// # Panics
    ///
    /// Panics if the route pattern in `options` is structurally invalid.
    pub fn middleware_with(self, middleware: impl Middleware, options: MiddlewareOptions) -> Self {
        let pattern = options
            .route
            .as_deref()
            .map(|p| Pattern::parse(p).unwrap_or_else(|e| panic!("{e}")));
        let layer = Layer::new(middleware).filtered(Filter::new(pattern, options));
        self.push_layer(layer)
    }

    fn push_layer(mut self, layer: Layer) -> Self {
        let mut layers = self.middleware.to_vec();
        layers.push(layer);
        self.middleware = Arc::from(layers);
        self
    }

    // ── Composition ───────────────────────────────────────────────────────────

    /// Mounts `app` under `base`.
    ///
    /// Every route of `app` is re-registered with `base` prepended. All of its
    /// global middleware become one middleware of this app, scoped to paths
    /// under `base`, at the current position in the middleware list. Its
    /// config and hooks are not carried over.
    ///
    /// # Panics
    ///
    /// Panics if `base` is not a static path.
    pub fn mount(mut self, base: &str, app: App) -> Self {
        let base_pattern = Pattern::parse(base).unwrap_or_else(|e| panic!("{e}"));
        assert!(base_pattern.is_static(), "mount prefix `{base}` must be a static path");
        debug!(base = %base_pattern, routes = app.router.len(), "mounting app");

        let App { router, middleware, .. } = app;
        for route in router.into_routes() {
            self.router.add(route.rebased(&base_pattern));
        }
        if middleware.is_empty() {
            return self;
        }
        self.push_layer(Layer::mounted(&base_pattern, middleware.to_vec()))
    }

    /// Mounts a plain fetch handler under `base`.
    ///
    /// Every request whose path is under `base`, whatever its method, is
    /// handed to `fetch` as a fresh [`Request`] with `base` stripped from the
    /// path and the body already buffered. This app's global middleware
    /// still run first.
    ///
    /// ```rust
    /// use kite::{App, Request, Response};
    ///
    /// let app = App::new().mount_fetch("/legacy", |req: Request| async move {
    ///     Response::text(format!("legacy saw {}", req.path()))
    /// });
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if `base` is not a static path.
    pub fn mount_fetch<F, Fut>(self, base: &str, fetch: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        let base_pattern = Pattern::parse(base).unwrap_or_else(|e| panic!("{e}"));
        assert!(base_pattern.is_static(), "mount prefix `{base}` must be a static path");
        let pattern = format!("{}/**:{FORWARDED_PATH}", base_pattern.to_string().trim_end_matches('/'));
        debug!(base = %base_pattern, "mounting fetch handler");

        let fetch = Arc::new(fetch);
        self.all(&pattern, move |event: Event| {
            let fetch = Arc::clone(&fetch);
            async move {
                let request = event.forward(FORWARDED_PATH).await?;
                Ok::<_, HttpError>(fetch(request).await)
            }
        })
    }

    /// Applies a plugin.
    pub fn register(self, plugin: impl Plugin) -> Self {
        plugin.apply(self)
    }

    // ── Dispatch ──────────────────────────────────────────────────────────────

    /// Dispatches one request and returns its response.
    pub async fn fetch(&self, request: impl Into<Request>) -> Response {
        self.dispatch(Event::new(request.into())).await
    }

    /// Dispatches a bodiless `GET` for `uri`. Meant for embedding and tests.
    pub async fn request(&self, uri: &str) -> Response {
        self.request_with(uri, RequestOptions::default()).await
    }

    /// Dispatches a request for `uri` built from `options`. A URI or header
    /// that does not parse is answered with a `400`.
    pub async fn request_with(&self, uri: &str, options: RequestOptions) -> Response {
        match options.build(uri) {
            Ok((request, seeds)) => {
                let event = Event::new(request);
                for seed in seeds {
                    seed(&event);
                }
                self.dispatch(event).await
            }
            Err(err) => HttpError::bad_request("Invalid request")
                .with_cause(err)
                .render(self.config.debug),
        }
    }

    async fn dispatch(&self, event: Event) -> Response {
        let outcome = AssertUnwindSafe(self.handle(&event))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(HttpError::from_panic(panic)));
        let mut response = match outcome {
            Ok(response) => response,
            Err(err) => error::normalize(&self.config, err, &event).await,
        };

        event.commit(&mut response);
        let Some(hook) = &self.config.hooks.on_response else {
            return response;
        };
        match AssertUnwindSafe(async { hook(response, event.clone()).await }).catch_unwind().await {
            Ok(response) => response,
            Err(panic) => {
                error!(error = %HttpError::from_panic(panic), "on_response hook panicked");
                Response::fatal()
            }
        }
    }

    async fn handle(&self, event: &Event) -> Outcome {
        if let Some(hook) = &self.config.hooks.on_request {
            hook(event.clone()).await?;
        }
        let tail = match self.router.find(event.method(), event.path()) {
            Some(Match { route, params }) => {
                event.attach_route(params, Arc::clone(&route.meta));
                Tail::Route(route)
            }
            None => Tail::NotFound,
        };
        Chain::new(Arc::clone(&self.middleware), tail).run(event.clone()).await
    }
}

/// Wildcard name binding the path below a fetch mount.
const FORWARDED_PATH: &str = "forwarded";

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}
