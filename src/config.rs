//! App configuration.
//!
//! [`AppConfig`] is built once, frozen inside the [`App`](crate::App) and
//! handed by reference to every dispatch. There is no process-wide state.
//!
//! ```rust
//! use kite::{App, AppConfig, Response};
//!
//! let config = AppConfig::new()
//!     .debug(cfg!(debug_assertions))
//!     .on_error(|err, _event| async move {
//!         // Replace the default JSON body for 404s only.
//!         if err.status() == http::StatusCode::NOT_FOUND {
//!             return Ok(Some(Response::text("nothing here")));
//!         }
//!         Ok(None)
//!     });
//! let app = App::with_config(config);
//! ```

use std::future::Future;
use std::sync::Arc;

use crate::error::HttpError;
use crate::event::Event;
use crate::handler::BoxFuture;
use crate::response::Response;

type OnRequest = Arc<dyn Fn(Event) -> BoxFuture<Result<(), HttpError>> + Send + Sync>;
type OnResponse = Arc<dyn Fn(Response, Event) -> BoxFuture<Response> + Send + Sync>;
type OnError =
    Arc<dyn Fn(HttpError, Event) -> BoxFuture<Result<Option<Response>, HttpError>> + Send + Sync>;

/// Lifecycle hooks.
#[derive(Clone, Default)]
pub(crate) struct Hooks {
    pub(crate) on_request: Option<OnRequest>,
    pub(crate) on_response: Option<OnResponse>,
    pub(crate) on_error: Option<OnError>,
}

/// Per-app settings and hooks.
#[derive(Clone, Default)]
pub struct AppConfig {
    pub(crate) debug: bool,
    pub(crate) silent: bool,
    pub(crate) hooks: Hooks,
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Include the error chain (`stack`) and the messages of unhandled errors
    /// in error bodies. Leaks internals; keep it off in production.
    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    /// Do not log unhandled errors.
    pub fn silent(mut self, enabled: bool) -> Self {
        self.silent = enabled;
        self
    }

    /// Runs before routing. An `Err` is handled like a handler failure.
    pub fn on_request<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HttpError>> + Send + 'static,
    {
        self.hooks.on_request = Some(Arc::new(move |event: Event| -> BoxFuture<Result<(), HttpError>> {
            Box::pin(hook(event))
        }));
        self
    }

    /// Runs on the final response, after staged cookies and headers have
    /// been applied. Whatever it returns is sent.
    pub fn on_response<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Response, Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        self.hooks.on_response = Some(Arc::new(move |res: Response, event: Event| -> BoxFuture<Response> {
            Box::pin(hook(res, event))
        }));
        self
    }

    /// Runs for every failed request. `Ok(Some(response))` replaces the
    /// default error body, `Ok(None)` keeps it. An `Err` is fatal for the
    /// request: the client gets a fixed `500` and the hook is not retried.
    pub fn on_error<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(HttpError, Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Response>, HttpError>> + Send + 'static,
    {
        self.hooks.on_error = Some(Arc::new(move |err: HttpError, event: Event| -> BoxFuture<Result<Option<Response>, HttpError>> {
            Box::pin(hook(err, event))
        }));
        self
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    pub fn is_silent(&self) -> bool {
        self.silent
    }
}
