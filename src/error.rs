//! Error types and the error normalizer.
//!
//! Two kinds of failure live here:
//!
//! - [`Error`]: infrastructure and configuration failures (binding a port, an
//!   invalid route pattern, a session config without a usable password).
//! - [`HttpError`]: a failure that becomes an HTTP response. Handlers build
//!   one explicitly for expected outcomes (`404`, `418`, ...). Any other
//!   `std::error::Error` converts into it with `?` and is treated as an
//!   *unhandled* `500` that keeps the original error as its cause.
//!
//! [`normalize`] is the single place where an `HttpError` is turned into a
//! [`Response`]: operator logging, the `on_error` hook, then serialization.

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use http::StatusCode;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error};

use crate::config::AppConfig;
use crate::event::Event;
use crate::response::Response;

/// The error type returned by kite's fallible operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid route pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: &'static str },

    #[error("invalid request: {0}")]
    Request(#[from] http::Error),

    #[error("invalid session config: {0}")]
    SessionConfig(&'static str),

    #[error("failed to seal session: {0}")]
    Seal(String),
}

// ── HttpError ─────────────────────────────────────────────────────────────────

type Cause = Arc<dyn StdError + Send + Sync + 'static>;

/// A failure carrying the status and message a client will see.
///
/// `HttpError` deliberately does not implement [`std::error::Error`]: that is
/// what lets every other error type convert into it through `?`.
///
/// ```rust
/// use kite::{Event, HttpError};
/// use http::StatusCode;
///
/// async fn brew(_event: Event) -> Result<&'static str, HttpError> {
///     Err(HttpError::new(StatusCode::IM_A_TEAPOT, "short and stout"))
/// }
/// ```
#[derive(Clone)]
pub struct HttpError {
    status: StatusCode,
    message: String,
    status_text: Option<String>,
    data: Option<Value>,
    cause: Option<Cause>,
    unhandled: bool,
}

impl HttpError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            status_text: None,
            data: None,
            cause: None,
            unhandled: false,
        }
    }

    /// An error whose message is the canonical reason phrase of `status`.
    pub fn from_status(status: StatusCode) -> Self {
        Self::new(status, status.canonical_reason().unwrap_or("Unknown Status"))
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// Wraps an arbitrary error as an unhandled `500`.
    pub fn unhandled<E>(cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            unhandled: true,
            cause: Some(Arc::new(cause)),
            ..Self::new(StatusCode::INTERNAL_SERVER_ERROR, String::new())
        }
        .with_message_from_cause()
    }

    pub fn with_status_text(mut self, text: impl Into<String>) -> Self {
        self.status_text = Some(text.into());
        self
    }

    /// Attaches a JSON payload that is serialized into the error body.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    /// The original failure, if this error wraps one.
    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// `true` when the error was synthesized from an unexpected failure rather
    /// than raised explicitly by application code.
    pub fn is_unhandled(&self) -> bool {
        self.unhandled
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_owned());
        Self {
            unhandled: true,
            ..Self::new(StatusCode::INTERNAL_SERVER_ERROR, format!("panicked: {detail}"))
        }
    }

    fn with_message_from_cause(mut self) -> Self {
        if let Some(cause) = &self.cause {
            self.message = cause.to_string();
        }
        self
    }

    /// The message followed by every error in the cause chain.
    fn stack(&self) -> Vec<String> {
        let mut stack = vec![self.message.clone()];
        let mut next: Option<&(dyn StdError + 'static)> = match &self.cause {
            // An unhandled error's message already is the cause's display.
            Some(cause) if self.unhandled => cause.source(),
            Some(cause) => Some(cause.as_ref() as &(dyn StdError + 'static)),
            None => None,
        };
        while let Some(err) = next {
            stack.push(format!("caused by: {err}"));
            next = err.source();
        }
        stack
    }

    pub(crate) fn render(self, debug: bool) -> Response {
        #[derive(Serialize)]
        struct Body<'a> {
            status: u16,
            message: &'a str,
            #[serde(rename = "statusText", skip_serializing_if = "Option::is_none")]
            status_text: Option<&'a str>,
            #[serde(skip_serializing_if = "Option::is_none")]
            data: Option<&'a Value>,
            #[serde(skip_serializing_if = "Option::is_none")]
            stack: Option<Vec<String>>,
        }

        // Unhandled messages come from arbitrary errors; only show them to
        // clients in debug mode.
        let message = if self.unhandled && !debug {
            self.status.canonical_reason().unwrap_or("Internal Server Error")
        } else {
            self.message.as_str()
        };
        let body = Body {
            status: self.status.as_u16(),
            message,
            status_text: self.status_text.as_deref(),
            data: self.data.as_ref(),
            stack: debug.then(|| self.stack()),
        };
        match serde_json::to_vec(&body) {
            Ok(bytes) => Response::builder().status(self.status).json(bytes),
            Err(_) => Response::fatal(),
        }
    }
}

impl<E> From<E> for HttpError
where
    E: StdError + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        Self::unhandled(err)
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status.as_u16(), self.message)
    }
}

impl fmt::Debug for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpError")
            .field("status", &self.status.as_u16())
            .field("message", &self.message)
            .field("data", &self.data)
            .field("cause", &self.cause.as_ref().map(|c| c.to_string()))
            .field("unhandled", &self.unhandled)
            .finish()
    }
}

// ── Normalizer ────────────────────────────────────────────────────────────────

/// Turns a failed request into its response.
///
/// A failure inside `on_error` (an `Err` or a panic) is terminal: the hook is
/// not called again and the client gets [`Response::fatal`].
pub(crate) async fn normalize(config: &AppConfig, error: HttpError, event: &Event) -> Response {
    if error.is_unhandled() {
        if !config.silent {
            error!(
                method = %event.method(),
                path = event.path(),
                error = %error.stack().join(": "),
                "unhandled error",
            );
        }
    } else {
        debug!(
            method = %event.method(),
            path = event.path(),
            status = error.status().as_u16(),
            message = error.message(),
            "request failed",
        );
    }

    if let Some(hook) = &config.hooks.on_error {
        let outcome = AssertUnwindSafe(hook(error.clone(), event.clone()))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(Some(response))) => return response,
            Ok(Ok(None)) => {}
            Ok(Err(failure)) => {
                error!(error = %failure, "on_error hook failed");
                return Response::fatal();
            }
            Err(panic) => {
                error!(error = %HttpError::from_panic(panic), "on_error hook panicked");
                return Response::fatal();
            }
        }
    }

    error.render(config.debug)
}
