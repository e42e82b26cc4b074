//! Request logging middleware.

use std::time::Instant;

use tracing::info;

use crate::event::Event;
use crate::middleware::{Middleware, Next};
use crate::response::Outcome;

/// One `info` line per request: method, path, status and latency.
///
/// Register it first so the latency covers every other middleware:
///
/// ```rust
/// use kite::{App, middleware};
///
/// let app = App::new().middleware(middleware::trace());
/// ```
///
/// Failed requests log the status they will be answered with; the error
/// itself is reported by the app's error handling.
pub fn trace() -> impl Middleware {
    |event: Event, next: Next| async move {
        let started = Instant::now();
        let outcome: Outcome = next.run().await;
        let status = match &outcome {
            Ok(res) => res.status_code(),
            Err(err) => err.status(),
        };
        info!(
            method = %event.method(),
            path = event.path(),
            status = status.as_u16(),
            latency_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX),
            "request",
        );
        outcome
    }
}
