//! # kite
//!
//! The dispatch core of a small HTTP framework: route matching, a composable
//! middleware pipeline, a per-request event context, encrypted cookie
//! sessions and one place where every failure becomes a response.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use kite::{App, Event, HttpError, Json, Server, middleware};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let api = App::new()
//!         .get("/users/:id", get_user)
//!         .post("/users", create_user);
//!
//!     let app = App::new()
//!         .middleware(middleware::trace())
//!         .mount("/api", api);
//!
//!     Server::bind("0.0.0.0:3000").serve(app).await.unwrap();
//! }
//!
//! async fn get_user(event: Event) -> Json<serde_json::Value> {
//!     Json(json!({ "id": event.param("id") }))
//! }
//!
//! async fn create_user(event: Event) -> Result<Json<serde_json::Value>, HttpError> {
//!     let user: serde_json::Value = event.json().await?;
//!     event.set_status(http::StatusCode::CREATED);
//!     Ok(Json(user))
//! }
//! ```
//!
//! ## Request lifecycle
//!
//! [`App::fetch`] creates an [`Event`], resolves the route, runs global
//! middleware, route middleware and the handler as one chain, normalizes any
//! failure through [`AppConfig::on_error`] and finally applies the status,
//! headers and cookies staged on the event. [`Server`] is a thin hyper
//! adapter around it; tests can call `fetch` directly.

mod app;
mod config;
mod cookie;
mod error;
mod event;
mod handler;
mod method;
mod request;
mod response;
mod router;
mod server;
mod session;

pub mod middleware;

pub use app::{App, Plugin, define_plugin};
pub use config::AppConfig;
pub use cookie::{CookieOptions, SameSite, SetCookie};
pub use error::{Error, HttpError};
pub use event::{Event, Meta, Params};
pub use handler::{BoxFuture, Handler};
pub use method::{Method, MethodFilter};
pub use middleware::{Flow, IntoFlow, Middleware, MiddlewareOptions, Next};
pub use request::{Request, RequestOptions};
pub use response::{ContentType, IntoResponse, Json, Outcome, Response, ResponseBuilder};
pub use router::{Match, Route, RouteOptions, Router};
pub use server::Server;
pub use session::{
    MIN_PASSWORD_LEN, Session, SessionConfig, clear_session, get_session, use_session,
};
