//! Minimal kite example: JSON endpoints, a mounted API, a session counter.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/api/users/42
//!   curl -X POST http://localhost:3000/api/users \
//!        -H 'content-type: application/json' \
//!        -d '{"name":"alice"}'
//!   curl -X DELETE http://localhost:3000/api/users/42
//!   curl -c jar -b jar http://localhost:3000/visits

use http::StatusCode;
use kite::{
    App, AppConfig, Event, HttpError, Json, Next, Outcome, Server, SessionConfig, middleware,
    use_session,
};
use serde_json::{Value, json};

const SESSION_PASSWORD: &str = "demo-only-password-change-me-in-production";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let api = App::new()
        .middleware(require_json)
        .get("/users/:id", get_user)
        .post("/users", create_user)
        .delete("/users/:id", delete_user);

    let config = AppConfig::new().debug(cfg!(debug_assertions));
    let app = App::with_config(config)
        .middleware(middleware::trace())
        .mount("/api", api)
        .get("/visits", visits);

    Server::bind("0.0.0.0:3000")
        .serve(app)
        .await
        .expect("server error");
}

// Writes must declare a JSON body.
async fn require_json(event: Event, next: Next) -> Outcome {
    let is_write = matches!(event.method().as_str(), "POST" | "PUT" | "PATCH");
    let is_json = event
        .header("content-type")
        .is_some_and(|ct| ct.starts_with("application/json"));
    if is_write && !is_json {
        return Err(HttpError::new(StatusCode::UNSUPPORTED_MEDIA_TYPE, "expected a JSON body"));
    }
    next.run().await
}

// GET /api/users/:id
async fn get_user(event: Event) -> Json<Value> {
    Json(json!({ "id": event.param("id"), "name": "alice" }))
}

// POST /api/users
async fn create_user(event: Event) -> Result<Json<Value>, HttpError> {
    let mut user: Value = event.json().await?;
    user["id"] = json!("99");
    event.set_status(StatusCode::CREATED);
    event.set_header(http::header::LOCATION, http::HeaderValue::from_static("/api/users/99"));
    Ok(Json(user))
}

// DELETE /api/users/:id → 204 No Content
async fn delete_user(_event: Event) {}

// GET /visits: counts visits in the encrypted session cookie.
async fn visits(event: Event) -> Result<Json<Value>, HttpError> {
    let config = SessionConfig::new(SESSION_PASSWORD).name("demo");
    let session = use_session(&event, &config).await?;
    let count = session.get("visits").and_then(|v| v.as_u64()).unwrap_or(0) + 1;
    session.update_with(|data| {
        data.insert("visits".into(), count.into());
    })?;
    Ok(Json(json!({ "id": session.id(), "visits": count })))
}
