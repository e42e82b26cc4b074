use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use http::StatusCode;
use kite::{App, AppConfig, Event, HttpError, RequestOptions, Response};
use serde_json::{Value, json};

#[derive(Debug, thiserror::Error)]
#[error("database unavailable")]
struct DbDown(#[source] std::io::Error);

async fn teapot(_: Event) -> Result<&'static str, HttpError> {
    Err(HttpError::new(StatusCode::IM_A_TEAPOT, "short and stout").with_data(json!({ "spout": true })))
}

async fn broken(_: Event) -> Result<&'static str, HttpError> {
    Err(DbDown(std::io::Error::other("connection refused")).into())
}

async fn boom(_: Event) -> &'static str {
    panic!("kaboom")
}

#[tokio::test]
async fn explicit_errors_keep_their_status_and_message() {
    let app = App::new().get("/tea", teapot);

    let res = app.request("/tea").await;
    assert_eq!(res.status_code(), StatusCode::IM_A_TEAPOT);
    assert_eq!(res.header("content-type"), Some("application/json"));
    let body: Value = res.parse_json().unwrap();
    assert_eq!(
        body,
        json!({ "status": 418, "message": "short and stout", "data": { "spout": true } })
    );
}

#[tokio::test]
async fn unknown_errors_are_opaque_500s() {
    let app = App::with_config(AppConfig::new().silent(true)).get("/", broken);

    let res = app.request("/").await;
    assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = res.parse_json().unwrap();
    assert_eq!(body, json!({ "status": 500, "message": "Internal Server Error" }));
}

#[tokio::test]
async fn debug_mode_exposes_the_cause_chain() {
    let config = AppConfig::new().debug(true).silent(true);
    let app = App::with_config(config).get("/", broken);

    let body: Value = app.request("/").await.parse_json().unwrap();
    assert_eq!(body["message"], "database unavailable");
    assert_eq!(
        body["stack"],
        json!(["database unavailable", "caused by: connection refused"])
    );
}

#[tokio::test]
async fn on_error_can_replace_the_response() {
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    let config = AppConfig::new().on_error(move |err, event| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            if err.status() == StatusCode::NOT_FOUND {
                return Ok(Some(Response::text(format!("no {}", event.path()))));
            }
            Ok(None)
        }
    });
    let app = App::with_config(config).get("/tea", teapot);

    let res = app.request("/missing").await;
    assert_eq!(res.body_text(), "no /missing");

    let res = app.request("/tea").await;
    assert_eq!(res.status_code(), StatusCode::IM_A_TEAPOT);
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn a_failing_error_hook_is_fatal() {
    let config = AppConfig::new()
        .silent(true)
        .on_error(|_err, _event| async { Err(HttpError::from_status(StatusCode::BAD_GATEWAY)) });
    let app = App::with_config(config).get("/tea", teapot);

    let res = app.request("/tea").await;
    assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(res.body_text(), "Internal Server Error");
}

#[tokio::test]
async fn handler_panics_become_500s() {
    let app = App::with_config(AppConfig::new().silent(true))
        .get("/boom", boom);

    let res = app.request("/boom").await;
    assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = res.parse_json().unwrap();
    assert_eq!(body["message"], "Internal Server Error");
}

#[tokio::test]
async fn on_request_failures_skip_routing() {
    let config = AppConfig::new().on_request(|event| async move {
        match event.header("authorization") {
            Some(_) => Ok(()),
            None => Err(HttpError::from_status(StatusCode::UNAUTHORIZED)),
        }
    });
    let app = App::with_config(config).get("/", |_: Event| async { "secret" });

    let res = app.request("/").await;
    assert_eq!(res.status_code(), StatusCode::UNAUTHORIZED);
    let body: Value = res.parse_json().unwrap();
    assert_eq!(body["message"], "Unauthorized");
}

#[tokio::test]
async fn staged_overrides_apply_to_successful_responses() {
    let config = AppConfig::new().on_response(|mut res, _event| async move {
        res.headers_mut().insert("x-served-by", http::HeaderValue::from_static("kite"));
        res
    });
    let app = App::with_config(config).post("/items", |event: Event| async move {
        event.set_status(StatusCode::CREATED);
        event.set_header(http::header::LOCATION, http::HeaderValue::from_static("/items/1"));
        "created"
    });

    let res = app.request_with("/items", RequestOptions::new().method(http::Method::POST)).await;
    assert_eq!(res.status_code(), StatusCode::CREATED);
    assert_eq!(res.header("location"), Some("/items/1"));
    assert_eq!(res.header("x-served-by"), Some("kite"));
}

#[tokio::test]
async fn malformed_bodies_are_bad_requests() {
    let app = App::new().post("/echo", |event: Event| async move {
        let value: Value = event.json().await?;
        Ok::<_, HttpError>(kite::Json(value))
    });

    let options = RequestOptions::new().method(http::Method::POST).body("{not json");
    assert_eq!(app.request_with("/echo", options).await.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn a_panicking_response_hook_still_yields_a_response() {
    let config = AppConfig::new().on_response(|_res, _event| async move {
        if true {
            panic!("hook blew up");
        }
        Response::text("unreachable")
    });
    let app = App::with_config(config).get("/", |_: Event| async { "fine" });

    let res = app.request("/").await;
    assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(res.body_text(), "Internal Server Error");
}

#[tokio::test]
async fn unbuildable_requests_are_bad_requests() {
    let app = App::new().get("/", |_: Event| async { "fine" });

    let res = app.request("/has space").await;
    assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);

    let options = RequestOptions::new().header("x-bad", "line\nbreak");
    let res = app.request_with("/", options).await;
    assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
}
