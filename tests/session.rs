use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use http::StatusCode;
use kite::{App, Error, Event, HttpError, Json, RequestOptions, Response, SessionConfig, use_session};
use serde_json::{Map, Value, json};

const PASSWORD: &str = "1234567123456712345671234567123456712345671234567";

fn config() -> SessionConfig {
    SessionConfig::new(PASSWORD).generate_id(|| "1".to_owned())
}

fn app(config: SessionConfig) -> App {
    let read = config.clone();
    let write = config;
    App::new()
        .get("/", move |event: Event| {
            let config = read.clone();
            async move {
                let session = use_session(&event, &config).await?;
                Ok::<_, HttpError>(Json(json!({ "session": { "id": session.id(), "data": session.data() } })))
            }
        })
        .post("/", move |event: Event| {
            let config = write.clone();
            async move {
                let session = use_session(&event, &config).await?;
                let patch: Map<String, Value> = event.json().await?;
                session.update(patch)?;
                Ok::<_, HttpError>(Json(json!({ "id": session.id(), "data": session.data() })))
            }
        })
}

async fn get(app: &App, cookie: Option<&str>) -> Response {
    let mut options = RequestOptions::new();
    if let Some(cookie) = cookie {
        options = options.header("cookie", cookie);
    }
    app.request_with("/", options).await
}

async fn post(app: &App, cookie: &str, body: &'static str) -> Response {
    let options = RequestOptions::new()
        .method(http::Method::POST)
        .header("cookie", cookie)
        .header("content-type", "application/json")
        .body(body);
    app.request_with("/", options).await
}

/// `name=value` of the single `Set-Cookie` line.
fn cookie_pair(res: &Response) -> String {
    let lines = res.set_cookies();
    assert_eq!(lines.len(), 1, "{lines:?}");
    lines[0].split(';').next().unwrap().to_owned()
}

#[tokio::test]
async fn a_new_client_gets_a_session_and_one_cookie() {
    let app = app(config());

    let res = get(&app, None).await;
    assert_eq!(res.status_code(), StatusCode::OK);
    let cookie = cookie_pair(&res);
    assert!(cookie.starts_with("kite="));
    let body: Value = res.parse_json().unwrap();
    assert_eq!(body, json!({ "session": { "id": "1", "data": {} } }));
}

#[tokio::test]
async fn a_valid_cookie_is_not_rewritten() {
    let app = app(config());
    let cookie = cookie_pair(&get(&app, None).await);

    let res = get(&app, Some(&cookie)).await;
    assert!(res.set_cookies().is_empty());
    let body: Value = res.parse_json().unwrap();
    assert_eq!(body, json!({ "session": { "id": "1", "data": {} } }));
}

#[tokio::test]
async fn updates_round_trip_through_the_cookie() {
    let app = app(config());
    let cookie = cookie_pair(&get(&app, None).await);

    let res = post(&app, &cookie, r#"{"foo":"bar"}"#).await;
    let body: Value = res.parse_json().unwrap();
    assert_eq!(body, json!({ "id": "1", "data": { "foo": "bar" } }));
    let updated = cookie_pair(&res);

    let res = post(&app, &updated, r#"{"n":2}"#).await;
    let body: Value = res.parse_json().unwrap();
    assert_eq!(body, json!({ "id": "1", "data": { "foo": "bar", "n": 2 } }));
    let updated = cookie_pair(&res);

    let body: Value = get(&app, Some(&updated)).await.parse_json().unwrap();
    assert_eq!(body, json!({ "session": { "id": "1", "data": { "foo": "bar", "n": 2 } } }));
}

#[tokio::test]
async fn repeated_updates_send_one_cookie_with_the_last_state() {
    let write = config();
    let writer = App::new().get("/", move |event: Event| {
        let config = write.clone();
        async move {
            let session = use_session(&event, &config).await?;
            let first: Map<String, Value> = serde_json::from_value(json!({ "a": 1, "b": 1 })).unwrap();
            let second: Map<String, Value> = serde_json::from_value(json!({ "b": 2 })).unwrap();
            session.update(first)?;
            session.update(second)?;
            Ok::<_, HttpError>(session.id().to_owned())
        }
    });

    // A brand-new session stages a cookie on creation and again per update.
    let res = get(&writer, None).await;
    assert_eq!(res.body_text(), "1");
    let cookie = cookie_pair(&res);

    let reader = app(config());
    let body: Value = get(&reader, Some(&cookie)).await.parse_json().unwrap();
    assert_eq!(body, json!({ "session": { "id": "1", "data": { "a": 1, "b": 2 } } }));
}

#[tokio::test]
async fn forged_cookies_start_a_fresh_session() {
    let ids = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ids);
    let config = SessionConfig::new(PASSWORD).generate_id(move || {
        (counter.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    });
    let app = app(config);

    let res = get(&app, Some("kite=v1.AAAA.AAAA.AAAA")).await;
    assert_eq!(res.status_code(), StatusCode::OK);
    let body: Value = res.parse_json().unwrap();
    assert_eq!(body["session"]["id"], "1");
    assert_eq!(res.set_cookies().len(), 1);
}

#[tokio::test]
async fn concurrent_access_initializes_once() {
    let ids = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ids);
    let config = SessionConfig::new(PASSWORD).generate_id(move || {
        (counter.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    });

    let app = App::new().get("/", move |event: Event| {
        let config = config.clone();
        async move {
            let (a, b, c) = tokio::join!(
                use_session(&event, &config),
                use_session(&event, &config),
                use_session(&event, &config),
            );
            let ids: Vec<String> = [a?, b?, c?].iter().map(|s| s.id().to_owned()).collect();
            Ok::<_, HttpError>(Json(ids))
        }
    });

    let res = get(&app, None).await;
    let body: Value = res.parse_json().unwrap();
    assert_eq!(body, json!(["1", "1", "1"]));
    assert_eq!(ids.load(Ordering::SeqCst), 1);
    assert_eq!(res.set_cookies().len(), 1);
}

#[tokio::test]
async fn the_session_header_is_an_alternate_source() {
    let app = app(config().session_header(true));
    let cookie = cookie_pair(&get(&app, None).await);
    let cookie = post(&app, &cookie, r#"{"via":"header"}"#).await;
    let token = cookie_pair(&cookie).trim_start_matches("kite=").to_owned();

    let options = RequestOptions::new().header("x-kite-session-kite", token);
    let body: Value = app.request_with("/", options).await.parse_json().unwrap();
    assert_eq!(body["session"]["data"], json!({ "via": "header" }));
}

#[tokio::test]
async fn a_short_password_is_a_config_error() {
    let event_config = SessionConfig::new("short");
    let app = App::new().get("/", move |event: Event| {
        let config = event_config.clone();
        async move {
            match use_session(&event, &config).await {
                Err(Error::SessionConfig(reason)) => reason.to_owned(),
                other => format!("unexpected: {other:?}"),
            }
        }
    });

    assert_eq!(app.request("/").await.body_text(), "password must be at least 32 characters");
}

#[tokio::test]
async fn session_config_errors_surface_as_500s() {
    let app = App::with_config(kite::AppConfig::new().silent(true))
        .register(|app: App| {
            let config = SessionConfig::new("short");
            app.get("/", move |event: Event| {
                let config = config.clone();
                async move { use_session(&event, &config).await.map(|s| s.id().to_owned()) }
            })
        });

    assert_eq!(app.request("/").await.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
}
