use accounts_api::api::create_router;
use accounts_api::config::Config;
use accounts_api::db;
use accounts_api::notifications::{Mailer, MemoryMailer, OutgoingEmail};
use accounts_api::AppState;
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

pub const PUBLIC_URL: &str = "http://testserver";
pub const PASSWORD: &str = "Str0ng!Passw0rd#";

/// A router wired to an in-memory database, a temporary media directory
/// and an in-memory mailer.
#[allow(dead_code)]
pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub mailer: Arc<MemoryMailer>,
    pub media: TempDir,
}

/// Rejects every message
pub struct FailingMailer;

#[async_trait]
impl Mailer for FailingMailer {
    async fn send(&self, _email: &OutgoingEmail) -> anyhow::Result<()> {
        anyhow::bail!("SMTP relay unavailable")
    }
}

/// Defaults for tests: CSRF and rate limiting off, fixed secret
#[allow(dead_code)]
pub fn test_config(media: &TempDir) -> Config {
    let mut config = Config::default();
    config.server.public_url = PUBLIC_URL.to_string();
    config.auth.secret_key = "test-secret-key".to_string();
    config.media.dir = media.path().to_path_buf();
    config.security.csrf_enabled = false;
    config.rate_limit.enabled = false;
    config
}

#[allow(dead_code)]
pub async fn create_test_app() -> TestApp {
    create_test_app_with(|_| {}).await
}

/// Build a test app after letting `customize` adjust the config
#[allow(dead_code)]
pub async fn create_test_app_with(customize: impl FnOnce(&mut Config)) -> TestApp {
    let media = tempfile::tempdir().expect("Failed to create media dir");
    let mut config = test_config(&media);
    customize(&mut config);

    let pool = db::init_in_memory().await.expect("Failed to create test database");
    let mailer = Arc::new(MemoryMailer::new());
    let state = Arc::new(AppState::new(config, pool, mailer.clone()));

    TestApp {
        router: create_router(state.clone()),
        state,
        mailer,
        media,
    }
}

/// Build a test app whose mailer always fails
#[allow(dead_code)]
pub async fn create_test_app_failing_mail() -> TestApp {
    let media = tempfile::tempdir().expect("Failed to create media dir");
    let config = test_config(&media);
    let pool = db::init_in_memory().await.expect("Failed to create test database");
    let state = Arc::new(AppState::new(config, pool, Arc::new(FailingMailer)));

    TestApp {
        router: create_router(state.clone()),
        state,
        mailer: Arc::new(MemoryMailer::new()),
        media,
    }
}

/// A JSON request, optionally authenticated with a bearer token
#[allow(dead_code)]
pub fn json_request(method: Method, uri: &str, body: Option<Value>, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Send a request and decode the JSON body (`Value::Null` when empty)
#[allow(dead_code)]
pub async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, headers, body)
}

#[allow(dead_code)]
pub fn registration_body(username: &str, phone_number: i64) -> Value {
    json!({
        "username": username,
        "email": format!("{username}@mail.com"),
        "first_name": "John",
        "last_name": "Doe",
        "phone_number": phone_number,
        "password": {
            "password": PASSWORD,
            "password_confirm": PASSWORD,
        },
    })
}

/// Register `username`, asserting success
#[allow(dead_code)]
pub async fn register(app: &TestApp, username: &str, phone_number: i64) -> Value {
    let request = json_request(
        Method::POST,
        "/api/accounts",
        Some(registration_body(username, phone_number)),
        None,
    );
    let (status, _, body) = send(app, request).await;
    assert_eq!(status, StatusCode::CREATED, "registration failed: {body}");
    body
}

/// Path (without host) of the last emailed link starting with `prefix`
#[allow(dead_code)]
pub fn last_link(app: &TestApp, to: &str, prefix: &str) -> String {
    let email = app
        .mailer
        .outbox()
        .into_iter()
        .rev()
        .find(|e| e.to == to)
        .unwrap_or_else(|| panic!("no email sent to {to}"));
    let start = email
        .text_body
        .find(&format!("{PUBLIC_URL}{prefix}"))
        .unwrap_or_else(|| panic!("no {prefix} link in email"));
    email.text_body[start + PUBLIC_URL.len()..]
        .split_whitespace()
        .next()
        .unwrap()
        .to_string()
}

/// Follow the confirmation link for `username`, returning the session token
#[allow(dead_code)]
pub async fn confirm(app: &TestApp, username: &str) -> String {
    let link = last_link(app, &format!("{username}@mail.com"), "/api/auth/confirm/");
    let (status, _, body) = send(app, json_request(Method::GET, &link, None, None)).await;
    assert_eq!(status, StatusCode::OK, "confirmation failed: {body}");
    body["token"].as_str().unwrap().to_string()
}

#[allow(dead_code)]
pub async fn login(app: &TestApp, username: &str, password: &str) -> (StatusCode, HeaderMap, Value) {
    let request = json_request(
        Method::POST,
        "/api/auth/login",
        Some(json!({ "username": username, "password": password })),
        None,
    );
    send(app, request).await
}

/// Register and confirm `username`, returning a session token
#[allow(dead_code)]
pub async fn active_account(app: &TestApp, username: &str, phone_number: i64) -> String {
    register(app, username, phone_number).await;
    confirm(app, username).await
}

/// Multipart body with text fields and an optional `profile_image` file
#[allow(dead_code)]
pub fn multipart_request(
    method: Method,
    uri: &str,
    fields: &[(&str, &str)],
    image: Option<&[u8]>,
    token: Option<&str>,
) -> Request<Body> {
    const BOUNDARY: &str = "X-TEST-BOUNDARY";
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                .as_bytes(),
        );
    }
    if let Some(image) = image {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"profile_image\"; filename=\"avatar.png\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(image);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"));
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body)).unwrap()
}

/// A tiny valid PNG
#[allow(dead_code)]
pub fn png_bytes() -> Vec<u8> {
    let img = image::RgbImage::new(2, 2);
    let mut out = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}
