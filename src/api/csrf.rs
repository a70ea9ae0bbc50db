//! Double-submit CSRF protection.
//!
//! Unsafe methods must echo the `csrftoken` cookie in the `X-CSRFToken`
//! header. Requests carrying an `Authorization` header are exempt since a
//! browser never attaches one on its own.

use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, Method, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use super::auth::CSRF_COOKIE;
use super::error::ApiError;
use crate::AppState;

pub const CSRF_HEADER: &str = "x-csrftoken";

fn is_safe(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE)
}

/// Whether the request passes the double-submit check
fn check(request: &Request<Body>) -> Result<(), &'static str> {
    if is_safe(request.method()) || request.headers().contains_key(AUTHORIZATION) {
        return Ok(());
    }

    let jar = CookieJar::from_headers(request.headers());
    let cookie = jar
        .get(CSRF_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
        .ok_or("CSRF cookie not set.")?;

    let header = request
        .headers()
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or("CSRF token missing.")?;

    if cookie.len() == header.len() && bool::from(cookie.as_bytes().ct_eq(header.as_bytes())) {
        Ok(())
    } else {
        Err("CSRF token incorrect.")
    }
}

pub async fn csrf_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !state.config.security.csrf_enabled {
        return next.run(request).await;
    }

    match check(&request) {
        Ok(()) => next.run(request).await,
        Err(reason) => {
            tracing::warn!(method = %request.method(), path = %request.uri().path(), reason, "CSRF check failed");
            ApiError::forbidden(format!("CSRF Failed: {}", reason)).into_response()
        }
    }
}
