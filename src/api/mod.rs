mod accounts;
pub mod auth;
mod confirmation;
pub mod csrf;
pub mod error;
pub mod forms;
mod passwords;
pub mod permissions;
pub mod rate_limit;
pub mod validation;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, HeaderValue, Method},
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::AppState;

/// Room for the non-file parts of a multipart upload
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Credential endpoints get the stricter tier
    let limited_auth_routes = Router::new()
        .route("/login", post(auth::login).layer(never_cache()))
        .route("/password_reset", post(passwords::request_password_reset))
        .route(
            "/password_reset/:username/:token",
            put(passwords::reset_password).layer(never_cache()),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_auth,
        ));

    let auth_routes = Router::new()
        .route("/csrf_token", get(auth::csrf_token))
        .route("/logout", post(auth::logout).layer(never_cache()))
        .route("/me", get(auth::me))
        .route(
            "/confirm/:username/:token",
            get(confirmation::confirm_account).layer(never_cache()),
        )
        .merge(limited_auth_routes);

    let account_routes = Router::new()
        .route(
            "/",
            get(accounts::list_accounts).post(accounts::create_account),
        )
        .route(
            "/:username",
            get(accounts::get_account)
                .put(accounts::update_account)
                .patch(accounts::partial_update_account)
                .delete(accounts::delete_account),
        )
        .route(
            "/:username/profile_image",
            delete(accounts::delete_profile_image),
        )
        .route(
            "/:username/password",
            put(passwords::change_password).layer(never_cache()),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_api,
        ));

    let body_limit = state.config.media.max_upload_bytes + FORM_OVERHEAD_BYTES;
    let cors = cors_layer(&state.config.security.cors_allowed_origins);

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/auth", auth_routes)
        .nest("/api/accounts", account_routes)
        .nest_service("/media", ServeDir::new(state.images.root()))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            csrf::csrf_middleware,
        ))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Responses carrying credentials or session tokens must not be stored
fn never_cache() -> SetResponseHeaderLayer<HeaderValue> {
    SetResponseHeaderLayer::overriding(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate, private"),
    )
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            HeaderName::from_static(csrf::CSRF_HEADER),
        ])
}

async fn health_check() -> &'static str {
    "OK"
}
