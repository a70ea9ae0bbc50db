use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequestParts, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use rand::Rng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use super::error::{ApiError, ValidationErrorBuilder};
use crate::db::{self, Account, AccountResponse, LoginRequest, LoginResponse, Session};
use crate::AppState;

pub const SESSION_COOKIE: &str = "sessionid";
pub const CSRF_COOKIE: &str = "csrftoken";

const REQUIRED: &str = "This field is required.";
const BAD_CREDENTIALS: &str = "Unable to log in with provided credentials.";

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Hash on the blocking pool so argon2 does not stall the runtime
pub(crate) async fn hash_password_for_storage(password: &str) -> Result<String, ApiError> {
    let password = password.to_string();
    let hashed = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Password hashing task failed");
            ApiError::internal("Failed to hash password")
        })?;

    hashed.map_err(|e| {
        tracing::error!(error = %e, "Failed to hash password");
        ApiError::internal("Failed to hash password")
    })
}

/// Generate a random token
pub(crate) fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

/// Hash a token for storage
fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// An authenticated request: the account and the session it came in on
#[derive(Debug, Clone)]
pub struct CurrentAccount {
    pub account: Account,
    pub session_id: String,
}

/// Extract the session token, preferring `Authorization: Bearer` over the cookie
fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth_header) = headers.get(AUTHORIZATION).and_then(|h| h.to_str().ok()) {
        if let Some(token) = auth_header.strip_prefix("Bearer ") {
            return Some(token.trim().to_string());
        }
    }

    CookieJar::from_headers(headers)
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

/// Resolve a session token to an active account
pub async fn get_current_account(
    pool: &sqlx::SqlitePool,
    token: &str,
) -> Result<CurrentAccount, ApiError> {
    let session = Session::find_valid(pool, &hash_token(token), &db::now_timestamp())
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid or expired session"))?;

    let account = Account::find_by_id(pool, &session.account_id)
        .await?
        .filter(|a| a.is_active)
        .ok_or_else(|| ApiError::unauthorized("Invalid or expired session"))?;

    Ok(CurrentAccount {
        account,
        session_id: session.id,
    })
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentAccount {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_token(&parts.headers)
            .ok_or_else(|| ApiError::unauthorized("Authentication credentials were not provided."))?;
        get_current_account(&state.db, &token).await
    }
}

/// Record the login and open a new session for `account`.
///
/// Updating `last_login` also invalidates any confirmation or reset token
/// issued before this point.
pub(crate) async fn start_session(
    state: &AppState,
    account: &Account,
) -> Result<(String, Cookie<'static>), ApiError> {
    let now = chrono::Utc::now();
    Account::record_login(&state.db, &account.id, &db::format_timestamp(now)).await?;

    let token = generate_token();
    let expires_at = db::format_timestamp(
        now + chrono::Duration::hours(state.config.auth.session_ttl_hours.max(1)),
    );
    Session::create(&state.db, &account.id, &hash_token(&token), &expires_at).await?;

    tracing::info!(username = %account.username, "Session started");
    Ok((token.clone(), session_cookie(state, token)))
}

fn session_cookie(state: &AppState, token: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.config.auth.cookie_secure)
        .build()
}

fn clear_session_cookie() -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE).path("/").build()
}

/// Log in with username and password
pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<(CookieJar, Json<LoginResponse>), ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::from_rejection(e.status(), e.body_text()))?;

    let mut errors = ValidationErrorBuilder::new();
    let username = request.username.unwrap_or_default();
    let password = request.password.unwrap_or_default();
    if username.is_empty() {
        errors.add("username", REQUIRED);
    }
    if password.is_empty() {
        errors.add("password", REQUIRED);
    }
    errors.finish()?;

    let account = Account::find_by_username(&state.db, &username).await?;

    // Inactive accounts get the same answer as bad credentials
    let account = match account {
        Some(a) if a.is_active && verify_password(&password, &a.password_hash) => a,
        _ => {
            tracing::info!(%username, "Failed login attempt");
            return Err(ApiError::validation_field("non_field_errors", BAD_CREDENTIALS));
        }
    };

    let (token, cookie) = start_session(&state, &account).await?;

    Ok((
        jar.add(cookie),
        Json(LoginResponse {
            token,
            account: AccountResponse::from(account),
        }),
    ))
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// End the current session, if there is one
pub async fn logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Result<(CookieJar, Json<MessageResponse>), ApiError> {
    if let Some(token) = extract_token(&headers) {
        if Session::delete_by_token_hash(&state.db, &hash_token(&token)).await? {
            tracing::info!("Session ended");
        }
    }

    Ok((
        jar.remove(clear_session_cookie()),
        Json(MessageResponse {
            message: "Successfully logged out.".to_string(),
        }),
    ))
}

/// The authenticated account
pub async fn me(current: CurrentAccount) -> Json<AccountResponse> {
    Json(AccountResponse::from(current.account))
}

#[derive(Serialize)]
pub struct CsrfTokenResponse {
    pub csrf_token: String,
}

/// Issue (or repeat) the CSRF token and set its cookie
pub async fn csrf_token(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> (CookieJar, Json<CsrfTokenResponse>) {
    let token = jar
        .get(CSRF_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(generate_token);

    // Readable by scripts so they can echo it back in the header
    let cookie = Cookie::build((CSRF_COOKIE, token.clone()))
        .path("/")
        .same_site(SameSite::Lax)
        .secure(state.config.auth.cookie_secure)
        .build();

    (jar.add(cookie), Json(CsrfTokenResponse { csrf_token: token }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_password_hash_round_trip() {
        let hash = hash_password("correct-horse-battery").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct-horse-battery", &hash));
        assert!(!verify_password("wrong-horse-battery", &hash));
        assert!(!verify_password("anything", "not a phc string"));
    }

    #[test]
    fn test_generated_tokens_are_unique_hex() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
        assert_ne!(hash_token(&a), a);
    }

    #[test]
    fn test_extract_token_prefers_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        headers.insert("cookie", HeaderValue::from_static("sessionid=fromcookie"));
        assert_eq!(extract_token(&headers).as_deref(), Some("abc"));

        headers.remove(AUTHORIZATION);
        assert_eq!(extract_token(&headers).as_deref(), Some("fromcookie"));

        headers.remove("cookie");
        assert_eq!(extract_token(&headers), None);
    }
}
