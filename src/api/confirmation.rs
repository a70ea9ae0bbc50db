use axum::{
    extract::{Path, State},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use std::sync::Arc;

use crate::db::{Account, AccountResponse, LoginResponse};
use crate::tokens::TokenError;
use crate::AppState;

use super::accounts::find_account;
use super::auth::start_session;
use super::error::ApiError;

/// Activate an account from its emailed link and log it in.
///
/// Each link works once: an active account is refused, and activating it
/// changes the state the token was derived from.
pub async fn confirm_account(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path((username, token)): Path<(String, String)>,
) -> Result<(CookieJar, Json<LoginResponse>), ApiError> {
    let mut account = find_account(&state, &username).await?;

    if account.is_active {
        return Err(ApiError::bad_request("This account is already active"));
    }

    if let Err(e) = state.confirmation_tokens.check_token(&account, &token) {
        tracing::info!(%username, error = %e, "Rejected confirmation token");
        return Err(match e {
            TokenError::Expired => ApiError::bad_request("The confirmation link has expired"),
            TokenError::Malformed | TokenError::Invalid => {
                ApiError::bad_request("The confirmation link is invalid")
            }
            TokenError::Key => ApiError::internal("Failed to verify the confirmation link"),
        });
    }

    // Loses to a concurrent sweep or a second click
    if !Account::activate(&state.db, &account.id).await? {
        return Err(ApiError::bad_request("The confirmation link is invalid"));
    }
    account.is_active = true;

    tracing::info!(%username, "Account confirmed");

    let (token, cookie) = start_session(&state, &account).await?;

    Ok((
        jar.add(cookie),
        Json(LoginResponse {
            token,
            account: AccountResponse::from(account),
        }),
    ))
}
