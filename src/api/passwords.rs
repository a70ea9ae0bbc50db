use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use std::sync::Arc;

use crate::db::{Account, AccountResponse, LoginResponse, Session};
use crate::tokens::TokenError;
use crate::AppState;

use super::accounts::find_account;
use super::auth::{hash_password_for_storage, start_session, CurrentAccount, MessageResponse};
use super::error::ApiError;
use super::forms::{validate_new_password, validate_reset_request, FormPayload};
use super::permissions::require_self;

/// Email a password reset link to the owner of an active account
pub async fn request_password_reset(
    State(state): State<Arc<AppState>>,
    form: FormPayload,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    let account = validate_reset_request(&state.db, &form).await?;

    let token = state.reset_tokens.make_token(&account).map_err(|e| {
        tracing::error!(error = %e, "Failed to sign password reset token");
        ApiError::internal("Failed to create the password reset link")
    })?;
    state
        .emails
        .send_password_reset(&account, &token)
        .await
        .map_err(|e| {
            tracing::error!(username = %account.username, error = %e, "Failed to send password reset email");
            ApiError::external("Failed to send the password reset email")
        })?;

    tracing::info!(username = %account.username, "Password reset requested");

    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            message: "Password reset email sent.".to_string(),
        }),
    ))
}

/// Set a new password from a reset link, then log in.
///
/// Every existing session of the account is revoked first.
pub async fn reset_password(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path((username, token)): Path<(String, String)>,
    form: FormPayload,
) -> Result<(StatusCode, CookieJar, Json<LoginResponse>), ApiError> {
    let mut account = find_account(&state, &username).await?;

    match state.reset_tokens.check_token(&account, &token) {
        Ok(()) => {}
        Err(TokenError::Key) => return Err(ApiError::internal("Failed to verify the password reset link")),
        Err(e) => {
            tracing::info!(%username, error = %e, "Rejected password reset token");
            return Err(ApiError::bad_request("The password reset link is invalid or has expired"));
        }
    }

    let password = validate_new_password(&account, &form).await?;
    let password_hash = hash_password_for_storage(&password).await?;
    Account::set_password(&state.db, &account.id, &password_hash).await?;
    account.password_hash = password_hash;

    let revoked = Session::delete_for_account(&state.db, &account.id).await?;
    tracing::info!(%username, revoked_sessions = revoked, "Password reset");

    let (token, cookie) = start_session(&state, &account).await?;

    Ok((
        StatusCode::ACCEPTED,
        jar.add(cookie),
        Json(LoginResponse {
            token,
            account: AccountResponse::from(account),
        }),
    ))
}

/// Change the caller's password, keeping only the current session
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    current: CurrentAccount,
    Path(username): Path<String>,
    form: FormPayload,
) -> Result<StatusCode, ApiError> {
    let account = find_account(&state, &username).await?;
    require_self(&current, &account)?;

    let password = validate_new_password(&account, &form).await?;
    let password_hash = hash_password_for_storage(&password).await?;
    Account::set_password(&state.db, &account.id, &password_hash).await?;

    let revoked = Session::delete_others(&state.db, &account.id, &current.session_id).await?;
    tracing::info!(%username, revoked_sessions = revoked, "Password changed");

    Ok(StatusCode::ACCEPTED)
}
