use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::db::{Account, AccountResponse, NewAccount};
use crate::AppState;

use super::auth::{hash_password_for_storage, CurrentAccount};
use super::error::ApiError;
use super::forms::{validate_registration, validate_update, FormPayload, UpdateMode};
use super::permissions::require_self;

/// Look up an account by username, 404 if absent
pub(crate) async fn find_account(state: &AppState, username: &str) -> Result<Account, ApiError> {
    Account::find_by_username(&state.db, username)
        .await?
        .ok_or_else(|| ApiError::not_found("Not found."))
}

/// Remove stored image files, logging instead of failing
pub(crate) async fn discard_image(state: &AppState, name: &str) {
    if let Err(e) = state.images.delete(name).await {
        tracing::warn!(image = %name, error = %e, "Failed to remove profile image files");
    }
}

/// List all accounts
pub async fn list_accounts(
    State(state): State<Arc<AppState>>,
    _current: CurrentAccount,
) -> Result<Json<Vec<AccountResponse>>, ApiError> {
    let accounts = Account::list(&state.db).await?;
    Ok(Json(accounts.iter().map(AccountResponse::from).collect()))
}

/// Get a single account
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    _current: CurrentAccount,
    Path(username): Path<String>,
) -> Result<Json<AccountResponse>, ApiError> {
    let account = find_account(&state, &username).await?;
    Ok(Json(AccountResponse::from(account)))
}

/// Register a new, inactive account and send its confirmation email
pub async fn create_account(
    State(state): State<Arc<AppState>>,
    form: FormPayload,
) -> Result<(StatusCode, Json<AccountResponse>), ApiError> {
    let registration = validate_registration(&state.db, form).await?;

    let profile_image = match registration.profile_image {
        Some(bytes) => Some(state.images.save_profile_image(bytes).await?),
        None => None,
    };

    let password_hash = hash_password_for_storage(&registration.password).await?;

    let new = NewAccount {
        username: registration.username,
        email: registration.email,
        password_hash,
        first_name: registration.first_name,
        last_name: registration.last_name,
        phone_number: registration.phone_number,
        profile_image: profile_image.clone(),
    };

    let account = match Account::create_with_profile(&state.db, new).await {
        Ok(account) => account,
        Err(e) => {
            if let Some(name) = &profile_image {
                discard_image(&state, name).await;
            }
            return Err(e.into());
        }
    };

    let sent = match state.confirmation_tokens.make_token(&account) {
        Ok(token) => state
            .emails
            .send_confirmation(&account, &token, state.confirmation_tokens.timeout())
            .await,
        Err(e) => Err(e.into()),
    };
    if let Err(e) = sent {
        tracing::error!(username = %account.username, error = %e, "Failed to send confirmation email");
        Account::delete(&state.db, &account.id).await?;
        if let Some(name) = &profile_image {
            discard_image(&state, name).await;
        }
        return Err(ApiError::external("Failed to send the confirmation email"));
    }

    tracing::info!(username = %account.username, "Account registered");

    Ok((StatusCode::CREATED, Json(AccountResponse::from(account))))
}

/// Replace every account field (PUT)
pub async fn update_account(
    State(state): State<Arc<AppState>>,
    current: CurrentAccount,
    Path(username): Path<String>,
    form: FormPayload,
) -> Result<Json<AccountResponse>, ApiError> {
    apply_update(&state, &current, &username, form, UpdateMode::Replace).await
}

/// Change only the submitted fields (PATCH)
pub async fn partial_update_account(
    State(state): State<Arc<AppState>>,
    current: CurrentAccount,
    Path(username): Path<String>,
    form: FormPayload,
) -> Result<Json<AccountResponse>, ApiError> {
    apply_update(&state, &current, &username, form, UpdateMode::Partial).await
}

async fn apply_update(
    state: &AppState,
    current: &CurrentAccount,
    username: &str,
    form: FormPayload,
    mode: UpdateMode,
) -> Result<Json<AccountResponse>, ApiError> {
    let account = find_account(state, username).await?;
    require_self(current, &account)?;

    let mut update = validate_update(&state.db, &account, form, mode).await?;

    if let Some(bytes) = update.profile_image.take() {
        update.changes.profile_image = Some(state.images.save_profile_image(bytes).await?);
    }

    if let Err(e) = Account::apply_changes(&state.db, &account.id, &update.changes).await {
        if let Some(name) = &update.changes.profile_image {
            discard_image(state, name).await;
        }
        return Err(e.into());
    }

    // The replaced image is no longer referenced
    if let (Some(_), Some(old)) = (&update.changes.profile_image, &account.profile_image) {
        discard_image(state, old).await;
    }

    let updated = Account::find_by_id(&state.db, &account.id)
        .await?
        .ok_or_else(|| ApiError::not_found("Not found."))?;

    tracing::info!(username = %updated.username, ?mode, "Account updated");

    Ok(Json(AccountResponse::from(updated)))
}

/// Delete the caller's account
pub async fn delete_account(
    State(state): State<Arc<AppState>>,
    current: CurrentAccount,
    Path(username): Path<String>,
) -> Result<StatusCode, ApiError> {
    let account = find_account(&state, &username).await?;
    require_self(&current, &account)?;

    Account::delete(&state.db, &account.id).await?;
    if let Some(name) = &account.profile_image {
        discard_image(&state, name).await;
    }

    tracing::info!(username = %account.username, "Account deleted");

    Ok(StatusCode::NO_CONTENT)
}

/// Remove the caller's profile image
pub async fn delete_profile_image(
    State(state): State<Arc<AppState>>,
    current: CurrentAccount,
    Path(username): Path<String>,
) -> Result<StatusCode, ApiError> {
    let account = find_account(&state, &username).await?;
    require_self(&current, &account)?;

    let Some(name) = account.profile_image else {
        return Err(ApiError::bad_request("The account has no profile image"));
    };

    Account::clear_profile_image(&state.db, &account.id).await?;
    discard_image(&state, &name).await;

    Ok(StatusCode::NO_CONTENT)
}
