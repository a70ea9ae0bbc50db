//! Access predicates shared by the account handlers.

use super::auth::CurrentAccount;
use super::error::ApiError;
use crate::db::Account;

/// The request acts on the caller's own account
pub fn is_self(current: &CurrentAccount, target: &Account) -> bool {
    current.account.id == target.id
}

pub fn require_self(current: &CurrentAccount, target: &Account) -> Result<(), ApiError> {
    if is_self(current, target) {
        Ok(())
    } else {
        Err(ApiError::forbidden(
            "You do not have permission to perform this action.",
        ))
    }
}
