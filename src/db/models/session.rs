//! Session and login models.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use super::AccountResponse;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: String,
    pub account_id: String,
    pub token_hash: String,
    pub expires_at: String,
    pub created_at: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub account: AccountResponse,
}

impl Session {
    pub async fn create(
        pool: &SqlitePool,
        account_id: &str,
        token_hash: &str,
        expires_at: &str,
    ) -> sqlx::Result<Session> {
        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            token_hash: token_hash.to_string(),
            expires_at: expires_at.to_string(),
            created_at: crate::db::now_timestamp(),
        };

        sqlx::query(
            "INSERT INTO sessions (id, account_id, token_hash, expires_at, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&session.id)
        .bind(&session.account_id)
        .bind(&session.token_hash)
        .bind(&session.expires_at)
        .bind(&session.created_at)
        .execute(pool)
        .await?;

        Ok(session)
    }

    /// Session for `token_hash` that has not expired at `now`
    pub async fn find_valid(
        pool: &SqlitePool,
        token_hash: &str,
        now: &str,
    ) -> sqlx::Result<Option<Session>> {
        sqlx::query_as("SELECT * FROM sessions WHERE token_hash = ? AND expires_at > ?")
            .bind(token_hash)
            .bind(now)
            .fetch_optional(pool)
            .await
    }

    pub async fn delete_by_token_hash(pool: &SqlitePool, token_hash: &str) -> sqlx::Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
            .bind(token_hash)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Revoke every session of an account
    pub async fn delete_for_account(pool: &SqlitePool, account_id: &str) -> sqlx::Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE account_id = ?")
            .bind(account_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Revoke every session of an account except `keep_id`
    pub async fn delete_others(
        pool: &SqlitePool,
        account_id: &str,
        keep_id: &str,
    ) -> sqlx::Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE account_id = ? AND id != ?")
            .bind(account_id)
            .bind(keep_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_expired(pool: &SqlitePool, now: &str) -> sqlx::Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(now)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn count_for_account(pool: &SqlitePool, account_id: &str) -> sqlx::Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sessions WHERE account_id = ?")
            .bind(account_id)
            .fetch_one(pool)
            .await?;
        Ok(count)
    }
}
