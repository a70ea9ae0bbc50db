//! Account and profile models.
//!
//! Every account row has exactly one profile row. Both are written together
//! by [`Account::create_with_profile`] and read back as one joined record.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};

use crate::db::now_timestamp;

const ACCOUNT_SELECT: &str = r#"
    SELECT a.id, a.username, a.email, a.password_hash, a.is_active, a.last_login, a.date_joined,
           p.first_name, p.last_name, p.phone_number, p.profile_image
    FROM accounts a
    JOIN profiles p ON p.account_id = a.id
"#;

/// An account joined with its profile.
///
/// Holds the password hash, so it is never serialized directly; responses
/// go through [`AccountResponse`].
#[derive(Debug, Clone, FromRow)]
pub struct Account {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub is_active: bool,
    pub last_login: Option<String>,
    pub date_joined: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: i64,
    pub profile_image: Option<String>,
}

/// Public representation of an account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountResponse {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: i64,
    pub profile_image: String,
    pub date_joined: String,
}

impl From<&Account> for AccountResponse {
    fn from(account: &Account) -> Self {
        Self {
            username: account.username.clone(),
            first_name: account.first_name.clone(),
            last_name: account.last_name.clone(),
            email: account.email.clone(),
            phone_number: account.phone_number,
            profile_image: account.profile_image.clone().unwrap_or_default(),
            date_joined: account.date_joined.clone(),
        }
    }
}

impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        Self::from(&account)
    }
}

/// Validated data for a new account
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: i64,
    pub profile_image: Option<String>,
}

/// Validated changes to an existing account; `None` leaves a field untouched
#[derive(Debug, Clone, Default)]
pub struct AccountChanges {
    pub username: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<i64>,
    pub profile_image: Option<String>,
}

impl AccountChanges {
    fn touches_account(&self) -> bool {
        self.username.is_some() || self.email.is_some()
    }

    fn touches_profile(&self) -> bool {
        self.first_name.is_some()
            || self.last_name.is_some()
            || self.phone_number.is_some()
            || self.profile_image.is_some()
    }
}

/// Fields that must be unique across all accounts, active or not
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Username,
    Email,
    PhoneNumber,
}

impl UniqueField {
    fn column(&self) -> &'static str {
        match self {
            UniqueField::Username => "a.username",
            UniqueField::Email => "a.email",
            UniqueField::PhoneNumber => "p.phone_number",
        }
    }
}

impl Account {
    pub async fn find_by_username(
        pool: &SqlitePool,
        username: &str,
    ) -> sqlx::Result<Option<Account>> {
        sqlx::query_as::<_, Account>(&format!("{ACCOUNT_SELECT} WHERE a.username = ?"))
            .bind(username)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> sqlx::Result<Option<Account>> {
        sqlx::query_as::<_, Account>(&format!("{ACCOUNT_SELECT} WHERE a.id = ?"))
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_email(pool: &SqlitePool, email: &str) -> sqlx::Result<Option<Account>> {
        sqlx::query_as::<_, Account>(&format!("{ACCOUNT_SELECT} WHERE a.email = ?"))
            .bind(email)
            .fetch_optional(pool)
            .await
    }

    pub async fn list(pool: &SqlitePool) -> sqlx::Result<Vec<Account>> {
        sqlx::query_as::<_, Account>(&format!(
            "{ACCOUNT_SELECT} ORDER BY a.date_joined, a.username"
        ))
        .fetch_all(pool)
        .await
    }

    /// Whether `value` is already used by an account other than `exclude_id`
    pub async fn is_taken(
        pool: &SqlitePool,
        field: UniqueField,
        value: &str,
        exclude_id: Option<&str>,
    ) -> sqlx::Result<bool> {
        let sql = format!(
            "SELECT COUNT(*) FROM accounts a JOIN profiles p ON p.account_id = a.id \
             WHERE {} = ? AND a.id != ?",
            field.column()
        );
        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        query = match field {
            UniqueField::PhoneNumber => query.bind(value.parse::<i64>().unwrap_or(-1)),
            _ => query.bind(value),
        };
        let count = query
            .bind(exclude_id.unwrap_or(""))
            .fetch_one(pool)
            .await?;
        Ok(count > 0)
    }

    /// Insert an inactive account and its profile in one transaction
    pub async fn create_with_profile(
        pool: &SqlitePool,
        new: NewAccount,
    ) -> sqlx::Result<Account> {
        let id = uuid::Uuid::new_v4().to_string();
        let date_joined = now_timestamp();

        let mut tx = pool.begin().await?;

        sqlx::query(
            "INSERT INTO accounts (id, username, email, password_hash, is_active, date_joined) \
             VALUES (?, ?, ?, ?, 0, ?)",
        )
        .bind(&id)
        .bind(&new.username)
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(&date_joined)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO profiles (account_id, first_name, last_name, phone_number, profile_image) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&new.first_name)
        .bind(&new.last_name)
        .bind(new.phone_number)
        .bind(&new.profile_image)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Account {
            id,
            username: new.username,
            email: new.email,
            password_hash: new.password_hash,
            is_active: false,
            last_login: None,
            date_joined,
            first_name: new.first_name,
            last_name: new.last_name,
            phone_number: new.phone_number,
            profile_image: new.profile_image,
        })
    }

    /// Apply the provided fields of `changes` to account `id`
    pub async fn apply_changes(
        pool: &SqlitePool,
        id: &str,
        changes: &AccountChanges,
    ) -> sqlx::Result<()> {
        let mut tx = pool.begin().await?;

        if changes.touches_account() {
            let mut qb = QueryBuilder::<Sqlite>::new("UPDATE accounts SET ");
            let mut set = qb.separated(", ");
            if let Some(username) = &changes.username {
                set.push("username = ");
                set.push_bind_unseparated(username.clone());
            }
            if let Some(email) = &changes.email {
                set.push("email = ");
                set.push_bind_unseparated(email.clone());
            }
            qb.push(" WHERE id = ");
            qb.push_bind(id.to_string());
            qb.build().execute(&mut *tx).await?;
        }

        if changes.touches_profile() {
            let mut qb = QueryBuilder::<Sqlite>::new("UPDATE profiles SET ");
            let mut set = qb.separated(", ");
            if let Some(first_name) = &changes.first_name {
                set.push("first_name = ");
                set.push_bind_unseparated(first_name.clone());
            }
            if let Some(last_name) = &changes.last_name {
                set.push("last_name = ");
                set.push_bind_unseparated(last_name.clone());
            }
            if let Some(phone_number) = changes.phone_number {
                set.push("phone_number = ");
                set.push_bind_unseparated(phone_number);
            }
            if let Some(image) = &changes.profile_image {
                set.push("profile_image = ");
                set.push_bind_unseparated(image.clone());
            }
            qb.push(" WHERE account_id = ");
            qb.push_bind(id.to_string());
            qb.build().execute(&mut *tx).await?;
        }

        tx.commit().await
    }

    pub async fn set_password(pool: &SqlitePool, id: &str, password_hash: &str) -> sqlx::Result<()> {
        sqlx::query("UPDATE accounts SET password_hash = ? WHERE id = ?")
            .bind(password_hash)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn clear_profile_image(pool: &SqlitePool, id: &str) -> sqlx::Result<()> {
        sqlx::query("UPDATE profiles SET profile_image = NULL WHERE account_id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Flip an inactive account to active. Returns false when the account
    /// is already active or no longer exists (e.g. swept concurrently).
    pub async fn activate(pool: &SqlitePool, id: &str) -> sqlx::Result<bool> {
        let result = sqlx::query("UPDATE accounts SET is_active = 1 WHERE id = ? AND is_active = 0")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn record_login(pool: &SqlitePool, id: &str, at: &str) -> sqlx::Result<()> {
        sqlx::query("UPDATE accounts SET last_login = ? WHERE id = ?")
            .bind(at)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Delete the account; profile and sessions go with it (cascade)
    pub async fn delete(pool: &SqlitePool, id: &str) -> sqlx::Result<bool> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Inactive accounts that joined before `cutoff`
    pub async fn stale_unconfirmed(pool: &SqlitePool, cutoff: &str) -> sqlx::Result<Vec<Account>> {
        sqlx::query_as::<_, Account>(&format!(
            "{ACCOUNT_SELECT} WHERE a.is_active = 0 AND a.date_joined < ? ORDER BY a.date_joined"
        ))
        .bind(cutoff)
        .fetch_all(pool)
        .await
    }

    /// Delete the account only if it is still inactive and joined before
    /// `cutoff`. A confirmation that lands first makes this a no-op.
    pub async fn delete_if_unconfirmed(
        pool: &SqlitePool,
        id: &str,
        cutoff: &str,
    ) -> sqlx::Result<bool> {
        let result = sqlx::query(
            "DELETE FROM accounts WHERE id = ? AND is_active = 0 AND date_joined < ?",
        )
        .bind(id)
        .bind(cutoff)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
