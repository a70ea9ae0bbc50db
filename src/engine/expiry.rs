//! Unconfirmed account expiry
//!
//! Accounts that are still inactive once the confirmation grace period has
//! passed are deleted, together with their profile image files. Expired
//! sessions are purged on the same tick. Runs as a background task, or once
//! from the `sweep` subcommand.

use crate::config::AccountsConfig;
use crate::db::{self, Account, Session};
use crate::media::ImageStore;
use crate::DbPool;
use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::time::{interval, Duration};

/// Deletes accounts nobody confirmed in time
pub struct UnconfirmedAccountSweeper {
    db: DbPool,
    images: ImageStore,
    grace: chrono::Duration,
}

impl UnconfirmedAccountSweeper {
    pub fn new(db: DbPool, images: ImageStore, config: &AccountsConfig) -> Self {
        Self {
            db,
            images,
            grace: chrono::Duration::seconds(config.unconfirmed_grace_secs as i64),
        }
    }

    /// Run a single sweep as of `now`
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<SweepStats> {
        let mut stats = SweepStats::default();
        let cutoff = db::format_timestamp(now - self.grace);

        let stale = Account::stale_unconfirmed(&self.db, &cutoff).await?;
        if !stale.is_empty() {
            tracing::debug!(count = stale.len(), %cutoff, "Found unconfirmed accounts past the grace period");
        }

        for account in stale {
            // Activation may have landed since the select
            if !Account::delete_if_unconfirmed(&self.db, &account.id, &cutoff).await? {
                tracing::debug!(username = %account.username, "Account confirmed before it could expire");
                continue;
            }
            stats.accounts_removed += 1;

            if let Some(name) = &account.profile_image {
                match self.images.delete(name).await {
                    Ok(files) => stats.image_files_removed += files as u64,
                    Err(e) => {
                        tracing::warn!(
                            image = %name,
                            error = %e,
                            "Failed to remove image of expired account"
                        );
                    }
                }
            }

            tracing::info!(
                username = %account.username,
                joined = %account.date_joined,
                "Removed unconfirmed account"
            );
        }

        stats.sessions_removed = Session::delete_expired(&self.db, &db::format_timestamp(now)).await?;

        if stats.accounts_removed > 0 || stats.sessions_removed > 0 {
            tracing::info!(
                accounts = stats.accounts_removed,
                image_files = stats.image_files_removed,
                sessions = stats.sessions_removed,
                "Expiry sweep completed"
            );
        }

        Ok(stats)
    }
}

/// Statistics from a sweep
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepStats {
    pub accounts_removed: u64,
    pub image_files_removed: u64,
    pub sessions_removed: u64,
}

/// Spawn the background expiry task
pub fn spawn_expiry_task(db: DbPool, images: ImageStore, config: AccountsConfig) {
    if !config.sweep_enabled {
        tracing::info!("Unconfirmed account expiry is disabled");
        return;
    }

    let interval_secs = config.sweep_interval_secs.max(1);
    tracing::info!(
        interval_secs = interval_secs,
        grace_secs = config.unconfirmed_grace_secs,
        "Starting unconfirmed account expiry task"
    );

    let sweeper = UnconfirmedAccountSweeper::new(db, images, &config);

    tokio::spawn(async move {
        let mut tick = interval(Duration::from_secs(interval_secs));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tick.tick().await;
            if let Err(e) = sweeper.run_once(Utc::now()).await {
                tracing::error!(error = %e, "Expiry sweep failed");
            }
        }
    });
}
