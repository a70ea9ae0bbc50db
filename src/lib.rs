pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod media;
pub mod notifications;
pub mod tokens;

pub use db::DbPool;

use config::Config;
use std::sync::Arc;
use std::time::Duration;

use crate::api::rate_limit::RateLimiter;
use crate::media::ImageStore;
use crate::notifications::{AccountEmails, Mailer};
use crate::tokens::{TokenGenerator, TokenPurpose};

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub emails: AccountEmails,
    pub images: ImageStore,
    pub confirmation_tokens: TokenGenerator,
    pub reset_tokens: TokenGenerator,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(config: Config, db: DbPool, mailer: Arc<dyn Mailer>) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let emails = AccountEmails::new(mailer, &config.email, &config.server);
        let images = ImageStore::new(config.media.dir.clone());
        let confirmation_tokens = TokenGenerator::new(
            &config.auth.secret_key,
            TokenPurpose::AccountConfirmation,
            Duration::from_secs(config.auth.confirmation_timeout_secs),
        );
        let reset_tokens = TokenGenerator::new(
            &config.auth.secret_key,
            TokenPurpose::PasswordReset,
            Duration::from_secs(config.auth.reset_timeout_secs),
        );
        Self {
            config,
            db,
            emails,
            images,
            confirmation_tokens,
            reset_tokens,
            rate_limiter,
        }
    }
}
