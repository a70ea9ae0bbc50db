//! Signed, time-boxed tokens for confirmation and password reset links.
//!
//! A token is `<issued-at as base36 unix seconds>-<hex HMAC-SHA256>`. The MAC
//! covers the purpose, the issue time and the parts of the account that change
//! when a token should stop working: password hash, last login, active flag
//! and email. Nothing is stored; a token is checked by recomputing it from the
//! account's current state.

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::db::Account;

type HmacSha256 = Hmac<Sha256>;

/// Hex characters kept from the MAC (20 bytes)
const MAC_HEX_LENGTH: usize = 40;

/// Separates MAC inputs so adjacent fields cannot run into each other
const FIELD_SEPARATOR: u8 = 0x1f;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPurpose {
    AccountConfirmation,
    PasswordReset,
}

impl TokenPurpose {
    fn label(&self) -> &'static [u8] {
        match self {
            TokenPurpose::AccountConfirmation => b"accounts-api.account-confirmation",
            TokenPurpose::PasswordReset => b"accounts-api.password-reset",
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,
    #[error("token does not match the account")]
    Invalid,
    #[error("token has expired")]
    Expired,
    #[error("signing key rejected")]
    Key,
}

#[derive(Clone)]
pub struct TokenGenerator {
    secret: Vec<u8>,
    purpose: TokenPurpose,
    timeout: Duration,
}

impl std::fmt::Debug for TokenGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGenerator")
            .field("purpose", &self.purpose)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl TokenGenerator {
    pub fn new(secret: &str, purpose: TokenPurpose, timeout: Duration) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            purpose,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn make_token(&self, account: &Account) -> Result<String, TokenError> {
        self.make_token_at(account, Utc::now().timestamp())
    }

    pub fn make_token_at(&self, account: &Account, issued_at: i64) -> Result<String, TokenError> {
        let issued_at = issued_at.max(0) as u64;
        let mac = self.mac_hex(account, issued_at)?;
        Ok(format!("{}-{}", to_base36(issued_at), mac))
    }

    pub fn check_token(&self, account: &Account, token: &str) -> Result<(), TokenError> {
        self.check_token_at(account, token, Utc::now().timestamp())
    }

    pub fn check_token_at(&self, account: &Account, token: &str, now: i64) -> Result<(), TokenError> {
        let (ts_part, mac_part) = token.split_once('-').ok_or(TokenError::Malformed)?;
        let issued_at = from_base36(ts_part).ok_or(TokenError::Malformed)?;
        if mac_part.len() != MAC_HEX_LENGTH {
            return Err(TokenError::Malformed);
        }

        let expected = self.mac_hex(account, issued_at)?;
        if !bool::from(expected.as_bytes().ct_eq(mac_part.as_bytes())) {
            return Err(TokenError::Invalid);
        }

        let age = now.saturating_sub(issued_at as i64);
        if age > self.timeout.as_secs() as i64 {
            return Err(TokenError::Expired);
        }

        Ok(())
    }

    fn mac_hex(&self, account: &Account, issued_at: u64) -> Result<String, TokenError> {
        let mut mac = match <HmacSha256 as Mac>::new_from_slice(&self.secret) {
            Ok(m) => m,
            Err(_) => return Err(TokenError::Key),
        };

        let issued_at = issued_at.to_string();
        let fields: [&[u8]; 7] = [
            self.purpose.label(),
            account.id.as_bytes(),
            account.password_hash.as_bytes(),
            account.last_login.as_deref().unwrap_or("").as_bytes(),
            if account.is_active { b"1" } else { b"0" },
            account.email.as_bytes(),
            issued_at.as_bytes(),
        ];
        for field in fields {
            mac.update(field);
            mac.update(&[FIELD_SEPARATOR]);
        }

        let mut encoded = hex::encode(mac.finalize().into_bytes());
        encoded.truncate(MAC_HEX_LENGTH);
        Ok(encoded)
    }
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

fn from_base36(s: &str) -> Option<u64> {
    // Bounded so a hostile token cannot overflow the timestamp
    if s.is_empty() || s.len() > 12 {
        return None;
    }
    // One spelling per timestamp: no sign, no uppercase
    if !s.bytes().all(|b| b.is_ascii_digit() || b.is_ascii_lowercase()) {
        return None;
    }
    u64::from_str_radix(s, 36).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_780_000_000;

    fn account() -> Account {
        Account {
            id: "0b6c6f7e-2a51-4a1e-9a53-3c7f0f4d8e21".into(),
            username: "johndoe".into(),
            email: "johndoe@mail.com".into(),
            password_hash: "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA".into(),
            is_active: true,
            last_login: None,
            date_joined: "2026-01-01T00:00:00Z".into(),
            first_name: "John".into(),
            last_name: "Doe".into(),
            phone_number: 123456789,
            profile_image: None,
        }
    }

    fn reset_tokens() -> TokenGenerator {
        TokenGenerator::new("secret", TokenPurpose::PasswordReset, Duration::from_secs(3600))
    }

    #[test]
    fn test_token_round_trip() {
        let tokens = reset_tokens();
        let token = tokens.make_token_at(&account(), NOW).unwrap();
        assert!(tokens.check_token_at(&account(), &token, NOW + 10).is_ok());
    }

    #[test]
    fn test_password_change_invalidates_token() {
        let tokens = reset_tokens();
        let mut acc = account();
        let token = tokens.make_token_at(&acc, NOW).unwrap();
        acc.password_hash = "$argon2id$v=19$m=19456,t=2,p=1$b3RoZXI$bmV3".into();
        assert_eq!(tokens.check_token_at(&acc, &token, NOW), Err(TokenError::Invalid));
    }

    #[test]
    fn test_login_invalidates_token() {
        let tokens = reset_tokens();
        let mut acc = account();
        let token = tokens.make_token_at(&acc, NOW).unwrap();
        acc.last_login = Some("2026-06-01T10:00:00Z".into());
        assert_eq!(tokens.check_token_at(&acc, &token, NOW), Err(TokenError::Invalid));
    }

    #[test]
    fn test_activation_invalidates_confirmation_token() {
        let tokens = TokenGenerator::new("secret", TokenPurpose::AccountConfirmation, Duration::from_secs(900));
        let mut acc = account();
        acc.is_active = false;
        let token = tokens.make_token_at(&acc, NOW).unwrap();
        acc.is_active = true;
        assert_eq!(tokens.check_token_at(&acc, &token, NOW), Err(TokenError::Invalid));
    }

    #[test]
    fn test_expired_token() {
        let tokens = reset_tokens();
        let token = tokens.make_token_at(&account(), NOW).unwrap();
        assert!(tokens.check_token_at(&account(), &token, NOW + 3600).is_ok());
        assert_eq!(
            tokens.check_token_at(&account(), &token, NOW + 3601),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn test_tampered_token() {
        let tokens = reset_tokens();
        let token = tokens.make_token_at(&account(), NOW).unwrap();

        // Moving the timestamp forward breaks the MAC
        let (_, mac) = token.split_once('-').unwrap();
        let forged = format!("{}-{}", to_base36((NOW + 7200) as u64), mac);
        assert_eq!(tokens.check_token_at(&account(), &forged, NOW + 7200), Err(TokenError::Invalid));

        let mut flipped = token.clone().into_bytes();
        let last = flipped.len() - 1;
        flipped[last] = if flipped[last] == b'0' { b'1' } else { b'0' };
        let flipped = String::from_utf8(flipped).unwrap();
        assert_eq!(tokens.check_token_at(&account(), &flipped, NOW), Err(TokenError::Invalid));
    }

    #[test]
    fn test_purposes_are_not_interchangeable() {
        let reset = reset_tokens();
        let confirm = TokenGenerator::new("secret", TokenPurpose::AccountConfirmation, Duration::from_secs(3600));
        let token = reset.make_token_at(&account(), NOW).unwrap();
        assert_eq!(confirm.check_token_at(&account(), &token, NOW), Err(TokenError::Invalid));
    }

    #[test]
    fn test_other_secret_rejected() {
        let token = reset_tokens().make_token_at(&account(), NOW).unwrap();
        let other = TokenGenerator::new("other", TokenPurpose::PasswordReset, Duration::from_secs(3600));
        assert_eq!(other.check_token_at(&account(), &token, NOW), Err(TokenError::Invalid));
    }

    #[test]
    fn test_malformed_tokens() {
        let tokens = reset_tokens();
        for bad in ["", "no-dash-here", "abc", "zzzzzzzzzzzzzzzzz-00", "!!-0000"] {
            assert_eq!(tokens.check_token_at(&account(), bad, NOW), Err(TokenError::Malformed), "{bad}");
        }
    }

    #[test]
    fn test_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(from_base36(&to_base36(NOW as u64)), Some(NOW as u64));
        assert_eq!(from_base36(""), None);
        assert_eq!(from_base36("+abc"), None);
        assert_eq!(from_base36("ABC"), None);
        assert_eq!(from_base36("-1"), None);
    }

    #[test]
    fn test_timestamp_has_one_spelling() {
        let tokens = reset_tokens();
        let token = tokens.make_token_at(&account(), NOW).unwrap();
        assert!(tokens.check_token_at(&account(), &token, NOW).is_ok());

        let signed = format!("+{token}");
        assert_eq!(tokens.check_token_at(&account(), &signed, NOW), Err(TokenError::Malformed));

        let (ts, mac) = token.split_once('-').unwrap();
        let upper = format!("{}-{}", ts.to_ascii_uppercase(), mac);
        assert_eq!(tokens.check_token_at(&account(), &upper, NOW), Err(TokenError::Malformed));
    }
}
