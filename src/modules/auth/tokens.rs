use std::fmt;
use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use super::account::AccountId;
use super::expiry::ExpiryPolicy;
use crate::error::StoreError;
use crate::modules::crypto::{constant_time_eq, random_bytes};
use crate::modules::storage::{Store, StoreExt, Txn};
use crate::modules::utils::time::Clock;

/// What a token authorizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    Activation,
    PasswordReset,
}

impl fmt::Display for TokenPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TokenPurpose::Activation => "activation",
            TokenPurpose::PasswordReset => "password_reset",
        })
    }
}

/// Single-use credential tied to one account and one purpose
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub subject_id: AccountId,
    pub purpose: TokenPurpose,
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub ttl_hours: i64,
    pub expires_at: DateTime<Utc>,
}

// Keep token values out of logs and panic messages
impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("subject_id", &self.subject_id)
            .field("purpose", &self.purpose)
            .field("value", &"<redacted>")
            .field("created_at", &self.created_at)
            .field("ttl_hours", &self.ttl_hours)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Token {
    pub fn matches(&self, presented: &str) -> bool {
        constant_time_eq(self.value.as_bytes(), presented.as_bytes())
    }

    /// Whether the token is still inside the TTL it was issued with
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now <= self.expires_at
    }
}

/// Result of checking a presented token against the stored one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCheck {
    Valid,
    Missing,
    Mismatch,
    Expired,
}

/// Pure token check: presence, value equality, then TTL measured from `created_at`.
pub fn check_token(
    stored: Option<&Token>,
    presented: &str,
    ttl_hours: i64,
    now: DateTime<Utc>,
) -> TokenCheck {
    match stored {
        None => TokenCheck::Missing,
        Some(token) if !token.matches(presented) => TokenCheck::Mismatch,
        Some(token) if !ExpiryPolicy::new(ttl_hours).is_valid(token.created_at, now) => {
            TokenCheck::Expired
        }
        Some(_) => TokenCheck::Valid,
    }
}

/// Source of opaque, unguessable token values
pub trait TokenGenerator: Send + Sync {
    fn generate(&self, length_bits: usize) -> String;
}

/// OS-CSPRNG bytes, URL-safe base64 without padding
#[derive(Debug, Default, Clone, Copy)]
pub struct SecureTokenGenerator;

impl TokenGenerator for SecureTokenGenerator {
    fn generate(&self, length_bits: usize) -> String {
        let len = length_bits.div_ceil(8);
        URL_SAFE_NO_PAD.encode(random_bytes(len))
    }
}

/// Issues, checks and invalidates purpose-scoped tokens.
///
/// At most one token is kept per (subject, purpose); issuing again replaces
/// the previous value.
#[derive(Clone)]
pub struct TokenStore {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    generator: Arc<dyn TokenGenerator>,
    token_bits: usize,
}

impl TokenStore {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        generator: Arc<dyn TokenGenerator>,
        token_bytes: usize,
    ) -> Self {
        Self {
            store,
            clock,
            generator,
            token_bits: token_bytes.saturating_mul(8),
        }
    }

    /// Build a new token value without persisting it
    pub(crate) fn mint(
        &self,
        subject_id: AccountId,
        purpose: TokenPurpose,
        ttl_hours: i64,
        now: DateTime<Utc>,
    ) -> Token {
        Token {
            subject_id,
            purpose,
            value: self.generator.generate(self.token_bits),
            created_at: now,
            ttl_hours,
            expires_at: ExpiryPolicy::new(ttl_hours).expires_at(now),
        }
    }

    pub fn issue(
        &self,
        subject_id: AccountId,
        purpose: TokenPurpose,
        ttl_hours: i64,
    ) -> Result<Token, StoreError> {
        let token = self.mint(subject_id, purpose, ttl_hours, self.clock.now());
        let superseded = self.store.write(|records| {
            let previous = records.put_token(token.clone());
            Txn::Commit(previous.is_some())
        })?;
        if superseded {
            debug!("Superseded {} token for subject {}", purpose, subject_id);
        }
        Ok(token)
    }

    pub fn validate(
        &self,
        subject_id: AccountId,
        purpose: TokenPurpose,
        presented: &str,
        ttl_hours: i64,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now();
        self.store.read(|records| {
            check_token(records.token(subject_id, purpose), presented, ttl_hours, now)
                == TokenCheck::Valid
        })
    }

    /// Clear the stored token. Returns whether one existed; no write happens otherwise.
    pub fn invalidate(&self, subject_id: AccountId, purpose: TokenPurpose) -> Result<bool, StoreError> {
        self.store.write(|records| match records.take_token(subject_id, purpose) {
            Some(_) => Txn::Commit(true),
            None => Txn::Rollback(false),
        })
    }

    /// Owner of a live token with this value, for links that carry only the token
    pub fn subject_for(
        &self,
        purpose: TokenPurpose,
        value: &str,
    ) -> Result<Option<AccountId>, StoreError> {
        let now = self.clock.now();
        self.store.read(|records| {
            records
                .token_by_value(purpose, value)
                .filter(|token| token.is_live(now))
                .map(|token| token.subject_id)
        })
    }

    /// Tokens that have not passed their `expires_at`, optionally for one purpose
    pub fn live_tokens(&self, purpose: Option<TokenPurpose>) -> Result<Vec<Token>, StoreError> {
        let now = self.clock.now();
        self.store.read(|records| {
            records
                .tokens()
                .iter()
                .filter(|token| purpose.map_or(true, |p| token.purpose == p))
                .filter(|token| token.is_live(now))
                .cloned()
                .collect()
        })
    }

    /// Drop every token past its `expires_at`; returns how many were removed
    pub fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = self.clock.now();
        self.store.write(|records| {
            let removed = records.retain_tokens(|token| token.is_live(now));
            if removed > 0 {
                Txn::Commit(removed)
            } else {
                Txn::Rollback(0)
            }
        })
    }
}
