//! Error taxonomy for the lifecycle core.
//!
//! Guard failures (wrong state, bad token, expired TTL) are not errors; they
//! come back as [`crate::auth::Outcome::Rejected`]. Only infrastructure and
//! startup problems are represented here.

use std::io;

use chrono::Duration;
use thiserror::Error;

use crate::modules::auth::password::PasswordError;

/// Failure of the backing store to read or write records.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("store data could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A write conflicted with existing data (e.g. duplicate email).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A thread panicked while holding the store lock.
    #[error("store lock poisoned")]
    Poisoned,

    /// Another process kept the store locked past the wait limit.
    #[error("store is locked by another process (waited {0:?})")]
    LockTimeout(std::time::Duration),
}

impl StoreError {
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}

/// Invalid or unreadable configuration, detected before serving requests.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// A request was denied by the rate limiter.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("rate limit exceeded; try again in {} minutes", whole_minutes(.retry_after))]
pub struct RateLimitExceeded {
    pub retry_after: Duration,
}

fn whole_minutes(duration: &Duration) -> i64 {
    let seconds = duration.num_seconds().max(0);
    (seconds + 59) / 60
}

/// Umbrella error for callers that drive several components at once.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    RateLimited(#[from] RateLimitExceeded),

    #[error("password rejected: {0}")]
    Password(#[from] PasswordError),

    #[error("input error: {0}")]
    Input(#[from] io::Error),
}
