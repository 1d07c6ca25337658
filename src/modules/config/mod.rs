//! Runtime settings for the lifecycle core, loaded from a JSON file.

use std::fs;
use std::io;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::modules::ratelimit::RateLimitConfig;
use crate::{DEFAULT_HASH_ITERATIONS, DEFAULT_TOKEN_TTL_HOURS};

/// Smallest accepted token size; anything below 128 bits is guessable.
pub const MIN_TOKEN_BYTES: usize = 16;
pub const MAX_TOKEN_BYTES: usize = 512;

/// One year. Longer TTLs are almost certainly a unit mistake.
pub const MAX_TTL_HOURS: i64 = 24 * 366;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub activation_ttl_hours: i64,
    pub password_reset_ttl_hours: i64,
    /// Random bytes per token value
    pub token_bytes: usize,
    pub hash_iterations: u32,
    pub rates: RateLimitConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            activation_ttl_hours: DEFAULT_TOKEN_TTL_HOURS,
            password_reset_ttl_hours: DEFAULT_TOKEN_TTL_HOURS,
            token_bytes: 32,
            hash_iterations: DEFAULT_HASH_ITERATIONS,
            rates: RateLimitConfig::default(),
        }
    }
}

impl CoreConfig {
    /// Load and validate the configuration at `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = match fs::read_to_string(path) {
            Ok(contents) => Self::from_json_str(&contents)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("No configuration at {}, using defaults", path.display());
                let config = Self::default();
                config.validate()?;
                config
            }
            Err(e) => return Err(e.into()),
        };
        Ok(config)
    }

    pub fn from_json_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_ttl("activation_ttl_hours", self.activation_ttl_hours)?;
        check_ttl("password_reset_ttl_hours", self.password_reset_ttl_hours)?;
        if !(MIN_TOKEN_BYTES..=MAX_TOKEN_BYTES).contains(&self.token_bytes) {
            return Err(ConfigError::invalid(
                "token_bytes",
                format!("must be between {} and {}", MIN_TOKEN_BYTES, MAX_TOKEN_BYTES),
            ));
        }
        if self.hash_iterations == 0 {
            return Err(ConfigError::invalid("hash_iterations", "must be positive"));
        }
        self.rates.validate()
    }
}

fn check_ttl(field: &'static str, hours: i64) -> Result<(), ConfigError> {
    if hours <= 0 {
        return Err(ConfigError::invalid(field, "must be positive"));
    }
    if hours > MAX_TTL_HOURS {
        return Err(ConfigError::invalid(
            field,
            format!("must not exceed {} hours", MAX_TTL_HOURS),
        ));
    }
    Ok(())
}
