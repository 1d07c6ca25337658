// First, declare the modules folder itself
mod error;
mod modules;

// Re-export everything from modules for easier access
pub use modules::{auth, config, crypto, ratelimit, storage, utils};

// Re-export commonly used types
pub use error::{ConfigError, Error, RateLimitExceeded, StoreError};
pub use modules::auth::{AccountLifecycle, Outcome, Rejection};
pub use modules::config::CoreConfig;
pub use modules::ratelimit::{Decision, RateLimiter};
pub use modules::storage::{JsonFileStore, MemoryStore, Store};

// Constants
pub const STORE_FILE: &str = "accounts.json";
pub const CONFIG_FILE: &str = "config.json";
pub const LOG_FILE: &str = "application.log";
pub const DEFAULT_TOKEN_TTL_HOURS: i64 = 24;
pub const DEFAULT_HASH_ITERATIONS: u32 = 100_000;

// Type aliases
pub type HmacSha256 = hmac::Hmac<sha2::Sha256>;
