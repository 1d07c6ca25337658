pub mod cache;
pub mod limiter;

pub use cache::{MemoryRateCache, RateCache, Stale, WindowUpdate};
pub use limiter::{advance, Decision, RateLimitConfig, RateLimiter, RateWindow};
