use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::cache::{RateCache, Stale, WindowUpdate};
use crate::error::{ConfigError, RateLimitExceeded, StoreError};
use crate::modules::utils::logging::format_sensitive;
use crate::modules::utils::time::Clock;

/// Admission control settings.
///
/// Defaults: more than 10 requests to the same route within one minute puts
/// the client into a 10 minute ban.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Count each route separately instead of one budget per client
    pub per_route: bool,
    pub limit: i64,
    pub period_minutes: i64,
    pub ban_timeout_minutes: i64,
    /// Namespace prefix for cache keys
    pub tag: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            per_route: true,
            limit: 10,
            period_minutes: 1,
            ban_timeout_minutes: 10,
            tag: "xrate".to_string(),
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limit <= 0 || self.limit > i64::from(u32::MAX) {
            return Err(ConfigError::invalid("rates.limit", "must be between 1 and 4294967295"));
        }
        if self.period_minutes <= 0 {
            return Err(ConfigError::invalid("rates.period_minutes", "must be positive"));
        }
        if self.ban_timeout_minutes <= 0 {
            return Err(ConfigError::invalid("rates.ban_timeout_minutes", "must be positive"));
        }
        if Duration::try_minutes(self.period_minutes).is_none()
            || Duration::try_minutes(self.ban_timeout_minutes).is_none()
        {
            return Err(ConfigError::invalid("rates", "period or timeout is out of range"));
        }
        if self.tag.trim().is_empty() {
            return Err(ConfigError::invalid("rates.tag", "must not be empty"));
        }
        Ok(())
    }

    fn period(&self) -> Duration {
        Duration::try_minutes(self.period_minutes).unwrap_or(Duration::MAX)
    }

    fn ban_timeout(&self) -> Duration {
        Duration::try_minutes(self.ban_timeout_minutes).unwrap_or(Duration::MAX)
    }
}

/// Request counter for one cache key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateWindow {
    pub key: String,
    pub count: u32,
    pub window_start: DateTime<Utc>,
    pub banned_until: Option<DateTime<Utc>>,
}

impl RateWindow {
    fn open(key: &str, now: DateTime<Utc>) -> Self {
        Self {
            key: key.to_string(),
            count: 0,
            window_start: now,
            banned_until: None,
        }
    }

    pub fn is_banned(&self, now: DateTime<Utc>) -> bool {
        self.banned_until.map_or(false, |until| now < until)
    }

    /// Whether the next request would start a fresh window anyway: the ban
    /// has run out, or there was no ban and the period has passed.
    pub fn is_stale(&self, config: &RateLimitConfig, now: DateTime<Utc>) -> bool {
        match self.banned_until {
            Some(until) => now >= until,
            None => now - self.window_start > config.period(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny { retry_after: Duration },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn into_result(self) -> Result<(), RateLimitExceeded> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny { retry_after } => Err(RateLimitExceeded { retry_after }),
        }
    }
}

/// Fixed-window counting step for one request.
///
/// An active ban denies with the remaining ban time and leaves the window
/// alone. A window whose period has elapsed, or whose ban has run out, starts
/// over. Exceeding `limit` inside a window bans the key for the timeout.
pub fn advance(
    current: Option<RateWindow>,
    key: &str,
    config: &RateLimitConfig,
    now: DateTime<Utc>,
) -> (RateWindow, Decision) {
    let mut window = match current {
        Some(window) if window.is_banned(now) => {
            let retry_after = window
                .banned_until
                .map_or(Duration::zero(), |until| until - now);
            return (window, Decision::Deny { retry_after });
        }
        Some(window)
            if window.banned_until.is_none() && now - window.window_start <= config.period() =>
        {
            window
        }
        _ => RateWindow::open(key, now),
    };

    window.count = window.count.saturating_add(1);
    if i64::from(window.count) > config.limit {
        let timeout = config.ban_timeout();
        window.banned_until = Some(now.checked_add_signed(timeout).unwrap_or(DateTime::<Utc>::MAX_UTC));
        return (window, Decision::Deny { retry_after: timeout });
    }
    (window, Decision::Allow)
}

/// Per-client (and optionally per-route) request guard.
///
/// Stale windows are swept from the cache at most once per period, in the
/// same atomic step as the request that triggers the sweep.
#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    cache: Arc<dyn RateCache>,
    clock: Arc<dyn Clock>,
    next_sweep: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl RateLimiter {
    pub fn new(
        config: RateLimitConfig,
        cache: Arc<dyn RateCache>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            cache,
            clock,
            next_sweep: Arc::new(Mutex::new(None)),
        })
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn key_for(&self, client_key: &str, route_key: &str) -> String {
        if self.config.per_route {
            format!("{}:{}:{}", self.config.tag, client_key, route_key)
        } else {
            format!("{}:{}", self.config.tag, client_key)
        }
    }

    pub fn check(&self, client_key: &str, route_key: &str) -> Result<Decision, StoreError> {
        if !self.config.enabled {
            return Ok(Decision::Allow);
        }

        let key = self.key_for(client_key, route_key);
        let now = self.clock.now();
        let stale: Stale<'_> = &|window: &RateWindow| window.is_stale(&self.config, now);
        let mut decision = Decision::Allow;
        self.cache.update(
            &key,
            &mut |current| {
                let was_banned = current.map_or(false, |w| w.is_banned(now));
                let (window, outcome) = advance(current.cloned(), &key, &self.config, now);
                decision = outcome;
                if was_banned {
                    // Denied inside a ban: the window itself does not move
                    return WindowUpdate::Keep;
                }
                if window.banned_until.is_some() {
                    warn!(
                        "Rate limit exceeded: client={}, route={}, count={}, banned_until={:?}",
                        format_sensitive(client_key),
                        route_key,
                        window.count,
                        window.banned_until
                    );
                }
                WindowUpdate::Put(window)
            },
            self.sweep_due(now).then_some(stale),
        )?;

        if let Decision::Deny { retry_after } = decision {
            debug!("Denied {} for another {}s", key, retry_after.num_seconds());
        }
        Ok(decision)
    }

    fn sweep_due(&self, now: DateTime<Utc>) -> bool {
        let mut next = self.next_sweep.lock().unwrap_or_else(|e| e.into_inner());
        match *next {
            Some(at) if now < at => false,
            _ => {
                *next = Some(
                    now.checked_add_signed(self.config.period())
                        .unwrap_or(DateTime::<Utc>::MAX_UTC),
                );
                true
            }
        }
    }
}
