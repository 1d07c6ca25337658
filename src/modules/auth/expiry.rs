use chrono::{DateTime, Duration, Utc};

/// Time-to-live rule for tokens: valid while `now - created_at <= ttl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPolicy {
    ttl_hours: i64,
}

impl ExpiryPolicy {
    pub fn new(ttl_hours: i64) -> Self {
        Self { ttl_hours }
    }

    pub fn ttl_hours(&self) -> i64 {
        self.ttl_hours
    }

    pub fn ttl(&self) -> Duration {
        Duration::try_hours(self.ttl_hours).unwrap_or(Duration::MAX)
    }

    /// The boundary is inclusive: exactly `ttl` after creation is still valid.
    pub fn is_valid(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(created_at) <= self.ttl()
    }

    pub fn expires_at(&self, created_at: DateTime<Utc>) -> DateTime<Utc> {
        created_at
            .checked_add_signed(self.ttl())
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Time left before expiry, or `None` once expired
    pub fn remaining(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> Option<Duration> {
        if self.is_valid(created_at, now) {
            Some(self.expires_at(created_at).signed_duration_since(now))
        } else {
            None
        }
    }
}

/// Shorthand for `ExpiryPolicy::new(ttl_hours).is_valid(created_at, now)`
pub fn is_valid(created_at: DateTime<Utc>, ttl_hours: i64, now: DateTime<Utc>) -> bool {
    ExpiryPolicy::new(ttl_hours).is_valid(created_at, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_validity_window() {
        let created = t0();
        assert!(is_valid(created, 24, created));
        assert!(is_valid(created, 24, created + Duration::hours(23) + Duration::minutes(59)));
        assert!(!is_valid(created, 24, created + Duration::hours(24) + Duration::minutes(1)));
        assert!(!is_valid(created, 24, created + Duration::days(2)));
    }

    #[test]
    fn test_boundary_is_inclusive() {
        let created = t0();
        assert!(is_valid(created, 24, created + Duration::hours(24)));
        assert!(!is_valid(created, 24, created + Duration::hours(24) + Duration::seconds(1)));
    }

    #[test]
    fn test_expires_at_and_remaining() {
        let policy = ExpiryPolicy::new(2);
        let created = t0();
        assert_eq!(policy.expires_at(created), created + Duration::hours(2));
        assert_eq!(
            policy.remaining(created, created + Duration::minutes(30)),
            Some(Duration::minutes(90))
        );
        assert_eq!(policy.remaining(created, created + Duration::hours(3)), None);
    }

    #[test]
    fn test_huge_ttl_does_not_overflow() {
        let policy = ExpiryPolicy::new(i64::MAX);
        assert!(policy.is_valid(t0(), t0() + Duration::days(365 * 100)));
        assert_eq!(policy.expires_at(t0()), DateTime::<Utc>::MAX_UTC);
    }
}
