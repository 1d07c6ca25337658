use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use tempfile::TempDir;

use account_lifecycle::auth::{AccountLifecycle, Outcome, Rejection, TokenPurpose};
use account_lifecycle::ratelimit::{Decision, RateLimitConfig, RateLimiter};
use account_lifecycle::utils::time::{Clock, ManualClock};
use account_lifecycle::storage::StoreExt;
use account_lifecycle::{CoreConfig, JsonFileStore, StoreError};

fn setup(dir: &TempDir) -> (AccountLifecycle, Arc<JsonFileStore>, Arc<ManualClock>) {
    let store = Arc::new(JsonFileStore::new(dir.path().join("accounts.json")));
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
    ));
    let config = CoreConfig {
        hash_iterations: 1_000,
        ..CoreConfig::default()
    };
    let lifecycle = AccountLifecycle::from_config(&config, store.clone(), clock.clone()).unwrap();
    (lifecycle, store, clock)
}

#[test]
fn full_account_lifecycle_survives_reopening_the_store() {
    let dir = TempDir::new().unwrap();
    let (lifecycle, _, clock) = setup(&dir);

    let account = lifecycle.register("Alice@Example.com").unwrap();
    assert_eq!(account.email, "alice@example.com");
    assert!(!lifecycle.is_login_allowed(account.id).unwrap());

    let token = lifecycle
        .request_activation(account.id)
        .unwrap()
        .applied()
        .unwrap();
    assert_eq!(token.purpose, TokenPurpose::Activation);
    assert_eq!(
        lifecycle.tokens().subject_for(TokenPurpose::Activation, &token.value).unwrap(),
        Some(account.id)
    );

    clock.advance(Duration::hours(3));
    assert!(lifecycle
        .activate(account.id, &token.value, "Secret123!", 24)
        .unwrap()
        .is_applied());

    // A second handle on the same file sees everything the first one wrote
    let (reopened, _, reopened_clock) = setup(&dir);
    reopened_clock.set(clock.now());
    let stored = reopened.account(account.id).unwrap().unwrap();
    assert!(stored.active);
    assert!(stored.is_login_allowed());
    assert_eq!(stored.activated_at, Some(clock.now()));
    assert_eq!(
        reopened.authenticate("alice@example.com", "Secret123!").unwrap(),
        Outcome::Applied(account.id)
    );

    let reset = reopened
        .request_password_reset(account.id)
        .unwrap()
        .applied()
        .unwrap();
    reopened_clock.advance(Duration::minutes(30));
    assert!(reopened
        .reset_password(account.id, &reset.value, "alice@example.com", "Changed456?", 24)
        .unwrap()
        .is_applied());

    assert_eq!(
        reopened.authenticate("alice@example.com", "Secret123!").unwrap(),
        Outcome::Rejected(Rejection::InvalidCredentials)
    );
    assert!(reopened
        .authenticate("alice@example.com", "Changed456?")
        .unwrap()
        .is_applied());
    assert!(reopened.tokens().live_tokens(None).unwrap().is_empty());
}

#[test]
fn rejected_transitions_leave_the_file_untouched() {
    let dir = TempDir::new().unwrap();
    let (lifecycle, store, clock) = setup(&dir);

    let id = lifecycle.register("bob@example.com").unwrap().id;
    let token = lifecycle.request_activation(id).unwrap().applied().unwrap();
    let before = std::fs::read(store.path()).unwrap();

    clock.advance(Duration::hours(24) + Duration::minutes(1));
    assert_eq!(
        lifecycle.activate(id, &token.value, "Secret123!", 24).unwrap(),
        Outcome::Rejected(Rejection::TokenExpired)
    );
    assert_eq!(
        lifecycle.request_password_reset(id).unwrap(),
        Outcome::Rejected(Rejection::NotAllowed)
    );
    assert_eq!(lifecycle.deactivate(id).unwrap(), Outcome::Unchanged);

    assert_eq!(std::fs::read(store.path()).unwrap(), before);
}

#[test]
fn blocking_overrides_activation() {
    let dir = TempDir::new().unwrap();
    let (lifecycle, _, _) = setup(&dir);

    let id = lifecycle.register("carol@example.com").unwrap().id;
    let token = lifecycle.request_activation(id).unwrap().applied().unwrap();
    assert!(lifecycle.activate(id, &token.value, "Secret123!", 24).unwrap().is_applied());

    assert!(lifecycle.block(id).unwrap().is_applied());
    assert_eq!(
        lifecycle.authenticate("carol@example.com", "Secret123!").unwrap(),
        Outcome::Rejected(Rejection::NotAllowed)
    );
    assert_eq!(
        lifecycle.request_password_reset(id).unwrap(),
        Outcome::Rejected(Rejection::NotAllowed)
    );

    assert!(lifecycle.unblock(id).unwrap().is_applied());
    assert!(lifecycle.is_login_allowed(id).unwrap());
}

#[test]
fn duplicate_registration_is_a_conflict() {
    let dir = TempDir::new().unwrap();
    let (lifecycle, _, _) = setup(&dir);

    lifecycle.register("dave@example.com").unwrap();
    assert!(matches!(
        lifecycle.register(" DAVE@example.com "),
        Err(StoreError::Conflict(_))
    ));
}

#[test]
fn rate_limiter_shares_the_store_file() {
    let dir = TempDir::new().unwrap();
    let (_, store, clock) = setup(&dir);
    let limiter =
        RateLimiter::new(CoreConfig::default().rates, store.clone(), clock.clone()).unwrap();

    for _ in 0..10 {
        assert_eq!(limiter.check("203.0.113.9", "/password/reset").unwrap(), Decision::Allow);
    }
    let denied = limiter.check("203.0.113.9", "/password/reset").unwrap();
    assert_eq!(
        denied,
        Decision::Deny {
            retry_after: Duration::minutes(10)
        }
    );
    assert_eq!(
        denied.into_result().unwrap_err().to_string(),
        "rate limit exceeded; try again in 10 minutes"
    );

    // Counters persist across limiter instances backed by the same file
    let again = RateLimiter::new(CoreConfig::default().rates, store, clock.clone()).unwrap();
    assert!(!again.check("203.0.113.9", "/password/reset").unwrap().is_allowed());

    clock.advance(Duration::minutes(10));
    assert!(again.check("203.0.113.9", "/password/reset").unwrap().is_allowed());
}

#[test]
fn separate_handles_do_not_lose_registrations() {
    let dir = TempDir::new().unwrap();
    let handles: Vec<_> = (0..6)
        .map(|i| {
            let path = dir.path().join("accounts.json");
            std::thread::spawn(move || {
                let store = Arc::new(JsonFileStore::new(path));
                let clock = Arc::new(ManualClock::new(Utc::now()));
                let config = CoreConfig {
                    hash_iterations: 1_000,
                    ..CoreConfig::default()
                };
                let lifecycle = AccountLifecycle::from_config(&config, store, clock).unwrap();
                lifecycle.register(&format!("user{}@example.com", i)).unwrap().id
            })
        })
        .collect();
    let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let store = JsonFileStore::new(dir.path().join("accounts.json"));
    assert_eq!(store.read(|r| r.accounts().count()).unwrap(), 6);
    let mut unique = ids.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 6);
}

#[test]
fn separate_handles_do_not_lose_rate_increments() {
    let dir = TempDir::new().unwrap();
    let config = RateLimitConfig {
        limit: 1_000,
        ..RateLimitConfig::default()
    };
    let now = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let path = dir.path().join("accounts.json");
            let config = config.clone();
            std::thread::spawn(move || {
                let store = Arc::new(JsonFileStore::new(path));
                let limiter = RateLimiter::new(config, store, Arc::new(ManualClock::new(now))).unwrap();
                for _ in 0..10 {
                    assert!(limiter.check("198.51.100.7", "/login").unwrap().is_allowed());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let store = JsonFileStore::new(dir.path().join("accounts.json"));
    let count = store
        .read(|r| r.rate_windows().get("xrate:198.51.100.7:/login").map(|w| w.count))
        .unwrap();
    assert_eq!(count, Some(80));
}
