use std::fmt;
use std::sync::Arc;

use chrono::DateTime;
use chrono::Utc;

use super::account::{Account, AccountId};
use super::password::{PasswordHasher, Pbkdf2Hasher};
use super::tokens::{check_token, SecureTokenGenerator, Token, TokenCheck, TokenGenerator, TokenPurpose, TokenStore};
use crate::error::{ConfigError, StoreError};
use crate::modules::config::CoreConfig;
use crate::modules::crypto::random_bytes;
use crate::modules::storage::{Records, Store, StoreExt, Txn};
use crate::modules::utils::io::normalize_email;
use crate::modules::utils::logging::{log_auth_event, log_data_operation};
use crate::modules::utils::time::Clock;

/// Why a guarded transition was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    UnknownAccount,
    /// The account's state does not permit the transition
    NotAllowed,
    TokenMissing,
    TokenMismatch,
    TokenExpired,
    EmailMismatch,
    InvalidCredentials,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Rejection::UnknownAccount => "unknown account",
            Rejection::NotAllowed => "not allowed in the account's current state",
            Rejection::TokenMissing => "no token has been issued",
            Rejection::TokenMismatch => "token does not match",
            Rejection::TokenExpired => "token has expired",
            Rejection::EmailMismatch => "email does not match",
            Rejection::InvalidCredentials => "invalid credentials",
        })
    }
}

impl Rejection {
    fn from_check(check: TokenCheck) -> Result<(), Rejection> {
        match check {
            TokenCheck::Valid => Ok(()),
            TokenCheck::Missing => Err(Rejection::TokenMissing),
            TokenCheck::Mismatch => Err(Rejection::TokenMismatch),
            TokenCheck::Expired => Err(Rejection::TokenExpired),
        }
    }
}

/// Result of a lifecycle operation.
///
/// `Rejected` never comes with side effects; `Unchanged` means the request
/// was already satisfied and nothing was written.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum Outcome<T = ()> {
    Applied(T),
    Unchanged,
    Rejected(Rejection),
}

impl<T> Outcome<T> {
    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied(_))
    }

    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            Outcome::Rejected(rejection) => Some(*rejection),
            _ => None,
        }
    }

    pub fn applied(self) -> Option<T> {
        match self {
            Outcome::Applied(value) => Some(value),
            _ => None,
        }
    }
}

/// Guard for `activate`: activation must still be requestable, then the token
/// must be present, equal and inside `ttl_hours`.
pub fn check_activation(
    account: &Account,
    stored: Option<&Token>,
    presented: &str,
    ttl_hours: i64,
    now: DateTime<Utc>,
) -> Result<(), Rejection> {
    if !account.is_activation_request_allowed() {
        return Err(Rejection::NotAllowed);
    }
    Rejection::from_check(check_token(stored, presented, ttl_hours, now))
}

/// Guard for `reset_password`: like [`check_activation`] plus an email match.
pub fn check_password_reset(
    account: &Account,
    stored: Option<&Token>,
    presented: &str,
    email: &str,
    ttl_hours: i64,
    now: DateTime<Utc>,
) -> Result<(), Rejection> {
    if !account.is_password_reset_request_allowed() {
        return Err(Rejection::NotAllowed);
    }
    if normalize_email(email) != normalize_email(&account.email) {
        return Err(Rejection::EmailMismatch);
    }
    Rejection::from_check(check_token(stored, presented, ttl_hours, now))
}

/// Precondition-gated state machine over accounts.
///
/// Each transition evaluates its guard and applies its mutation inside one
/// store transaction, so a rejected call writes nothing and two racing calls
/// cannot both consume the same token.
#[derive(Clone)]
pub struct AccountLifecycle {
    store: Arc<dyn Store>,
    tokens: TokenStore,
    clock: Arc<dyn Clock>,
    hasher: Arc<dyn PasswordHasher>,
    /// Verified against when there is no real hash, so every attempt costs one derivation
    dummy_hash: String,
    activation_ttl_hours: i64,
    password_reset_ttl_hours: i64,
}

impl AccountLifecycle {
    pub fn new(
        config: &CoreConfig,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        hasher: Arc<dyn PasswordHasher>,
        generator: Arc<dyn TokenGenerator>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let tokens = TokenStore::new(store.clone(), clock.clone(), generator, config.token_bytes);
        let dummy_hash = hasher.hash(&hex::encode(random_bytes(16)));
        Ok(Self {
            store,
            tokens,
            clock,
            hasher,
            dummy_hash,
            activation_ttl_hours: config.activation_ttl_hours,
            password_reset_ttl_hours: config.password_reset_ttl_hours,
        })
    }

    /// PBKDF2 hashing and OS-random tokens, as configured
    pub fn from_config(
        config: &CoreConfig,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        Self::new(
            config,
            store,
            clock,
            Arc::new(Pbkdf2Hasher::new(config.hash_iterations)),
            Arc::new(SecureTokenGenerator),
        )
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub fn activation_ttl_hours(&self) -> i64 {
        self.activation_ttl_hours
    }

    pub fn password_reset_ttl_hours(&self) -> i64 {
        self.password_reset_ttl_hours
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Create an unactivated account; fails with `StoreError::Conflict` on a taken email
    pub fn register(&self, email: &str) -> Result<Account, StoreError> {
        let now = self.clock.now();
        let account = self.store.write(|records| match records.create_account(email, now) {
            Ok(account) => Txn::Commit(Ok(account)),
            Err(e) => Txn::Rollback(Err(e)),
        })??;
        log_data_operation("register", &account.email, "accounts", true, None);
        Ok(account)
    }

    pub fn account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        self.store.read(|records| records.account(id).cloned())
    }

    pub fn account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        self.store.read(|records| records.account_by_email(email).cloned())
    }

    pub fn accounts(&self) -> Result<Vec<Account>, StoreError> {
        self.store.read(|records| records.accounts().cloned().collect())
    }

    pub fn is_login_allowed(&self, id: AccountId) -> Result<bool, StoreError> {
        Ok(self.account(id)?.map_or(false, |account| account.is_login_allowed()))
    }

    /// Issue an activation token; requires `!active && !blocked`
    pub fn request_activation(&self, id: AccountId) -> Result<Outcome<Token>, StoreError> {
        self.issue(
            id,
            TokenPurpose::Activation,
            self.activation_ttl_hours,
            Account::is_activation_request_allowed,
        )
    }

    /// Issue a password reset token; requires `active && !blocked`
    pub fn request_password_reset(&self, id: AccountId) -> Result<Outcome<Token>, StoreError> {
        self.issue(
            id,
            TokenPurpose::PasswordReset,
            self.password_reset_ttl_hours,
            Account::is_password_reset_request_allowed,
        )
    }

    fn issue(
        &self,
        id: AccountId,
        purpose: TokenPurpose,
        ttl_hours: i64,
        allowed: fn(&Account) -> bool,
    ) -> Result<Outcome<Token>, StoreError> {
        let now = self.clock.now();
        let token = self.tokens.mint(id, purpose, ttl_hours, now);
        let outcome = self.store.write(|records| {
            match records.account(id) {
                None => return Txn::Rollback(Outcome::Rejected(Rejection::UnknownAccount)),
                Some(account) if !allowed(account) => {
                    return Txn::Rollback(Outcome::Rejected(Rejection::NotAllowed))
                }
                Some(_) => {}
            }
            records.put_token(token.clone());
            Txn::Commit(Outcome::Applied(token))
        })?;

        let event = format!("request_{}", purpose);
        log_auth_event(&event, &id.to_string(), outcome.is_applied(), rejection_detail(&outcome));
        Ok(outcome)
    }

    /// Consume the activation token, set the first password and activate
    pub fn activate(
        &self,
        id: AccountId,
        token: &str,
        new_password: &str,
        ttl_hours: i64,
    ) -> Result<Outcome, StoreError> {
        let now = self.clock.now();
        let guard = |records: &Records| -> Result<(), Rejection> {
            let account = records.account(id).ok_or(Rejection::UnknownAccount)?;
            check_activation(account, records.token(id, TokenPurpose::Activation), token, ttl_hours, now)
        };

        let outcome = self.apply_with_password(guard, new_password, |records, hash| {
            records.take_token(id, TokenPurpose::Activation);
            if let Some(account) = records.account_mut(id) {
                account.active = true;
                account.activated_at = Some(now);
                account.password_hash = Some(hash);
                account.password_set_at = Some(now);
            }
        })?;

        log_auth_event("activate", &id.to_string(), outcome.is_applied(), rejection_detail(&outcome));
        Ok(outcome)
    }

    /// Consume the reset token and replace the password
    pub fn reset_password(
        &self,
        id: AccountId,
        token: &str,
        email: &str,
        new_password: &str,
        ttl_hours: i64,
    ) -> Result<Outcome, StoreError> {
        let now = self.clock.now();
        let guard = |records: &Records| -> Result<(), Rejection> {
            let account = records.account(id).ok_or(Rejection::UnknownAccount)?;
            check_password_reset(
                account,
                records.token(id, TokenPurpose::PasswordReset),
                token,
                email,
                ttl_hours,
                now,
            )
        };

        let outcome = self.apply_with_password(guard, new_password, |records, hash| {
            records.take_token(id, TokenPurpose::PasswordReset);
            if let Some(account) = records.account_mut(id) {
                account.password_hash = Some(hash);
                account.password_set_at = Some(now);
            }
        })?;

        log_auth_event("reset_password", &id.to_string(), outcome.is_applied(), rejection_detail(&outcome));
        Ok(outcome)
    }

    // The guard runs once outside the lock so rejected calls skip the hashing
    // cost, then again inside the transaction before mutating.
    fn apply_with_password(
        &self,
        guard: impl Fn(&Records) -> Result<(), Rejection>,
        new_password: &str,
        mutate: impl FnOnce(&mut Records, String),
    ) -> Result<Outcome, StoreError> {
        if let Err(rejection) = self.store.read(|records| guard(records))? {
            return Ok(Outcome::Rejected(rejection));
        }

        let hash = self.hasher.hash(new_password);
        self.store.write(|records| match guard(records) {
            Err(rejection) => Txn::Rollback(Outcome::Rejected(rejection)),
            Ok(()) => {
                mutate(records, hash);
                Txn::Commit(Outcome::Applied(()))
            }
        })
    }

    /// Clear `active`; a no-op without any write when already inactive
    pub fn deactivate(&self, id: AccountId) -> Result<Outcome, StoreError> {
        let outcome = self.store.write(|records| match records.account_mut(id) {
            None => Txn::Rollback(Outcome::Rejected(Rejection::UnknownAccount)),
            Some(account) if !account.active => Txn::Rollback(Outcome::Unchanged),
            Some(account) => {
                account.active = false;
                account.activated_at = None;
                Txn::Commit(Outcome::Applied(()))
            }
        })?;

        if outcome != Outcome::Unchanged {
            log_auth_event("deactivate", &id.to_string(), outcome.is_applied(), rejection_detail(&outcome));
        }
        Ok(outcome)
    }

    pub fn block(&self, id: AccountId) -> Result<Outcome, StoreError> {
        self.set_blocked(id, true)
    }

    pub fn unblock(&self, id: AccountId) -> Result<Outcome, StoreError> {
        self.set_blocked(id, false)
    }

    fn set_blocked(&self, id: AccountId, blocked: bool) -> Result<Outcome, StoreError> {
        let outcome = self.store.write(|records| match records.account_mut(id) {
            None => Txn::Rollback(Outcome::Rejected(Rejection::UnknownAccount)),
            Some(account) => {
                account.blocked = blocked;
                Txn::Commit(Outcome::Applied(()))
            }
        })?;

        let event = if blocked { "block" } else { "unblock" };
        log_auth_event(event, &id.to_string(), outcome.is_applied(), rejection_detail(&outcome));
        Ok(outcome)
    }

    /// Administrator-forced reset: drop the password so login is refused
    pub fn revoke_password(&self, id: AccountId) -> Result<Outcome, StoreError> {
        let outcome = self.store.write(|records| match records.account_mut(id) {
            None => Txn::Rollback(Outcome::Rejected(Rejection::UnknownAccount)),
            Some(account) if account.password_hash.is_none() => Txn::Rollback(Outcome::Unchanged),
            Some(account) => {
                account.password_hash = None;
                account.password_set_at = None;
                Txn::Commit(Outcome::Applied(()))
            }
        })?;

        log_auth_event("revoke_password", &id.to_string(), outcome.rejection().is_none(), rejection_detail(&outcome));
        Ok(outcome)
    }

    /// Check credentials for a login and record `authenticated_at`
    pub fn authenticate(&self, email: &str, password: &str) -> Result<Outcome<AccountId>, StoreError> {
        let account = self.account_by_email(email)?;

        // Unknown, blocked and password-less accounts still pay for one verify
        let stored_hash = account.as_ref().and_then(|a| a.password_hash.as_deref());
        let verified = self.hasher.verify(password, stored_hash.unwrap_or(&self.dummy_hash));

        let account = match account {
            Some(account) => account,
            None => {
                log_auth_event("authenticate", email, false, Some("unknown account"));
                return Ok(Outcome::Rejected(Rejection::UnknownAccount));
            }
        };
        let id = account.id;

        let outcome = if !account.is_login_allowed() {
            Outcome::Rejected(Rejection::NotAllowed)
        } else if verified && account.password_hash.is_some() {
            let now = self.clock.now();
            let verified_hash = account.password_hash.clone();
            self.store.write(|records| match records.account_mut(id) {
                // Re-check: the account may have changed while we verified
                Some(current)
                    if current.is_login_allowed() && current.password_hash == verified_hash =>
                {
                    current.authenticated_at = Some(now);
                    Txn::Commit(Outcome::Applied(id))
                }
                Some(_) => Txn::Rollback(Outcome::Rejected(Rejection::NotAllowed)),
                None => Txn::Rollback(Outcome::Rejected(Rejection::UnknownAccount)),
            })?
        } else {
            Outcome::Rejected(Rejection::InvalidCredentials)
        };

        log_auth_event("authenticate", &account.email, outcome.is_applied(), rejection_detail(&outcome));
        Ok(outcome)
    }
}

fn rejection_detail<T>(outcome: &Outcome<T>) -> Option<&'static str> {
    match outcome.rejection()? {
        Rejection::UnknownAccount => Some("unknown account"),
        Rejection::NotAllowed => Some("not allowed"),
        Rejection::TokenMissing => Some("token missing"),
        Rejection::TokenMismatch => Some("token mismatch"),
        Rejection::TokenExpired => Some("token expired"),
        Rejection::EmailMismatch => Some("email mismatch"),
        Rejection::InvalidCredentials => Some("invalid credentials"),
    }
}
