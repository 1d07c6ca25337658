use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque account identifier assigned by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub u64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coarse lifecycle state. Blocking wins over activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountState {
    Unactivated,
    Active,
    Blocked,
}

/// First reason an account may not log in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginDenial {
    NotActive,
    NoPassword,
    Blocked,
}

impl fmt::Display for LoginDenial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            LoginDenial::NotActive => "Account is not active",
            LoginDenial::NoPassword => "Account has no password set",
            LoginDenial::Blocked => "Account is blocked",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveStatus {
    Activated,
    Deactivated,
}

impl fmt::Display for ActiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ActiveStatus::Activated => "Activated",
            ActiveStatus::Deactivated => "Deactivated",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockedStatus {
    Blocked,
    Unblocked,
}

impl fmt::Display for BlockedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BlockedStatus::Blocked => "Blocked",
            BlockedStatus::Unblocked => "Unblocked",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordStatus {
    HasPassword,
    NoPassword,
}

impl fmt::Display for PasswordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PasswordStatus::HasPassword => "Has password",
            PasswordStatus::NoPassword => "No password",
        })
    }
}

/// A user subject to lifecycle control.
///
/// Only [`crate::auth::AccountLifecycle`] mutates these flags once the
/// account has been registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub email: String,
    pub active: bool,
    pub blocked: bool,
    pub password_hash: Option<String>,
    pub password_set_at: Option<DateTime<Utc>>,
    pub activated_at: Option<DateTime<Utc>>,
    pub authenticated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Fresh registration: unactivated, unblocked, no password
    pub fn new(id: AccountId, email: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            email: email.into(),
            active: false,
            blocked: false,
            password_hash: None,
            password_set_at: None,
            activated_at: None,
            authenticated_at: None,
            created_at,
        }
    }

    pub fn state(&self) -> AccountState {
        if self.blocked {
            AccountState::Blocked
        } else if self.active {
            AccountState::Active
        } else {
            AccountState::Unactivated
        }
    }

    pub fn is_login_allowed(&self) -> bool {
        self.active && self.password_hash.is_some() && !self.blocked
    }

    /// Reason login is refused, checked in the order active, password, blocked
    pub fn login_denial(&self) -> Option<LoginDenial> {
        if !self.active {
            Some(LoginDenial::NotActive)
        } else if self.password_hash.is_none() {
            Some(LoginDenial::NoPassword)
        } else if self.blocked {
            Some(LoginDenial::Blocked)
        } else {
            None
        }
    }

    pub fn is_activation_request_allowed(&self) -> bool {
        !self.active && !self.blocked
    }

    pub fn is_password_reset_request_allowed(&self) -> bool {
        self.active && !self.blocked
    }

    pub fn active_status(&self) -> ActiveStatus {
        if self.active {
            ActiveStatus::Activated
        } else {
            ActiveStatus::Deactivated
        }
    }

    pub fn blocked_status(&self) -> BlockedStatus {
        if self.blocked {
            BlockedStatus::Blocked
        } else {
            BlockedStatus::Unblocked
        }
    }

    pub fn password_status(&self) -> PasswordStatus {
        if self.password_hash.is_some() {
            PasswordStatus::HasPassword
        } else {
            PasswordStatus::NoPassword
        }
    }

    /// Whole days since the password was last set, if it ever was
    pub fn days_since_password_update(&self, now: DateTime<Utc>) -> Option<i64> {
        self.password_set_at.map(|at| (now - at).num_days())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn account(active: bool, has_password: bool, blocked: bool) -> Account {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut account = Account::new(AccountId(1), "a@x.com", now);
        account.active = active;
        account.blocked = blocked;
        account.password_hash = has_password.then(|| "hash".to_string());
        account
    }

    #[test]
    fn test_login_allowed_truth_table() {
        for active in [false, true] {
            for has_password in [false, true] {
                for blocked in [false, true] {
                    let account = account(active, has_password, blocked);
                    assert_eq!(
                        account.is_login_allowed(),
                        active && has_password && !blocked,
                        "active={} password={} blocked={}",
                        active,
                        has_password,
                        blocked
                    );
                    assert_eq!(account.is_login_allowed(), account.login_denial().is_none());
                }
            }
        }
    }

    #[test]
    fn test_login_denial_order() {
        assert_eq!(account(false, false, true).login_denial(), Some(LoginDenial::NotActive));
        assert_eq!(account(true, false, true).login_denial(), Some(LoginDenial::NoPassword));
        assert_eq!(account(true, true, true).login_denial(), Some(LoginDenial::Blocked));
        assert_eq!(account(true, true, false).login_denial(), None);
    }

    #[test]
    fn test_request_preconditions() {
        assert!(account(false, false, false).is_activation_request_allowed());
        assert!(!account(true, false, false).is_activation_request_allowed());
        assert!(!account(false, false, true).is_activation_request_allowed());

        assert!(account(true, false, false).is_password_reset_request_allowed());
        assert!(!account(false, true, false).is_password_reset_request_allowed());
        assert!(!account(true, true, true).is_password_reset_request_allowed());
    }

    #[test]
    fn test_state_and_labels() {
        assert_eq!(account(false, false, false).state(), AccountState::Unactivated);
        assert_eq!(account(true, true, false).state(), AccountState::Active);
        assert_eq!(account(true, true, true).state(), AccountState::Blocked);
        assert_eq!(account(false, false, true).state(), AccountState::Blocked);

        let acct = account(true, false, true);
        assert_eq!(acct.active_status().to_string(), "Activated");
        assert_eq!(acct.blocked_status().to_string(), "Blocked");
        assert_eq!(acct.password_status().to_string(), "No password");
        assert_eq!(account(false, true, false).active_status().to_string(), "Deactivated");
    }

    #[test]
    fn test_days_since_password_update() {
        let mut acct = account(true, true, false);
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(acct.days_since_password_update(now), None);

        acct.password_set_at = Some(now - Duration::days(10) - Duration::hours(3));
        assert_eq!(acct.days_since_password_update(now), Some(10));
    }
}
