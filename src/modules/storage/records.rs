use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::modules::auth::account::{Account, AccountId};
use crate::modules::auth::tokens::{Token, TokenPurpose};
use crate::modules::ratelimit::RateWindow;
use crate::modules::utils::io::normalize_email;

/// The full set of records a [`super::Store`] persists
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Records {
    #[serde(default)]
    next_account_id: u64,
    #[serde(default)]
    accounts: BTreeMap<u64, Account>,
    #[serde(default)]
    tokens: Vec<Token>,
    #[serde(default)]
    rate_windows: BTreeMap<String, RateWindow>,
}

impl Records {
    /// Register a new account under the next free id. Emails are unique.
    pub fn create_account(&mut self, email: &str, now: DateTime<Utc>) -> Result<Account, StoreError> {
        let email = normalize_email(email);
        if self.account_by_email(&email).is_some() {
            return Err(StoreError::conflict(format!("email already registered: {}", email)));
        }

        self.next_account_id += 1;
        let id = AccountId(self.next_account_id);
        let account = Account::new(id, email, now);
        self.accounts.insert(id.0, account.clone());
        Ok(account)
    }

    pub fn account(&self, id: AccountId) -> Option<&Account> {
        self.accounts.get(&id.0)
    }

    pub fn account_mut(&mut self, id: AccountId) -> Option<&mut Account> {
        self.accounts.get_mut(&id.0)
    }

    pub fn account_by_email(&self, email: &str) -> Option<&Account> {
        let email = normalize_email(email);
        self.accounts.values().find(|account| account.email == email)
    }

    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }

    pub fn token(&self, subject_id: AccountId, purpose: TokenPurpose) -> Option<&Token> {
        self.tokens
            .iter()
            .find(|token| token.subject_id == subject_id && token.purpose == purpose)
    }

    /// Store `token`, replacing and returning any token for the same (subject, purpose)
    pub fn put_token(&mut self, token: Token) -> Option<Token> {
        let previous = self.take_token(token.subject_id, token.purpose);
        self.tokens.push(token);
        previous
    }

    pub fn take_token(&mut self, subject_id: AccountId, purpose: TokenPurpose) -> Option<Token> {
        let index = self
            .tokens
            .iter()
            .position(|token| token.subject_id == subject_id && token.purpose == purpose)?;
        Some(self.tokens.swap_remove(index))
    }

    pub fn token_by_value(&self, purpose: TokenPurpose, value: &str) -> Option<&Token> {
        self.tokens
            .iter()
            .find(|token| token.purpose == purpose && token.matches(value))
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Keep only tokens matching `keep`; returns how many were dropped
    pub fn retain_tokens(&mut self, keep: impl FnMut(&Token) -> bool) -> usize {
        let before = self.tokens.len();
        self.tokens.retain(keep);
        before - self.tokens.len()
    }

    pub fn rate_windows(&self) -> &BTreeMap<String, RateWindow> {
        &self.rate_windows
    }

    pub fn rate_windows_mut(&mut self) -> &mut BTreeMap<String, RateWindow> {
        &mut self.rate_windows
    }
}
