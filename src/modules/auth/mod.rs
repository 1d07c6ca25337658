pub mod account;
pub mod expiry;
pub mod lifecycle;
pub mod password;
pub mod tokens;

// Re-export the main types and functions
pub use account::{Account, AccountId, AccountState, LoginDenial};
pub use expiry::ExpiryPolicy;
pub use lifecycle::{check_activation, check_password_reset, AccountLifecycle, Outcome, Rejection};
pub use password::{validate_password, PasswordError, PasswordHasher, Pbkdf2Hasher};
pub use tokens::{check_token, SecureTokenGenerator, Token, TokenCheck, TokenGenerator, TokenPurpose, TokenStore};
