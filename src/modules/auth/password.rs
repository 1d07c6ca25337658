use std::io;

use thiserror::Error;

use crate::modules::crypto::{constant_time_eq, derive_key_from_passphrase, generate_random_salt};

const SCHEME: &str = "pbkdf2-sha256";

/// Reasons a new password is refused by [`validate_password`]
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PasswordError {
    #[error("must be at least 8 characters")]
    TooShort,
    #[error("must be at most 256 characters")]
    TooLong,
    #[error("must contain an uppercase letter")]
    NoUppercase,
    #[error("must contain a lowercase letter")]
    NoLowercase,
    #[error("must contain a number")]
    NoNumber,
    #[error("must contain a special character")]
    NoSpecialChar,
}

/// Function to validate password strength
pub fn validate_password(password: &str) -> Result<(), PasswordError> {
    let length = password.chars().count();
    if length < 8 {
        return Err(PasswordError::TooShort);
    }
    if length > 256 {
        return Err(PasswordError::TooLong);
    }
    if !password.chars().any(|c| c.is_uppercase()) {
        return Err(PasswordError::NoUppercase);
    }
    if !password.chars().any(|c| c.is_lowercase()) {
        return Err(PasswordError::NoLowercase);
    }
    if !password.chars().any(|c| c.is_numeric()) {
        return Err(PasswordError::NoNumber);
    }
    if !password
        .chars()
        .any(|c| "!@#$%^&*()_+-=[]{}|;:,.<>?".contains(c))
    {
        return Err(PasswordError::NoSpecialChar);
    }
    Ok(())
}

/// Helper function to read a password securely
pub fn read_password() -> io::Result<String> {
    rpassword::read_password()
}

/// One-way password hashing
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, plaintext: &str) -> String;
    fn verify(&self, plaintext: &str, hash: &str) -> bool;
}

/// PBKDF2-HMAC-SHA256 with a random salt per hash.
///
/// Hashes are encoded as `pbkdf2-sha256$<iterations>$<salt hex>$<key hex>`,
/// so verification uses the iteration count the hash was created with.
#[derive(Debug, Clone, Copy)]
pub struct Pbkdf2Hasher {
    iterations: u32,
}

impl Pbkdf2Hasher {
    pub fn new(iterations: u32) -> Self {
        Self {
            iterations: iterations.max(1),
        }
    }
}

impl Default for Pbkdf2Hasher {
    fn default() -> Self {
        Self::new(crate::DEFAULT_HASH_ITERATIONS)
    }
}

impl PasswordHasher for Pbkdf2Hasher {
    fn hash(&self, plaintext: &str) -> String {
        let salt = generate_random_salt();
        let key = derive_key_from_passphrase(plaintext, &salt, self.iterations);
        format!(
            "{}${}${}${}",
            SCHEME,
            self.iterations,
            hex::encode(&salt),
            hex::encode(key)
        )
    }

    fn verify(&self, plaintext: &str, hash: &str) -> bool {
        let parts: Vec<&str> = hash.split('$').collect();
        if parts.len() != 4 || parts[0] != SCHEME {
            return false;
        }
        let iterations = match parts[1].parse::<u32>() {
            Ok(n) if n > 0 => n,
            _ => return false,
        };
        let (salt, expected) = match (hex::decode(parts[2]), hex::decode(parts[3])) {
            (Ok(salt), Ok(expected)) => (salt, expected),
            _ => return false,
        };

        let derived = derive_key_from_passphrase(plaintext, &salt, iterations);
        constant_time_eq(&expected, &derived)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_validation() {
        assert!(validate_password("Password123!").is_ok());
        assert_eq!(validate_password("Pass1!"), Err(PasswordError::TooShort));
        assert_eq!(
            validate_password(&format!("Aa1!{}", "x".repeat(253))),
            Err(PasswordError::TooLong)
        );
        assert_eq!(validate_password("password123!"), Err(PasswordError::NoUppercase));
        assert_eq!(validate_password("PASSWORD123!"), Err(PasswordError::NoLowercase));
        assert_eq!(validate_password("Password!"), Err(PasswordError::NoNumber));
        assert_eq!(validate_password("Password123"), Err(PasswordError::NoSpecialChar));
    }

    #[test]
    fn test_hash_and_verify() {
        let hasher = Pbkdf2Hasher::new(1_000);
        let hash = hasher.hash("secret");

        assert!(hash.starts_with("pbkdf2-sha256$1000$"));
        assert!(hasher.verify("secret", &hash));
        assert!(!hasher.verify("Secret", &hash));

        // Salted: same input, different encodings, both verify
        let again = hasher.hash("secret");
        assert_ne!(hash, again);
        assert!(hasher.verify("secret", &again));
    }

    #[test]
    fn test_verify_uses_encoded_iterations() {
        let hash = Pbkdf2Hasher::new(1_000).hash("secret");
        assert!(Pbkdf2Hasher::new(2_000).verify("secret", &hash));
    }

    #[test]
    fn test_malformed_hashes_never_verify() {
        let hasher = Pbkdf2Hasher::new(1_000);
        for bad in [
            "",
            "plain",
            "md5$1000$00$00",
            "pbkdf2-sha256$0$00$00",
            "pbkdf2-sha256$x$00$00",
            "pbkdf2-sha256$1000$zz$00",
            "pbkdf2-sha256$1000$00",
        ] {
            assert!(!hasher.verify("secret", bad), "{}", bad);
        }
    }
}
