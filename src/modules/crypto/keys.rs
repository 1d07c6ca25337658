use hmac::Mac;
use pbkdf2::pbkdf2;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::HmacSha256;

/// Length in bytes of password salts
pub const SALT_LEN: usize = 16;

/// Length in bytes of derived password keys
pub const KEY_LEN: usize = 32;

const COMPARE_KEY: &[u8] = b"account-lifecycle/compare";

/// Fill a buffer of `len` bytes from the operating system CSPRNG
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Function to generate a random salt for PBKDF2
pub fn generate_random_salt() -> Vec<u8> {
    random_bytes(SALT_LEN)
}

/// Function to derive a 32-byte key from the passphrase using PBKDF2
pub fn derive_key_from_passphrase(passphrase: &str, salt: &[u8], iterations: u32) -> Vec<u8> {
    let mut key = vec![0u8; KEY_LEN];
    pbkdf2::<HmacSha256>(passphrase.as_bytes(), salt, iterations.max(1), &mut key);
    key
}

/// Compare two byte strings without leaking where they first differ.
///
/// Both inputs are reduced to HMAC tags under a fixed key and the tags are
/// checked with `verify_slice`, which compares in constant time. Inputs of
/// different lengths therefore take the same path as equal-length ones.
pub fn constant_time_eq(expected: &[u8], presented: &[u8]) -> bool {
    let mut expected_mac = match HmacSha256::new_from_slice(COMPARE_KEY) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    expected_mac.update(expected);
    let expected_tag = expected_mac.finalize().into_bytes();

    let mut presented_mac = match HmacSha256::new_from_slice(COMPARE_KEY) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    presented_mac.update(presented);
    presented_mac.verify_slice(&expected_tag).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_derivation() {
        let passphrase = "MySecurePassword123!";
        let salt = generate_random_salt();

        let key = derive_key_from_passphrase(passphrase, &salt, 1_000);
        assert_eq!(key.len(), KEY_LEN);

        let key2 = derive_key_from_passphrase(passphrase, &salt, 1_000);
        assert_eq!(key, key2);

        let key3 = derive_key_from_passphrase("DifferentPassword456!", &salt, 1_000);
        assert_ne!(key, key3);

        let different_salt = generate_random_salt();
        let key4 = derive_key_from_passphrase(passphrase, &different_salt, 1_000);
        assert_ne!(key, key4);

        // Iteration count is part of the derivation
        let key5 = derive_key_from_passphrase(passphrase, &salt, 2_000);
        assert_ne!(key, key5);
    }

    #[test]
    fn test_random_generation() {
        let salt1 = generate_random_salt();
        let salt2 = generate_random_salt();
        assert_eq!(salt1.len(), SALT_LEN);
        assert_ne!(salt1, salt2);

        assert_eq!(random_bytes(32).len(), 32);
        assert!(random_bytes(0).is_empty());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"tok1", b"tok1"));
        assert!(!constant_time_eq(b"tok1", b"tok2"));
        assert!(!constant_time_eq(b"tok1", b"tok10"));
        assert!(!constant_time_eq(b"tok1", b""));
        assert!(constant_time_eq(b"", b""));
    }
}
