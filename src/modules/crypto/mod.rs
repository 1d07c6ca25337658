pub mod keys;

pub use keys::{constant_time_eq, derive_key_from_passphrase, generate_random_salt, random_bytes};
