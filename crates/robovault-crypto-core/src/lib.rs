//! `robovault-crypto-core` — Pure cryptographic primitives for RoboVault.
//!
//! No file I/O, no shared state, no logging. Everything that touches the disk
//! or a clock lives in `robovault-secure-store`.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::arithmetic_side_effects))]

pub mod compare;
pub mod error;
pub mod memory;

pub mod kdf;
pub mod symmetric;

pub mod totp;

pub use compare::{constant_time_eq, secure_compare};
pub use error::CryptoError;
pub use kdf::{derive, generate_salt, KdfAlgorithm, KdfParams};
pub use memory::{SecretBuffer, SecretBytes};
pub use symmetric::{
    decrypt, decrypt_with_ttl, encrypt, encrypt_at, generate_key, token_timestamp,
    EncryptedToken, VaultKey,
};
pub use totp::{
    decode_secret, generate_hotp, generate_secret, generate_totp, provisioning_uri,
    validate_totp, OtpAlgorithm, OtpDigits,
};
