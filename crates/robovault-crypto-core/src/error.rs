//! Cryptographic error types for `robovault-crypto-core`.

use thiserror::Error;

/// Errors produced by cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key derivation failed (iteration floor, salt length).
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Sealing failure (AES-256-GCM setup or encryption).
    #[error("encryption error: {0}")]
    Encryption(String),

    /// Authentication tag verification failed: token tampered or wrong key.
    #[error("decryption failed: authentication tag mismatch")]
    Decryption,

    /// Token is not something this crate produced: bad encoding, unknown
    /// format marker, or truncated.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// Token authenticated but falls outside the accepted time window.
    #[error("token expired: issued {age_secs}s ago")]
    TokenExpired {
        /// Seconds between issue time and the check (saturating; 0 for future tokens).
        age_secs: u64,
    },

    /// Invalid key material (wrong length, corrupted bytes).
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),

    /// TOTP/HOTP generation or validation error.
    #[error("OTP error: {0}")]
    Otp(String),

    /// CSPRNG or secure buffer failure.
    #[error("secure memory error: {0}")]
    SecureMemory(String),
}
