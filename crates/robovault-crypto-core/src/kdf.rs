//! PBKDF2-HMAC-SHA256 key derivation.
//!
//! This module provides:
//! - [`derive`] — stretch a password + salt into a 256-bit key
//! - [`generate_salt`] — CSPRNG salt of a caller-chosen length
//! - [`KdfParams`] — serializable parameter set (persisted next to the salt)
//!
//! # Iteration floor
//!
//! [`MIN_ITERATIONS`] is enforced here, not by callers. A derivation context
//! is bound to the iteration count it was created with; changing it derives a
//! different key, so the store layer records the count and refuses to open a
//! context with a different one.

use crate::error::CryptoError;
use crate::memory::SecretBytes;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroize;

/// Output length of the KDF in bytes (256 bits).
pub const OUTPUT_LEN: usize = 32;

/// Minimum salt length in bytes.
pub const MIN_SALT_LEN: usize = 16;

/// Salt length used when creating a new derivation context.
pub const DEFAULT_SALT_LEN: usize = 32;

/// Lowest iteration count accepted for any derivation.
pub const MIN_ITERATIONS: u32 = 100_000;

/// Iteration count for new contexts (OWASP 2023 guidance for PBKDF2-SHA256).
pub const DEFAULT_ITERATIONS: u32 = 480_000;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// KDF algorithm identifier, persisted so a future algorithm can coexist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum KdfAlgorithm {
    /// PBKDF2 with HMAC-SHA256.
    #[serde(rename = "pbkdf2-sha256")]
    Pbkdf2Sha256,
}

/// Parameters bound to one salt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Hash construction.
    pub algorithm: KdfAlgorithm,
    /// PBKDF2 iteration count.
    pub iterations: u32,
}

impl KdfParams {
    /// PBKDF2-SHA256 with the given iteration count.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::KeyDerivation` if `iterations` is below
    /// [`MIN_ITERATIONS`].
    pub fn pbkdf2(iterations: u32) -> Result<Self, CryptoError> {
        let params = Self {
            algorithm: KdfAlgorithm::Pbkdf2Sha256,
            iterations,
        };
        params.validate()?;
        Ok(params)
    }

    /// Check the iteration floor.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::KeyDerivation` if `iterations` is below
    /// [`MIN_ITERATIONS`].
    pub fn validate(&self) -> Result<(), CryptoError> {
        if self.iterations < MIN_ITERATIONS {
            return Err(CryptoError::KeyDerivation(format!(
                "iteration count {} below minimum {MIN_ITERATIONS}",
                self.iterations
            )));
        }
        Ok(())
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            algorithm: KdfAlgorithm::Pbkdf2Sha256,
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

// ---------------------------------------------------------------------------
// Core KDF
// ---------------------------------------------------------------------------

/// Derive a 256-bit key from a password and salt.
///
/// Deliberately slow (hundreds of milliseconds at the default count); GUI
/// callers should run it off the event thread. Empty passwords are accepted;
/// password policy belongs to the caller.
///
/// # Errors
///
/// Returns `CryptoError::KeyDerivation` if the salt is shorter than
/// [`MIN_SALT_LEN`] or the iteration count is below [`MIN_ITERATIONS`].
pub fn derive(
    password: &[u8],
    salt: &[u8],
    params: &KdfParams,
) -> Result<SecretBytes<OUTPUT_LEN>, CryptoError> {
    if salt.len() < MIN_SALT_LEN {
        return Err(CryptoError::KeyDerivation(format!(
            "salt too short: {} bytes (minimum {MIN_SALT_LEN})",
            salt.len()
        )));
    }
    params.validate()?;

    let mut output = [0u8; OUTPUT_LEN];
    match params.algorithm {
        KdfAlgorithm::Pbkdf2Sha256 => {
            pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, params.iterations, &mut output);
        }
    }

    let key = SecretBytes::new(output);
    output.zeroize();
    Ok(key)
}

/// Generate a random salt of `len` bytes.
///
/// # Errors
///
/// Returns `CryptoError::KeyDerivation` if `len` is below [`MIN_SALT_LEN`],
/// or `CryptoError::SecureMemory` if the CSPRNG fails.
pub fn generate_salt(len: usize) -> Result<Vec<u8>, CryptoError> {
    if len < MIN_SALT_LEN {
        return Err(CryptoError::KeyDerivation(format!(
            "salt length {len} below minimum {MIN_SALT_LEN}"
        )));
    }
    let mut salt = vec![0u8; len];
    OsRng
        .try_fill_bytes(&mut salt)
        .map_err(|e| CryptoError::SecureMemory(format!("CSPRNG fill failed: {e}")))?;
    Ok(salt)
}
