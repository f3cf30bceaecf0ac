//! Salt files, machine key files and password-derived keys.
//!
//! Two ways to obtain a [`VaultKey`]:
//! - **Key file**: random key persisted raw, owner-only ([`get_or_create_key`]).
//! - **Password**: PBKDF2 over a persisted salt ([`KeyDerivation`]).
//!
//! A salt is written once and never regenerated: a new salt would orphan
//! everything encrypted under keys derived from the old one. The iteration
//! count is recorded next to it in `<salt>.params.json` for the same reason.

use std::path::{Path, PathBuf};

use robovault_crypto_core::kdf::{self, KdfParams, MIN_SALT_LEN};
use robovault_crypto_core::symmetric::{self, KEY_LEN};
use robovault_crypto_core::VaultKey;

use crate::error::VaultError;
use crate::fs_util;

// ── Salt ───────────────────────────────────────────────────────────

/// Read the salt at `path`, creating it with `len` random bytes if absent.
///
/// Idempotent: once created, every call returns the same bytes.
///
/// # Errors
///
/// - `VaultError::Storage` if the file or its directory cannot be read,
///   created or written
/// - `VaultError::CorruptRecord` if an existing salt is shorter than 16 bytes
/// - `VaultError::Crypto` if `len` is below 16 or the CSPRNG fails
pub fn get_or_create_salt(path: &Path, len: usize) -> Result<Vec<u8>, VaultError> {
    if let Some(existing) = fs_util::read_optional(path)? {
        if existing.len() < MIN_SALT_LEN {
            return Err(VaultError::CorruptRecord(format!(
                "salt file {} holds {} bytes (minimum {MIN_SALT_LEN})",
                path.display(),
                existing.len()
            )));
        }
        return Ok(existing);
    }

    let salt = kdf::generate_salt(len)?;
    fs_util::write_atomic(path, &salt)?;
    tracing::info!(path = %path.display(), len, "created new key-derivation salt");
    Ok(salt)
}

/// Derive a vault key from `password` and `salt`.
///
/// # Errors
///
/// Returns `VaultError::Crypto` if the salt is too short or `iterations` is
/// below 100 000.
pub fn derive_key(password: &str, salt: &[u8], iterations: u32) -> Result<VaultKey, VaultError> {
    let params = KdfParams::pbkdf2(iterations)?;
    Ok(kdf::derive(password.as_bytes(), salt, &params)?)
}

fn params_path(salt_path: &Path) -> PathBuf {
    let mut name = salt_path.as_os_str().to_owned();
    name.push(".params.json");
    PathBuf::from(name)
}

/// Record `params` for the salt at `salt_path`, or check them against what
/// was recorded earlier.
fn bind_params(salt_path: &Path, params: &KdfParams) -> Result<(), VaultError> {
    let path = params_path(salt_path);
    match fs_util::read_optional(&path)? {
        Some(bytes) => {
            let recorded: KdfParams = serde_json::from_slice(&bytes).map_err(|e| {
                VaultError::CorruptRecord(format!("{}: {e}", path.display()))
            })?;
            if &recorded != params {
                return Err(VaultError::InvalidConfig(format!(
                    "salt {} was created for {} iterations but {} were requested; \
                     re-key the store explicitly to change it",
                    salt_path.display(),
                    recorded.iterations,
                    params.iterations
                )));
            }
            Ok(())
        }
        None => {
            let json = serde_json::to_vec(params)?;
            fs_util::write_atomic(&path, &json)
        }
    }
}

// ── Derivation context ─────────────────────────────────────────────

/// A salt file bound to one set of KDF parameters.
///
/// Opening is cheap; [`Self::derive_key`] is deliberately slow.
#[derive(Debug, Clone)]
pub struct KeyDerivation {
    salt_path: PathBuf,
    salt: Vec<u8>,
    params: KdfParams,
}

impl KeyDerivation {
    /// Load or create the salt at `salt_path` and bind it to `params`.
    ///
    /// # Errors
    ///
    /// - `VaultError::InvalidConfig` if the salt was created with different
    ///   parameters
    /// - anything [`get_or_create_salt`] returns
    pub fn open(salt_path: &Path, params: KdfParams, salt_len: usize) -> Result<Self, VaultError> {
        params.validate()?;
        let salt = get_or_create_salt(salt_path, salt_len)?;
        bind_params(salt_path, &params)?;
        Ok(Self {
            salt_path: salt_path.to_path_buf(),
            salt,
            params,
        })
    }

    /// Stretch `password` into a key.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::Crypto` if derivation fails.
    pub fn derive_key(&self, password: &str) -> Result<VaultKey, VaultError> {
        Ok(kdf::derive(password.as_bytes(), &self.salt, &self.params)?)
    }

    /// Salt bytes in use.
    #[must_use]
    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    /// Parameters bound to the salt.
    #[must_use]
    pub const fn params(&self) -> &KdfParams {
        &self.params
    }

    /// Location of the salt file.
    #[must_use]
    pub fn salt_path(&self) -> &Path {
        &self.salt_path
    }
}

// ── Key files ──────────────────────────────────────────────────────

/// Read the raw key at `path`, generating and persisting one if absent.
///
/// # Errors
///
/// - `VaultError::Storage` on I/O failure
/// - `VaultError::CorruptRecord` if the file is not exactly 32 bytes
pub fn get_or_create_key(path: &Path) -> Result<VaultKey, VaultError> {
    if let Some(mut existing) = fs_util::read_optional(path)? {
        let key = VaultKey::from_slice(&existing).map_err(|_| {
            VaultError::CorruptRecord(format!(
                "key file {} holds {} bytes (expected {KEY_LEN})",
                path.display(),
                existing.len()
            ))
        });
        zeroize::Zeroize::zeroize(&mut existing);
        return key;
    }

    let key = symmetric::generate_key()?;
    fs_util::write_atomic(path, key.expose())?;
    tracing::info!(path = %path.display(), "generated new key file");
    Ok(key)
}

/// Result of [`verify_key_protection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyProtection {
    /// Present, correct length, owner-only.
    Protected,
    /// No key file.
    Missing,
    /// Present but not a 32-byte key.
    WrongLength(usize),
    /// Readable or writable by group/other (Unix mode bits).
    Exposed {
        /// Permission bits found on the file.
        mode: u32,
    },
}

impl KeyProtection {
    /// `true` only for [`KeyProtection::Protected`].
    #[must_use]
    pub const fn is_protected(self) -> bool {
        matches!(self, Self::Protected)
    }
}

/// Check that the key file at `path` exists, has the right length and is
/// not accessible to other accounts.
///
/// # Errors
///
/// Returns `VaultError::Storage` if the file exists but cannot be read.
pub fn verify_key_protection(path: &Path) -> Result<KeyProtection, VaultError> {
    let Some(mut bytes) = fs_util::read_optional(path)? else {
        return Ok(KeyProtection::Missing);
    };
    let len = bytes.len();
    zeroize::Zeroize::zeroize(&mut bytes);
    if len != KEY_LEN {
        return Ok(KeyProtection::WrongLength(len));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(path)
            .map_err(|e| VaultError::storage(path, e))?
            .permissions()
            .mode()
            & 0o777;
        if mode & 0o077 != 0 {
            return Ok(KeyProtection::Exposed { mode });
        }
    }

    Ok(KeyProtection::Protected)
}

// ── Tests ──────────────────────────────────────────────────────────
