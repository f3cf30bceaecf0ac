//! Application access passcode.
//!
//! Only a salted PBKDF2 hash is stored, in `passcode.dat`:
//!
//! ```text
//! <iterations>:<base64 salt>:<base64 hash>
//! ```
//!
//! A fresh salt accompanies every new hash. The file's absence means the
//! application is unprotected. Verification always goes through the
//! [`LockoutGuard`] first; while locked out the stored hash is not even read.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use data_encoding::BASE64;
use robovault_crypto_core::kdf::{self, KdfParams, MIN_ITERATIONS, OUTPUT_LEN};
use robovault_crypto_core::{constant_time_eq, SecretBytes};

use crate::audit::{events, AuditStatus, AuditTrail};
use crate::error::VaultError;
use crate::fs_util;
use crate::guard::{LockoutGuard, LockoutStatus};

/// Salt length for passcode hashes.
pub const PASSCODE_SALT_LEN: usize = 16;

/// Guard identifier for change and clear operations, which have no caller
/// identity of their own.
pub const CHANGE_IDENTIFIER: &str = "passcode-change";

struct PasscodeRecord {
    iterations: u32,
    salt: Vec<u8>,
    hash: SecretBytes<OUTPUT_LEN>,
}

impl PasscodeRecord {
    fn create(passcode: &str, iterations: u32) -> Result<Self, VaultError> {
        let salt = kdf::generate_salt(PASSCODE_SALT_LEN)?;
        let hash = kdf::derive(passcode.as_bytes(), &salt, &KdfParams::pbkdf2(iterations)?)?;
        Ok(Self {
            iterations,
            salt,
            hash,
        })
    }

    fn matches(&self, attempt: &str) -> Result<bool, VaultError> {
        let computed = kdf::derive(
            attempt.as_bytes(),
            &self.salt,
            &KdfParams::pbkdf2(self.iterations)?,
        )?;
        Ok(constant_time_eq(computed.expose(), self.hash.expose()))
    }

    fn encode(&self) -> String {
        format!(
            "{}:{}:{}",
            self.iterations,
            BASE64.encode(&self.salt),
            BASE64.encode(self.hash.expose())
        )
    }

    fn parse(text: &str) -> Result<Self, VaultError> {
        let corrupt = |what: &str| VaultError::CorruptRecord(format!("passcode file: {what}"));
        let mut parts = text.trim().split(':');
        let (Some(iterations), Some(salt), Some(hash), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(corrupt("expected iterations:salt:hash"));
        };

        let iterations: u32 = iterations
            .parse()
            .map_err(|_| corrupt("iteration count is not a number"))?;
        if iterations < MIN_ITERATIONS {
            return Err(corrupt("iteration count below minimum"));
        }
        let salt = BASE64
            .decode(salt.as_bytes())
            .map_err(|_| corrupt("salt is not base64"))?;
        if salt.len() < PASSCODE_SALT_LEN {
            return Err(corrupt("salt too short"));
        }
        let hash = BASE64
            .decode(hash.as_bytes())
            .map_err(|_| corrupt("hash is not base64"))
            .and_then(|bytes| {
                SecretBytes::from_slice(&bytes).map_err(|_| corrupt("hash has wrong length"))
            })?;
        Ok(Self {
            iterations,
            salt,
            hash,
        })
    }
}

/// Stores and checks the access passcode.
pub struct PasscodeAuthenticator {
    path: PathBuf,
    iterations: u32,
    guard: Arc<LockoutGuard>,
    audit: Option<Arc<AuditTrail>>,
}

impl std::fmt::Debug for PasscodeAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasscodeAuthenticator")
            .field("path", &self.path)
            .field("iterations", &self.iterations)
            .finish_non_exhaustive()
    }
}

impl PasscodeAuthenticator {
    /// Authenticator for the record at `path`. New hashes use `iterations`;
    /// existing records keep the count they were written with.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::InvalidConfig` if `iterations` is below 100 000.
    pub fn new(
        path: impl Into<PathBuf>,
        iterations: u32,
        guard: Arc<LockoutGuard>,
    ) -> Result<Self, VaultError> {
        if iterations < MIN_ITERATIONS {
            return Err(VaultError::InvalidConfig(format!(
                "passcode iterations {iterations} below minimum {MIN_ITERATIONS}"
            )));
        }
        Ok(Self {
            path: path.into(),
            iterations,
            guard,
            audit: None,
        })
    }

    /// Record every outcome in `audit`.
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<AuditTrail>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Passcode file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn audit(&self, event: &str, identifier: &str, details: &str, status: AuditStatus) {
        if let Some(audit) = &self.audit {
            audit.log_event(event, identifier, details, status);
        }
    }

    fn read_record(&self) -> Result<Option<PasscodeRecord>, VaultError> {
        let Some(raw) = fs_util::read_optional(&self.path)? else {
            return Ok(None);
        };
        let text = String::from_utf8(raw)
            .map_err(|_| VaultError::CorruptRecord("passcode file is not text".into()))?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        PasscodeRecord::parse(&text).map(Some)
    }

    /// Whether a passcode is configured. A missing or empty file means
    /// no; a well-formed record means yes.
    ///
    /// # Errors
    ///
    /// - `VaultError::Storage` if the file exists but cannot be read
    /// - `VaultError::CorruptRecord` if the record is malformed
    pub fn has_passcode(&self) -> Result<bool, VaultError> {
        self.read_record()
            .map(|record| record.is_some())
            .inspect_err(|e| {
                tracing::warn!(path = %self.path.display(), "unusable passcode record: {e}");
            })
    }

    /// Check `current` against the existing record before a change.
    fn authorize_change(
        &self,
        existing: &PasscodeRecord,
        current: Option<&str>,
        event: &str,
    ) -> Result<(), VaultError> {
        if let LockoutStatus::Locked { remaining_seconds } =
            self.guard.check_lockout(CHANGE_IDENTIFIER)
        {
            return Err(VaultError::LockedOut { remaining_seconds });
        }
        let authorized = match current {
            Some(current) => existing.matches(current)?,
            None => false,
        };
        if authorized {
            self.guard.reset(CHANGE_IDENTIFIER);
            Ok(())
        } else {
            self.guard.record_failure(CHANGE_IDENTIFIER);
            self.audit(
                event,
                CHANGE_IDENTIFIER,
                "current passcode did not match",
                AuditStatus::Failed,
            );
            Err(VaultError::Authorization)
        }
    }

    /// Set or change the passcode.
    ///
    /// When a passcode already exists, `current` must match it; `None` is
    /// treated as a mismatch.
    ///
    /// # Errors
    ///
    /// - `VaultError::Authorization` if `current` does not match
    /// - `VaultError::LockedOut` after too many mismatches
    /// - `VaultError::CorruptRecord` if the existing record is unreadable
    /// - `VaultError::Storage` if the record cannot be written
    pub fn set_passcode(&self, new_passcode: &str, current: Option<&str>) -> Result<(), VaultError> {
        fs_util::with_file_lock(&self.path, || self.replace_record(new_passcode, current))
    }

    fn replace_record(&self, new_passcode: &str, current: Option<&str>) -> Result<(), VaultError> {
        let existing = self.read_record()?;
        if let Some(existing) = &existing {
            self.authorize_change(existing, current, events::PASSCODE_SET)?;
        }

        let record = PasscodeRecord::create(new_passcode, self.iterations)?;
        fs_util::write_atomic(&self.path, record.encode().as_bytes())?;

        let details = if existing.is_some() {
            "passcode changed"
        } else {
            "passcode enabled"
        };
        tracing::info!(path = %self.path.display(), "{details}");
        self.audit(events::PASSCODE_SET, CHANGE_IDENTIFIER, details, AuditStatus::Success);
        Ok(())
    }

    /// Remove passcode protection after checking `current`.
    ///
    /// # Errors
    ///
    /// - `VaultError::PasscodeNotSet` if there is nothing to clear
    /// - otherwise as [`Self::set_passcode`]
    pub fn clear_passcode(&self, current: &str) -> Result<(), VaultError> {
        fs_util::with_file_lock(&self.path, || self.remove_record(current))
    }

    fn remove_record(&self, current: &str) -> Result<(), VaultError> {
        let existing = self.read_record()?.ok_or(VaultError::PasscodeNotSet)?;
        self.authorize_change(&existing, Some(current), events::PASSCODE_CLEAR)?;
        fs_util::remove_if_exists(&self.path)?;
        tracing::info!(path = %self.path.display(), "passcode disabled");
        self.audit(
            events::PASSCODE_CLEAR,
            CHANGE_IDENTIFIER,
            "passcode disabled",
            AuditStatus::Success,
        );
        Ok(())
    }

    /// Check `attempt` on behalf of `identifier`.
    ///
    /// Order: lockout, rate limit, load record, slow hash, constant-time
    /// compare, record outcome. Only a completed comparison yields a
    /// boolean.
    ///
    /// # Errors
    ///
    /// - `VaultError::LockedOut` while locked out (hash not read)
    /// - `VaultError::RateLimited` when the sliding window is full
    /// - `VaultError::PasscodeNotSet` if no passcode is configured
    /// - `VaultError::CorruptRecord` / `VaultError::Storage` if the record
    ///   cannot be read
    pub fn verify(&self, attempt: &str, identifier: &str) -> Result<bool, VaultError> {
        if let LockoutStatus::Locked { remaining_seconds } = self.guard.check_lockout(identifier) {
            return Err(VaultError::LockedOut { remaining_seconds });
        }
        if !self.guard.check_rate_limit(identifier) {
            return Err(VaultError::RateLimited);
        }
        let record = self.read_record()?.ok_or(VaultError::PasscodeNotSet)?;

        if record.matches(attempt)? {
            self.guard.reset(identifier);
            self.audit(
                events::PASSCODE_VERIFY,
                identifier,
                "passcode accepted",
                AuditStatus::Success,
            );
            Ok(true)
        } else {
            let locked = self.guard.record_failure(identifier);
            tracing::warn!(identifier, locked, "wrong passcode");
            self.audit(
                events::PASSCODE_VERIFY,
                identifier,
                "wrong passcode",
                AuditStatus::Failed,
            );
            Ok(false)
        }
    }
}
