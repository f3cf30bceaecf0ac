//! Store error types for `robovault-secure-store`.

use std::path::{Path, PathBuf};

use robovault_crypto_core::CryptoError;
use thiserror::Error;

use crate::strength::StrengthViolation;

/// Errors produced by store, passcode and guard operations.
///
/// Lockout and rate limiting are errors rather than a `false` from
/// `verify`, so a UI can show a countdown instead of "wrong passcode".
#[derive(Debug, Error)]
pub enum VaultError {
    /// A required file or directory could not be read, written or created.
    #[error("storage error at {}: {source}", path.display())]
    Storage {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Decryption failed: wrong key, or the file was corrupted or tampered
    /// with. Never used for "file does not exist yet".
    #[error("authentication failed: wrong key or corrupted data")]
    Authentication,

    /// The supplied current passcode did not match during a change.
    #[error("current passcode does not match")]
    Authorization,

    /// Too many consecutive failures; attempts are refused until the
    /// lockout expires.
    #[error("locked out: {remaining_seconds}s remaining")]
    LockedOut {
        /// Seconds until attempts are accepted again.
        remaining_seconds: u64,
    },

    /// Too many requests inside the sliding window.
    #[error("rate limited: too many attempts, slow down")]
    RateLimited,

    /// No passcode has been configured.
    #[error("no passcode configured")]
    PasscodeNotSet,

    /// No TOTP secret has been enrolled.
    #[error("no TOTP secret enrolled")]
    TotpNotEnrolled,

    /// The passcode was correct but a TOTP code is also required.
    #[error("authenticator code required")]
    SecondFactorRequired,

    /// A persisted record (passcode file, salt, key file, params sidecar)
    /// is malformed.
    #[error("corrupt record: {0}")]
    CorruptRecord(String),

    /// Configuration is invalid, or conflicts with what is on disk.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Password rejected by the strength policy.
    #[error("weak password: {0}")]
    WeakPassword(#[from] StrengthViolation),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Cryptographic failure other than authentication.
    #[error(transparent)]
    Crypto(CryptoError),
}

impl VaultError {
    pub(crate) fn storage(path: &Path, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl From<CryptoError> for VaultError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Decryption
            | CryptoError::InvalidToken(_)
            | CryptoError::TokenExpired { .. } => Self::Authentication,
            other => Self::Crypto(other),
        }
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authentication_failures_collapse_to_authentication() {
        let cases = [
            CryptoError::Decryption,
            CryptoError::InvalidToken("bad marker".into()),
            CryptoError::TokenExpired { age_secs: 5 },
        ];
        for err in cases {
            assert!(matches!(VaultError::from(err), VaultError::Authentication));
        }
    }

    #[test]
    fn other_crypto_errors_are_preserved() {
        let err = VaultError::from(CryptoError::KeyDerivation("salt too short".into()));
        assert!(matches!(err, VaultError::Crypto(CryptoError::KeyDerivation(_))));
        assert!(err.to_string().contains("salt too short"));
    }

    #[test]
    fn lockout_message_carries_countdown() {
        let err = VaultError::LockedOut {
            remaining_seconds: 42,
        };
        assert_eq!(err.to_string(), "locked out: 42s remaining");
    }

    #[test]
    fn storage_error_names_path() {
        let err = VaultError::storage(
            Path::new("/tmp/x/credentials.dat"),
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        assert!(err.to_string().contains("credentials.dat"));
    }
}
