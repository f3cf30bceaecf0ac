//! Security settings and on-disk layout.
//!
//! [`SecurityConfig`] is plain camelCase JSON at `{config_dir}/security.json`,
//! readable before anything is decrypted. [`StorePaths`] maps each artifact
//! to a file under the config and log directories.

use std::fs;
use std::path::{Path, PathBuf};

use robovault_crypto_core::kdf::{KdfParams, MIN_ITERATIONS, MIN_SALT_LEN};
use serde::{Deserialize, Serialize};

use crate::error::VaultError;
use crate::fs_util;
use crate::guard::GuardPolicy;

// ── Security configuration ─────────────────────────────────────────

/// Tunables for key derivation, lockout and second-factor behaviour.
///
/// Every field has a default, so a partial or older file still loads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecurityConfig {
    /// PBKDF2 iterations for new salts and new passcodes.
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,

    /// Consecutive failures before a lockout.
    #[serde(default = "default_max_failed_attempts")]
    pub max_failed_attempts: u32,

    /// Lockout length in seconds.
    #[serde(default = "default_lockout_duration")]
    pub lockout_duration_secs: u64,

    /// Sliding rate-limit window in seconds.
    #[serde(default = "default_rate_limit_window")]
    pub rate_limit_window_secs: u64,

    /// Requests allowed per window.
    #[serde(default = "default_max_requests")]
    pub max_requests_per_window: u32,

    /// Idle minutes before a session expires.
    #[serde(default = "default_session_timeout")]
    pub session_timeout_minutes: u32,

    /// Issuer shown in authenticator apps.
    #[serde(default = "default_totp_issuer")]
    pub totp_issuer: String,

    /// Require a TOTP code in addition to the passcode once a secret is
    /// enrolled (see `SecureCore::unlock`).
    #[serde(default, rename = "enable2fa")]
    pub enable_2fa: bool,

    /// Write the audit log as one encrypted token per line.
    #[serde(default)]
    pub encrypt_audit_log: bool,

    /// Salt length for new derivation contexts.
    #[serde(default = "default_salt_len")]
    pub salt_len: usize,

    /// Reject weak passwords when opening password-derived stores.
    #[serde(default)]
    pub require_strong_passwords: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            kdf_iterations: default_kdf_iterations(),
            max_failed_attempts: default_max_failed_attempts(),
            lockout_duration_secs: default_lockout_duration(),
            rate_limit_window_secs: default_rate_limit_window(),
            max_requests_per_window: default_max_requests(),
            session_timeout_minutes: default_session_timeout(),
            totp_issuer: default_totp_issuer(),
            enable_2fa: false,
            encrypt_audit_log: false,
            salt_len: default_salt_len(),
            require_strong_passwords: false,
        }
    }
}

const fn default_kdf_iterations() -> u32 {
    480_000
}
const fn default_max_failed_attempts() -> u32 {
    5
}
const fn default_lockout_duration() -> u64 {
    120
}
const fn default_rate_limit_window() -> u64 {
    60
}
const fn default_max_requests() -> u32 {
    5
}
const fn default_session_timeout() -> u32 {
    30
}
fn default_totp_issuer() -> String {
    "RoboBackup Tool".into()
}
const fn default_salt_len() -> usize {
    32
}

const CONFIG_FILE: &str = "security.json";

impl SecurityConfig {
    /// Load from `{config_dir}/security.json`.
    ///
    /// Returns [`Default::default()`] when the file is missing or is not
    /// valid JSON. Values are not validated here; see [`Self::validate`].
    #[must_use]
    pub fn load(config_dir: &Path) -> Self {
        let path = config_dir.join(CONFIG_FILE);
        fs::read_to_string(&path).map_or_else(
            |_| Self::default(),
            |contents| {
                serde_json::from_str(&contents).unwrap_or_else(|e| {
                    tracing::warn!(path = %path.display(), "ignoring unreadable security config: {e}");
                    Self::default()
                })
            },
        )
    }

    /// Persist atomically to `{config_dir}/security.json`, owner-only.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::Storage` if the directory cannot be created or
    /// the write fails.
    pub fn save(&self, config_dir: &Path) -> Result<(), VaultError> {
        let json = serde_json::to_string_pretty(self)?;
        fs_util::write_atomic(&config_dir.join(CONFIG_FILE), json.as_bytes())
    }

    /// Reject values that would weaken or break the guards.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::InvalidConfig` naming the first bad field.
    pub fn validate(&self) -> Result<(), VaultError> {
        let problem = if self.kdf_iterations < MIN_ITERATIONS {
            Some(format!(
                "kdfIterations {} is below the minimum {MIN_ITERATIONS}",
                self.kdf_iterations
            ))
        } else if self.max_failed_attempts == 0 {
            Some("maxFailedAttempts must be at least 1".to_owned())
        } else if self.lockout_duration_secs == 0 {
            Some("lockoutDurationSecs must be at least 1".to_owned())
        } else if self.rate_limit_window_secs == 0 {
            Some("rateLimitWindowSecs must be at least 1".to_owned())
        } else if self.max_requests_per_window == 0 {
            Some("maxRequestsPerWindow must be at least 1".to_owned())
        } else if self.session_timeout_minutes == 0 {
            Some("sessionTimeoutMinutes must be at least 1".to_owned())
        } else if self.salt_len < MIN_SALT_LEN {
            Some(format!(
                "saltLen {} is below the minimum {MIN_SALT_LEN}",
                self.salt_len
            ))
        } else if self.totp_issuer.trim().is_empty() {
            Some("totpIssuer must not be empty".to_owned())
        } else {
            None
        };
        problem.map_or(Ok(()), |msg| Err(VaultError::InvalidConfig(msg)))
    }

    /// KDF parameters for new derivation contexts.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::InvalidConfig` if the iteration count is too low.
    pub fn kdf_params(&self) -> Result<KdfParams, VaultError> {
        KdfParams::pbkdf2(self.kdf_iterations).map_err(|e| VaultError::InvalidConfig(e.to_string()))
    }

    /// Lockout and rate-limit thresholds.
    #[must_use]
    pub fn guard_policy(&self) -> GuardPolicy {
        GuardPolicy {
            max_attempts: self.max_failed_attempts,
            lockout_secs: self.lockout_duration_secs,
            window_secs: self.rate_limit_window_secs,
            max_requests: self.max_requests_per_window,
        }
    }

    /// Session idle timeout in seconds.
    #[must_use]
    pub fn session_timeout_secs(&self) -> u64 {
        u64::from(self.session_timeout_minutes).saturating_mul(60)
    }
}

// ── File layout ────────────────────────────────────────────────────

/// Where each artifact lives.
///
/// Secrets and keys go under `config_dir`; the audit log goes under
/// `log_dir`, which defaults to `config_dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    config_dir: PathBuf,
    log_dir: PathBuf,
}

impl StorePaths {
    /// Everything under one directory.
    #[must_use]
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        let config_dir = config_dir.into();
        Self {
            log_dir: config_dir.clone(),
            config_dir,
        }
    }

    /// Put the audit log somewhere else.
    #[must_use]
    pub fn with_log_dir(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.log_dir = log_dir.into();
        self
    }

    /// Directory holding secrets, keys and `security.json`.
    #[must_use]
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Directory holding the audit log.
    #[must_use]
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Salt for password-derived keys.
    #[must_use]
    pub fn salt_file(&self) -> PathBuf {
        self.config_dir.join("key_salt.bin")
    }

    /// Machine key for the credential store.
    #[must_use]
    pub fn credential_key_file(&self) -> PathBuf {
        self.config_dir.join("credential_key.key")
    }

    /// Machine key for the settings store.
    #[must_use]
    pub fn settings_key_file(&self) -> PathBuf {
        self.config_dir.join("settings_key.key")
    }

    /// Machine key for the encrypted audit log.
    #[must_use]
    pub fn audit_key_file(&self) -> PathBuf {
        self.config_dir.join("audit_key.key")
    }

    /// Network credentials, keyed by share path.
    #[must_use]
    pub fn credentials_file(&self) -> PathBuf {
        self.config_dir.join("credentials.dat")
    }

    /// Encrypted application settings.
    #[must_use]
    pub fn settings_file(&self) -> PathBuf {
        self.config_dir.join("app_settings.dat")
    }

    /// Passcode hash record.
    #[must_use]
    pub fn passcode_file(&self) -> PathBuf {
        self.config_dir.join("passcode.dat")
    }

    /// Append-only audit log.
    #[must_use]
    pub fn audit_log_file(&self) -> PathBuf {
        self.log_dir.join("security_audit.log")
    }

    /// Create both directories.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::Storage` if either cannot be created.
    pub fn ensure_dirs(&self) -> Result<(), VaultError> {
        fs_util::ensure_dir(&self.config_dir)?;
        fs_util::ensure_dir(&self.log_dir)
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = SecurityConfig::default();
        assert_eq!(cfg.kdf_iterations, 480_000);
        assert_eq!(cfg.max_failed_attempts, 5);
        assert_eq!(cfg.lockout_duration_secs, 120);
        assert_eq!(cfg.rate_limit_window_secs, 60);
        assert_eq!(cfg.max_requests_per_window, 5);
        assert_eq!(cfg.session_timeout_minutes, 30);
        assert_eq!(cfg.totp_issuer, "RoboBackup Tool");
        assert!(!cfg.enable_2fa);
        assert!(!cfg.encrypt_audit_log);
        assert_eq!(cfg.salt_len, 32);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn json_uses_camel_case_keys() {
        let json = serde_json::to_value(SecurityConfig::default()).unwrap();
        for key in [
            "kdfIterations",
            "maxFailedAttempts",
            "lockoutDurationSecs",
            "rateLimitWindowSecs",
            "maxRequestsPerWindow",
            "sessionTimeoutMinutes",
            "totpIssuer",
            "enable2fa",
            "encryptAuditLog",
            "saltLen",
        ] {
            assert!(json.get(key).is_some(), "missing key {key}");
        }
    }

    #[test]
    fn partial_file_fills_defaults() {
        let cfg: SecurityConfig =
            serde_json::from_str(r#"{"maxFailedAttempts": 3, "enable2fa": true}"#).unwrap();
        assert_eq!(cfg.max_failed_attempts, 3);
        assert!(cfg.enable_2fa);
        assert_eq!(cfg.kdf_iterations, 480_000);
    }

    #[test]
    fn load_missing_or_corrupt_gives_defaults() {
        let dir = TempDir::new().unwrap();
        assert_eq!(SecurityConfig::load(dir.path()), SecurityConfig::default());
        fs::write(dir.path().join(CONFIG_FILE), "{ not json").unwrap();
        assert_eq!(SecurityConfig::load(dir.path()), SecurityConfig::default());
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let cfg = SecurityConfig {
            kdf_iterations: 200_000,
            lockout_duration_secs: 300,
            totp_issuer: "Branch Office".into(),
            ..SecurityConfig::default()
        };
        cfg.save(dir.path()).unwrap();
        assert_eq!(SecurityConfig::load(dir.path()), cfg);
    }

    #[test]
    fn validation_rejects_weak_values() {
        let bad = [
            SecurityConfig {
                kdf_iterations: 10_000,
                ..SecurityConfig::default()
            },
            SecurityConfig {
                max_failed_attempts: 0,
                ..SecurityConfig::default()
            },
            SecurityConfig {
                rate_limit_window_secs: 0,
                ..SecurityConfig::default()
            },
            SecurityConfig {
                salt_len: 8,
                ..SecurityConfig::default()
            },
            SecurityConfig {
                totp_issuer: " ".into(),
                ..SecurityConfig::default()
            },
        ];
        for cfg in bad {
            assert!(matches!(cfg.validate(), Err(VaultError::InvalidConfig(_))));
        }
    }

    #[test]
    fn derived_settings() {
        let cfg = SecurityConfig::default();
        assert_eq!(cfg.session_timeout_secs(), 1_800);
        assert_eq!(cfg.kdf_params().unwrap().iterations, 480_000);
        let policy = cfg.guard_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.lockout_secs, 120);
    }

    #[test]
    fn paths_resolve_default_names() {
        let paths = StorePaths::new("/cfg").with_log_dir("/logs");
        assert_eq!(paths.salt_file(), Path::new("/cfg/key_salt.bin"));
        assert_eq!(paths.credential_key_file(), Path::new("/cfg/credential_key.key"));
        assert_eq!(paths.credentials_file(), Path::new("/cfg/credentials.dat"));
        assert_eq!(paths.settings_file(), Path::new("/cfg/app_settings.dat"));
        assert_eq!(paths.passcode_file(), Path::new("/cfg/passcode.dat"));
        assert_eq!(paths.audit_log_file(), Path::new("/logs/security_audit.log"));
        assert_eq!(
            StorePaths::new("/cfg").audit_log_file(),
            Path::new("/cfg/security_audit.log")
        );
    }
}
