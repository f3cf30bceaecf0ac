//! One handle over every store, guard and log the backup tool needs.
//!
//! [`SecureCore`] is opened from a [`StorePaths`] and a [`SecurityConfig`].
//! Credentials and settings are sealed under machine key files; the
//! passcode and TOTP checks share one [`LockoutGuard`]; every significant
//! operation lands in the [`AuditTrail`].

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::audit::{events, AuditStatus, AuditTrail};
use crate::clock::{Clock, SystemClock};
use crate::config::{SecurityConfig, StorePaths};
use crate::error::VaultError;
use crate::guard::{LockoutGuard, LockoutStatus};
use crate::identity::{IdentityProvider, MachineIdentity};
use crate::key_files::{get_or_create_key, verify_key_protection, KeyDerivation, KeyProtection};
use crate::log_sink::{default_sink, LogSink};
use crate::passcode::PasscodeAuthenticator;
use crate::secret_store::SecretStore;
use crate::session::SessionRegistry;
use crate::strength::validate_password_strength;
use crate::totp_provider::TotpProvider;

/// Settings-store entry holding the enrolled TOTP secret.
pub const TOTP_SECRET_KEY: &str = "totp_secret";

// ── Value types ────────────────────────────────────────────────────

/// Login for a network share, stored as JSON under the share path.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkCredential {
    /// Account name, optionally `DOMAIN\user`.
    pub username: String,
    /// Account password.
    pub password: String,
}

impl std::fmt::Debug for NetworkCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkCredential")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// What an authenticator app needs to enroll.
#[derive(Clone, PartialEq, Eq)]
pub struct TotpEnrollment {
    /// Base32 secret for manual entry.
    pub secret: String,
    /// `otpauth://` URI for the QR code.
    pub uri: String,
}

impl std::fmt::Debug for TotpEnrollment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TotpEnrollment").finish_non_exhaustive()
    }
}

// ── Builder ────────────────────────────────────────────────────────

/// Collaborators for [`SecureCore`]; anything not set gets the production
/// default.
pub struct SecureCoreBuilder {
    paths: StorePaths,
    config: Option<SecurityConfig>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn LogSink>,
    identity: Arc<dyn IdentityProvider>,
}

impl SecureCoreBuilder {
    /// Use `config` instead of reading `security.json`.
    #[must_use]
    pub fn config(mut self, config: SecurityConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Time source for lockouts, TOTP and sessions.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Destination for store and audit diagnostics.
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Identifier used for lockout bookkeeping and audit records.
    #[must_use]
    pub fn identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = identity;
        self
    }

    /// Validate the configuration, create directories and key files, and
    /// wire the components together.
    ///
    /// # Errors
    ///
    /// - `VaultError::InvalidConfig` if the configuration is rejected
    /// - `VaultError::Storage` if a directory or key file cannot be created
    /// - `VaultError::CorruptRecord` if an existing key file is damaged
    pub fn open(self) -> Result<SecureCore, VaultError> {
        let Self {
            paths,
            config,
            clock,
            sink,
            identity,
        } = self;
        let config = config.unwrap_or_else(|| SecurityConfig::load(paths.config_dir()));
        config.validate()?;
        paths.ensure_dirs()?;

        let audit = if config.encrypt_audit_log {
            let key = get_or_create_key(&paths.audit_key_file())?;
            AuditTrail::encrypted(paths.audit_log_file(), key)
        } else {
            AuditTrail::plain(paths.audit_log_file())
        };
        let audit = Arc::new(audit.with_sink(Arc::clone(&sink)));

        let guard = Arc::new(
            LockoutGuard::new(config.guard_policy(), Arc::clone(&clock))
                .with_audit(Arc::clone(&audit)),
        );

        let credentials = SecretStore::new(
            paths.credentials_file(),
            get_or_create_key(&paths.credential_key_file())?,
        )
        .with_sink(Arc::clone(&sink));
        let settings = SecretStore::new(
            paths.settings_file(),
            get_or_create_key(&paths.settings_key_file())?,
        )
        .with_sink(Arc::clone(&sink));

        let passcode =
            PasscodeAuthenticator::new(paths.passcode_file(), config.kdf_iterations, Arc::clone(&guard))?
                .with_audit(Arc::clone(&audit));
        let totp = TotpProvider::with_clock(config.totp_issuer.clone(), Arc::clone(&clock));
        let sessions = SessionRegistry::with_clock(config.session_timeout_secs(), Arc::clone(&clock));

        tracing::info!(
            config_dir = %paths.config_dir().display(),
            encrypted_audit = config.encrypt_audit_log,
            "secure core opened"
        );

        Ok(SecureCore {
            paths,
            config,
            sink,
            identity,
            audit,
            guard,
            credentials: Arc::new(credentials),
            settings: Arc::new(settings),
            passcode,
            totp,
            sessions,
        })
    }
}

// ── Facade ─────────────────────────────────────────────────────────

/// Secure storage and authentication for one installation.
pub struct SecureCore {
    paths: StorePaths,
    config: SecurityConfig,
    sink: Arc<dyn LogSink>,
    identity: Arc<dyn IdentityProvider>,
    audit: Arc<AuditTrail>,
    guard: Arc<LockoutGuard>,
    credentials: Arc<SecretStore>,
    settings: Arc<SecretStore>,
    passcode: PasscodeAuthenticator,
    totp: TotpProvider,
    sessions: SessionRegistry,
}

impl std::fmt::Debug for SecureCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureCore")
            .field("paths", &self.paths)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SecureCore {
    /// Builder rooted at `paths`, with system clock, `tracing` sink and
    /// machine identity.
    #[must_use]
    pub fn builder(paths: StorePaths) -> SecureCoreBuilder {
        SecureCoreBuilder {
            paths,
            config: None,
            clock: Arc::new(SystemClock),
            sink: default_sink(),
            identity: Arc::new(MachineIdentity),
        }
    }

    /// Open with every default.
    ///
    /// # Errors
    ///
    /// As [`SecureCoreBuilder::open`].
    pub fn open(paths: StorePaths) -> Result<Self, VaultError> {
        Self::builder(paths).open()
    }

    fn who(&self) -> String {
        self.identity.identifier()
    }

    // ── Accessors ──────────────────────────────────────────────────

    /// File layout in use.
    #[must_use]
    pub const fn paths(&self) -> &StorePaths {
        &self.paths
    }

    /// Configuration in force.
    #[must_use]
    pub const fn config(&self) -> &SecurityConfig {
        &self.config
    }

    /// Shared audit log.
    #[must_use]
    pub fn audit(&self) -> Arc<AuditTrail> {
        Arc::clone(&self.audit)
    }

    /// Shared lockout guard.
    #[must_use]
    pub fn guard(&self) -> Arc<LockoutGuard> {
        Arc::clone(&self.guard)
    }

    /// Network credential store.
    #[must_use]
    pub fn credentials(&self) -> Arc<SecretStore> {
        Arc::clone(&self.credentials)
    }

    /// Application settings store.
    #[must_use]
    pub fn settings(&self) -> Arc<SecretStore> {
        Arc::clone(&self.settings)
    }

    /// Passcode authenticator.
    #[must_use]
    pub const fn passcode(&self) -> &PasscodeAuthenticator {
        &self.passcode
    }

    /// TOTP helper with the configured issuer.
    #[must_use]
    pub const fn totp(&self) -> &TotpProvider {
        &self.totp
    }

    // ── Network credentials ────────────────────────────────────────

    /// Save the login for `share_path`, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Propagates store errors; nothing is ever written unencrypted.
    pub fn store_network_credential(
        &self,
        share_path: &str,
        username: &str,
        password: &str,
    ) -> Result<(), VaultError> {
        let json = serde_json::to_string(&NetworkCredential {
            username: username.to_owned(),
            password: password.to_owned(),
        })?;
        let result = self.credentials.set(share_path, &json);
        let status = if result.is_ok() {
            AuditStatus::Success
        } else {
            AuditStatus::Error
        };
        self.audit.log_event(
            events::CREDENTIAL_STORE,
            &self.who(),
            &format!("credential stored for {share_path}"),
            status,
        );
        result
    }

    /// Login saved for `share_path`, if any.
    ///
    /// # Errors
    ///
    /// - `VaultError::Authentication` if the store cannot be decrypted
    /// - `VaultError::Serialization` if the entry is not a credential
    pub fn network_credential(&self, share_path: &str) -> Result<Option<NetworkCredential>, VaultError> {
        let Some(json) = self.credentials.get(share_path)? else {
            return Ok(None);
        };
        let credential: NetworkCredential = serde_json::from_str(&json)?;
        self.audit.log_event(
            events::CREDENTIAL_ACCESS,
            &self.who(),
            &format!("credential read for {share_path}"),
            AuditStatus::Success,
        );
        Ok(Some(credential))
    }

    /// Forget the login for `share_path`; returns whether one existed.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    pub fn remove_network_credential(&self, share_path: &str) -> Result<bool, VaultError> {
        let removed = self.credentials.delete(share_path)?;
        if removed {
            self.audit.log_event(
                events::CREDENTIAL_STORE,
                &self.who(),
                &format!("credential removed for {share_path}"),
                AuditStatus::Success,
            );
        }
        Ok(removed)
    }

    // ── Passcode ───────────────────────────────────────────────────

    /// Check the access passcode for the current identity.
    ///
    /// # Errors
    ///
    /// As [`PasscodeAuthenticator::verify`].
    pub fn verify_passcode(&self, attempt: &str) -> Result<bool, VaultError> {
        self.passcode.verify(attempt, &self.who())
    }

    /// Unlock the application: the passcode, then a TOTP code when
    /// [`Self::is_2fa_enabled`].
    ///
    /// `Ok(false)` means a factor was wrong. A correct passcode without a
    /// required code is `SecondFactorRequired`.
    ///
    /// # Errors
    ///
    /// - `VaultError::SecondFactorRequired` when `totp` is `None` but a
    ///   code is required
    /// - as [`Self::verify_passcode`] and [`Self::verify_totp`]
    pub fn unlock(&self, passcode: &str, totp: Option<&str>) -> Result<bool, VaultError> {
        if !self.verify_passcode(passcode)? {
            return Ok(false);
        }
        if !self.is_2fa_enabled()? {
            return Ok(true);
        }
        let token = totp.ok_or(VaultError::SecondFactorRequired)?;
        self.verify_totp(token)
    }

    // ── Second factor ──────────────────────────────────────────────

    /// Generate and store a new TOTP secret for `account`, replacing any
    /// previous enrollment.
    ///
    /// # Errors
    ///
    /// Propagates CSPRNG and store errors.
    pub fn enroll_totp(&self, account: &str) -> Result<TotpEnrollment, VaultError> {
        let secret = self.totp.generate_secret()?;
        self.settings.set(TOTP_SECRET_KEY, &secret)?;
        let uri = self
            .totp
            .provisioning_uri(&secret, account, self.totp.issuer());
        self.audit.log_event(
            events::TOTP_ENROLL,
            &self.who(),
            &format!("authenticator enrolled for {account}"),
            AuditStatus::Success,
        );
        Ok(TotpEnrollment { secret, uri })
    }

    /// Whether a TOTP secret is enrolled.
    ///
    /// # Errors
    ///
    /// Propagates settings-store errors.
    pub fn is_totp_enrolled(&self) -> Result<bool, VaultError> {
        self.settings.contains(TOTP_SECRET_KEY)
    }

    /// Whether [`Self::unlock`] demands a TOTP code: `enable2fa` is set and
    /// a secret is enrolled.
    ///
    /// # Errors
    ///
    /// Propagates settings-store errors.
    pub fn is_2fa_enabled(&self) -> Result<bool, VaultError> {
        if !self.config.enable_2fa {
            return Ok(false);
        }
        self.is_totp_enrolled()
    }

    /// Remove the enrolled secret; returns whether one existed.
    ///
    /// # Errors
    ///
    /// Propagates settings-store errors.
    pub fn disable_totp(&self) -> Result<bool, VaultError> {
        let removed = self.settings.delete(TOTP_SECRET_KEY)?;
        if removed {
            self.audit.log_event(
                events::TOTP_ENROLL,
                &self.who(),
                "authenticator removed",
                AuditStatus::Success,
            );
        }
        Ok(removed)
    }

    /// Check an authenticator code for the current identity, under the
    /// same lockout and rate limit as the passcode.
    ///
    /// # Errors
    ///
    /// - `VaultError::LockedOut` / `VaultError::RateLimited` from the guard
    /// - `VaultError::TotpNotEnrolled` if no secret is stored
    /// - `VaultError::Crypto` if the stored secret is not valid base32
    pub fn verify_totp(&self, token: &str) -> Result<bool, VaultError> {
        let who = self.who();
        if let LockoutStatus::Locked { remaining_seconds } = self.guard.check_lockout(&who) {
            return Err(VaultError::LockedOut { remaining_seconds });
        }
        if !self.guard.check_rate_limit(&who) {
            return Err(VaultError::RateLimited);
        }
        let secret = self
            .settings
            .get(TOTP_SECRET_KEY)?
            .ok_or(VaultError::TotpNotEnrolled)?;

        if self.totp.verify_default(&secret, token)? {
            self.guard.reset(&who);
            self.audit.log_event(
                events::TOTP_VERIFY,
                &who,
                "authenticator code accepted",
                AuditStatus::Success,
            );
            Ok(true)
        } else {
            self.audit.log_event(
                events::TOTP_VERIFY,
                &who,
                "authenticator code rejected",
                AuditStatus::Failed,
            );
            self.guard.record_failure(&who);
            Ok(false)
        }
    }

    // ── Sessions ───────────────────────────────────────────────────

    /// Open a session for the current identity.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::Crypto` if the CSPRNG fails.
    pub fn create_session(&self) -> Result<String, VaultError> {
        let who = self.who();
        let id = self.sessions.create(&who)?;
        self.audit
            .log_event(events::SESSION, &who, "session started", AuditStatus::Success);
        Ok(id)
    }

    /// Whether `session_id` is live; refreshes its idle timer.
    #[must_use]
    pub fn validate_session(&self, session_id: &str) -> bool {
        self.sessions.validate(session_id).is_some()
    }

    /// End `session_id`; returns whether it was live.
    pub fn end_session(&self, session_id: &str) -> bool {
        let ended = self.sessions.revoke(session_id);
        if ended {
            self.audit
                .log_event(events::SESSION, &self.who(), "session ended", AuditStatus::Success);
        }
        ended
    }

    // ── Password-derived stores ────────────────────────────────────

    /// Secret store at `path` keyed from `password` through the shared
    /// salt in `key_salt.bin`.
    ///
    /// # Errors
    ///
    /// - `VaultError::WeakPassword` when strong passwords are required
    /// - `VaultError::InvalidConfig` if the salt was bound to another
    ///   iteration count
    /// - `VaultError::Storage` / `VaultError::CorruptRecord` for salt files
    pub fn open_password_store(
        &self,
        path: impl Into<PathBuf>,
        password: &str,
    ) -> Result<SecretStore, VaultError> {
        if self.config.require_strong_passwords {
            validate_password_strength(password)?;
        }
        let kdf = KeyDerivation::open(
            &self.paths.salt_file(),
            self.config.kdf_params()?,
            self.config.salt_len,
        )?;
        Ok(SecretStore::from_password(path, password, &kdf)?.with_sink(Arc::clone(&self.sink)))
    }

    // ── Key files ──────────────────────────────────────────────────

    /// Protection status of every machine key file.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::Storage` if a key file exists but is unreadable.
    pub fn verify_key_protection(&self) -> Result<Vec<(PathBuf, KeyProtection)>, VaultError> {
        let mut files = vec![self.paths.credential_key_file(), self.paths.settings_key_file()];
        if self.config.encrypt_audit_log {
            files.push(self.paths.audit_key_file());
        }
        files
            .into_iter()
            .map(|path| -> Result<(PathBuf, KeyProtection), VaultError> {
                let status = verify_key_protection(&path)?;
                if !status.is_protected() {
                    tracing::warn!(path = %path.display(), ?status, "key file not protected");
                }
                Ok((path, status))
            })
            .collect()
    }
}

// ── Tests ──────────────────────────────────────────────────────────
