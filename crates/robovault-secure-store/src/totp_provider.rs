//! Second factor for authenticator apps: SHA1, 6 digits, 30-second steps.

use std::sync::Arc;

use robovault_crypto_core::totp::{
    self, OtpAlgorithm, OtpDigits, DEFAULT_PERIOD, DEFAULT_WINDOW,
};

use crate::clock::{Clock, SystemClock};
use crate::error::VaultError;

/// Enrollment and verification of TOTP secrets.
pub struct TotpProvider {
    issuer: String,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for TotpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TotpProvider")
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

impl TotpProvider {
    /// Provider labelling enrollments with `issuer`.
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self::with_clock(issuer, Arc::new(SystemClock))
    }

    /// Provider reading time from `clock`.
    #[must_use]
    pub fn with_clock(issuer: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            issuer: issuer.into(),
            clock,
        }
    }

    /// Configured issuer.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// New base32 secret.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::Crypto` if the CSPRNG fails.
    pub fn generate_secret(&self) -> Result<String, VaultError> {
        Ok(totp::generate_secret()?)
    }

    /// `otpauth://` URI for QR rendering.
    #[must_use]
    pub fn provisioning_uri(&self, secret: &str, account: &str, issuer: &str) -> String {
        totp::provisioning_uri(secret, account, issuer)
    }

    /// Check `token` against the current step ± `window` steps.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::Crypto` if `secret` is not valid base32.
    pub fn verify(&self, secret: &str, token: &str, window: u32) -> Result<bool, VaultError> {
        let key = totp::decode_secret(secret)?;
        Ok(totp::validate_totp(
            key.expose(),
            self.clock.now_secs(),
            token,
            OtpDigits::Six,
            DEFAULT_PERIOD,
            OtpAlgorithm::Sha1,
            window,
        )?)
    }

    /// [`Self::verify`] with the default one-step window.
    ///
    /// # Errors
    ///
    /// As [`Self::verify`].
    pub fn verify_default(&self, secret: &str, token: &str) -> Result<bool, VaultError> {
        self.verify(secret, token, DEFAULT_WINDOW)
    }

    /// Code for the current step, for display and testing.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::Crypto` if `secret` is not valid base32.
    pub fn current_token(&self, secret: &str) -> Result<String, VaultError> {
        let key = totp::decode_secret(secret)?;
        Ok(totp::generate_totp(
            key.expose(),
            self.clock.now_secs(),
            OtpDigits::Six,
            DEFAULT_PERIOD,
            OtpAlgorithm::Sha1,
        )?)
    }
}
