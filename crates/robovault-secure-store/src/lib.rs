//! `robovault-secure-store` — Secret files, passcode lockout and audit trail
//! for RoboVault.
//!
//! Everything here touches the disk, a clock, or shared state; the pure
//! primitives live in `robovault-crypto-core`. [`SecureCore`] wires the
//! pieces together from a [`StorePaths`] + [`SecurityConfig`] pair.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::arithmetic_side_effects))]

pub mod audit;
pub mod clock;
pub mod config;
pub mod error;
pub mod facade;
mod fs_util;
pub mod guard;
pub mod identity;
pub mod key_files;
pub mod log_sink;
pub mod passcode;
pub mod secret_store;
pub mod session;
pub mod strength;
pub mod totp_provider;

pub use audit::{AuditEntry, AuditStatus, AuditTrail};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{SecurityConfig, StorePaths};
pub use error::VaultError;
pub use facade::{NetworkCredential, SecureCore, SecureCoreBuilder, TotpEnrollment};
pub use guard::{GuardPolicy, LockoutGuard, LockoutStatus};
pub use identity::{FixedIdentity, IdentityProvider, MachineIdentity};
pub use key_files::{
    derive_key, get_or_create_key, get_or_create_salt, verify_key_protection, KeyDerivation,
    KeyProtection,
};
pub use log_sink::{LogLevel, LogSink, TracingSink};
pub use passcode::PasscodeAuthenticator;
pub use secret_store::{SecretMap, SecretStore};
pub use session::{generate_secure_token, SessionRegistry};
pub use strength::{validate_password_strength, StrengthViolation};
pub use totp_provider::TotpProvider;
