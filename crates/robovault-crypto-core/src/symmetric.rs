//! Versioned, authenticated, time-stamped tokens over AES-256-GCM.
//!
//! This module provides:
//! - [`generate_key`] — random 256-bit [`VaultKey`]
//! - [`encrypt`] — seal bytes into an [`EncryptedToken`] with a fresh nonce
//! - [`decrypt`] — authenticate and open a token, returning [`SecretBuffer`]
//! - [`decrypt_with_ttl`] — same, but also reject stale tokens
//!
//! # Token layout
//!
//! ```text
//! marker (1 B) | issued_at (u64 BE) | nonce (12 B) | ciphertext | tag (16 B)
//! ```
//!
//! The whole thing is URL-safe base64 so it can be written to text files
//! one token per line. `marker || issued_at` is fed to GCM as associated
//! data: rewriting the timestamp breaks the tag just like editing the
//! ciphertext does.

use std::fmt;
use std::str::FromStr;

use crate::error::CryptoError;
use crate::memory::{SecretBuffer, SecretBytes};
use data_encoding::BASE64URL;
use rand::rngs::OsRng;
use rand::RngCore;
use ring::aead;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Format marker for version 1 tokens.
pub const TOKEN_MARKER_V1: u8 = 0xA1;

/// AES-256-GCM nonce length in bytes (96 bits).
pub const NONCE_LEN: usize = 12;

/// AES-256-GCM authentication tag length in bytes (128 bits).
pub const TAG_LEN: usize = 16;

/// AES-256-GCM key length in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// Tokens stamped further than this into the future fail TTL checks.
pub const MAX_CLOCK_SKEW_SECS: u64 = 60;

const TIMESTAMP_LEN: usize = 8;
const HEADER_LEN: usize = 1 + TIMESTAMP_LEN;
const MIN_TOKEN_LEN: usize = HEADER_LEN + NONCE_LEN + TAG_LEN;

/// Symmetric key used directly by the vault.
pub type VaultKey = SecretBytes<KEY_LEN>;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Opaque sealed payload. Callers store and pass it around; they never
/// look inside.
#[must_use = "encrypted data must be stored or transmitted"]
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncryptedToken(String);

impl EncryptedToken {
    /// Wrap text read from storage. Validity is only established by
    /// [`decrypt`].
    pub fn from_string(text: String) -> Self {
        Self(text)
    }

    /// Text form, suitable for writing to disk.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the text form.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Debug for EncryptedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptedToken({} chars)", self.0.len())
    }
}

impl fmt::Display for EncryptedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EncryptedToken {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim().to_owned()))
    }
}

// ---------------------------------------------------------------------------
// Core operations
// ---------------------------------------------------------------------------

/// Generate a random key suitable for direct use (no derivation).
///
/// # Errors
///
/// Returns `CryptoError::SecureMemory` if the CSPRNG fails.
pub fn generate_key() -> Result<VaultKey, CryptoError> {
    VaultKey::random()
}

/// Seal `plaintext` under `key`, stamped with the current time.
///
/// Two calls with the same input never produce the same token.
///
/// # Errors
///
/// Returns `CryptoError::InvalidKeyMaterial` if the key is not exactly
/// 32 bytes, or `CryptoError::Encryption` if sealing fails.
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<EncryptedToken, CryptoError> {
    encrypt_at(plaintext, key, current_epoch_secs())
}

/// Seal `plaintext` with an explicit issue timestamp (seconds since epoch).
///
/// # Errors
///
/// Returns `CryptoError::InvalidKeyMaterial` if the key is not exactly
/// 32 bytes, or `CryptoError::Encryption` if sealing fails.
pub fn encrypt_at(
    plaintext: &[u8],
    key: &[u8],
    issued_at: u64,
) -> Result<EncryptedToken, CryptoError> {
    let sealing_key = build_key(key)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng
        .try_fill_bytes(&mut nonce_bytes)
        .map_err(|e| CryptoError::Encryption(format!("nonce generation failed: {e}")))?;
    let nonce = aead::Nonce::assume_unique_for_key(nonce_bytes);

    let header = header_bytes(issued_at);

    let mut in_out = plaintext.to_vec();
    let Ok(tag) =
        sealing_key.seal_in_place_separate_tag(nonce, aead::Aad::from(&header), &mut in_out)
    else {
        in_out.zeroize();
        return Err(CryptoError::Encryption(
            "AES-256-GCM encryption failed".into(),
        ));
    };

    let capacity = HEADER_LEN
        .saturating_add(NONCE_LEN)
        .saturating_add(in_out.len())
        .saturating_add(TAG_LEN);
    let mut raw = Vec::with_capacity(capacity);
    raw.extend_from_slice(&header);
    raw.extend_from_slice(&nonce_bytes);
    raw.extend_from_slice(&in_out);
    raw.extend_from_slice(tag.as_ref());

    Ok(EncryptedToken(BASE64URL.encode(&raw)))
}

/// Authenticate and open a token.
///
/// # Errors
///
/// - `CryptoError::InvalidKeyMaterial` if the key is not 32 bytes
/// - `CryptoError::InvalidToken` if the token is malformed or carries an
///   unknown format marker
/// - `CryptoError::Decryption` if the tag does not verify (wrong key or
///   tampered data)
pub fn decrypt(token: &EncryptedToken, key: &[u8]) -> Result<SecretBuffer, CryptoError> {
    open(token, key).map(|(_, plaintext)| plaintext)
}

/// Open a token and reject it if it was issued more than `ttl_secs` before
/// `now`, or more than [`MAX_CLOCK_SKEW_SECS`] after it.
///
/// The age check happens after authentication, so a forged timestamp can
/// never pass.
///
/// # Errors
///
/// Everything [`decrypt`] returns, plus `CryptoError::TokenExpired`.
pub fn decrypt_with_ttl(
    token: &EncryptedToken,
    key: &[u8],
    ttl_secs: u64,
    now: u64,
) -> Result<SecretBuffer, CryptoError> {
    let (issued_at, plaintext) = open(token, key)?;
    if issued_at > now.saturating_add(MAX_CLOCK_SKEW_SECS) {
        return Err(CryptoError::TokenExpired { age_secs: 0 });
    }
    let age_secs = now.saturating_sub(issued_at);
    if age_secs > ttl_secs {
        return Err(CryptoError::TokenExpired { age_secs });
    }
    Ok(plaintext)
}

/// Authenticated issue time of a token.
///
/// # Errors
///
/// Everything [`decrypt`] returns.
pub fn token_timestamp(token: &EncryptedToken, key: &[u8]) -> Result<u64, CryptoError> {
    open(token, key).map(|(issued_at, _)| issued_at)
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn open(token: &EncryptedToken, key: &[u8]) -> Result<(u64, SecretBuffer), CryptoError> {
    let opening_key = build_key(key)?;

    let raw = BASE64URL
        .decode(token.0.as_bytes())
        .map_err(|e| CryptoError::InvalidToken(format!("not base64url: {e}")))?;
    if raw.len() < MIN_TOKEN_LEN {
        return Err(CryptoError::InvalidToken(format!(
            "token too short: {} bytes (minimum {MIN_TOKEN_LEN})",
            raw.len()
        )));
    }
    if raw[0] != TOKEN_MARKER_V1 {
        return Err(CryptoError::InvalidToken(format!(
            "unknown format marker 0x{:02x}",
            raw[0]
        )));
    }

    let (header, rest) = raw.split_at(HEADER_LEN);
    let (nonce_slice, sealed) = rest.split_at(NONCE_LEN);

    let mut ts_bytes = [0u8; TIMESTAMP_LEN];
    ts_bytes.copy_from_slice(&header[1..]);
    let issued_at = u64::from_be_bytes(ts_bytes);

    let mut nonce_bytes = [0u8; NONCE_LEN];
    nonce_bytes.copy_from_slice(nonce_slice);
    let nonce = aead::Nonce::assume_unique_for_key(nonce_bytes);

    let mut ct_tag = sealed.to_vec();
    let result = opening_key
        .open_in_place(nonce, aead::Aad::from(header), &mut ct_tag)
        .map(|plaintext| SecretBuffer::new(plaintext));
    ct_tag.zeroize();

    let plaintext = result.map_err(|_| CryptoError::Decryption)?;
    Ok((issued_at, plaintext))
}

fn build_key(key: &[u8]) -> Result<aead::LessSafeKey, CryptoError> {
    if key.len() != KEY_LEN {
        return Err(CryptoError::InvalidKeyMaterial(format!(
            "invalid key length: {} bytes (expected {KEY_LEN})",
            key.len()
        )));
    }
    let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, key)
        .map_err(|_| CryptoError::Encryption("failed to create AES-256-GCM key".into()))?;
    Ok(aead::LessSafeKey::new(unbound))
}

fn header_bytes(issued_at: u64) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[0] = TOKEN_MARKER_V1;
    header[1..].copy_from_slice(&issued_at.to_be_bytes());
    header
}

fn current_epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
