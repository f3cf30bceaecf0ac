//! Zeroizing containers for key material and decrypted payloads.
//!
//! - [`SecretBuffer`] — variable-length plaintext (decrypted store contents)
//! - [`SecretBytes`] — fixed-length keys and salts
//!
//! Both wipe their memory on drop and print `***` instead of their contents
//! in `Debug`/`Display`, so a stray `tracing::debug!(?key)` cannot leak.

use crate::error::CryptoError;
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretSlice};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

// ---------------------------------------------------------------------------
// SecretBuffer — variable-length
// ---------------------------------------------------------------------------

/// Variable-length buffer for sensitive data, backed by [`SecretSlice<u8>`].
pub struct SecretBuffer {
    inner: SecretSlice<u8>,
}

impl SecretBuffer {
    /// Copy `data` into a new zeroizing allocation.
    ///
    /// The caller remains responsible for wiping its own copy.
    #[must_use]
    pub fn new(data: &[u8]) -> Self {
        Self {
            inner: data.to_vec().into(),
        }
    }

    /// Take ownership of an existing vector without copying it.
    #[must_use]
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { inner: data.into() }
    }

    /// Expose the underlying bytes for a cryptographic operation.
    #[must_use]
    pub fn expose(&self) -> &[u8] {
        self.inner.expose_secret()
    }

    /// Interpret the contents as UTF-8.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidKeyMaterial` if the bytes are not UTF-8.
    pub fn expose_str(&self) -> Result<&str, CryptoError> {
        std::str::from_utf8(self.expose())
            .map_err(|e| CryptoError::InvalidKeyMaterial(format!("payload is not UTF-8: {e}")))
    }

    /// Number of bytes held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.expose().len()
    }

    /// Returns `true` if the buffer holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for SecretBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretBuffer(***)")
    }
}

impl fmt::Display for SecretBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretBuffer(***)")
    }
}

// ---------------------------------------------------------------------------
// SecretBytes<N> — fixed-size
// ---------------------------------------------------------------------------

/// Fixed-size secret (symmetric keys, derived keys).
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes<const N: usize> {
    bytes: [u8; N],
}

impl<const N: usize> SecretBytes<N> {
    /// Wrap an array. The array is moved in; no copy remains with the caller.
    #[must_use]
    pub const fn new(data: [u8; N]) -> Self {
        Self { bytes: data }
    }

    /// Fill a new value from the OS CSPRNG.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::SecureMemory` if the CSPRNG fails.
    pub fn random() -> Result<Self, CryptoError> {
        let mut bytes = [0u8; N];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| CryptoError::SecureMemory(format!("CSPRNG fill failed: {e}")))?;
        Ok(Self::new(bytes))
    }

    /// Build from a slice that must be exactly `N` bytes long.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidKeyMaterial` on a length mismatch.
    pub fn from_slice(data: &[u8]) -> Result<Self, CryptoError> {
        if data.len() != N {
            return Err(CryptoError::InvalidKeyMaterial(format!(
                "expected {N} bytes, got {}",
                data.len()
            )));
        }
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(data);
        Ok(Self::new(bytes))
    }

    /// Expose the underlying bytes.
    #[must_use]
    pub const fn expose(&self) -> &[u8; N] {
        &self.bytes
    }
}

impl<const N: usize> Clone for SecretBytes<N> {
    fn clone(&self) -> Self {
        Self::new(self.bytes)
    }
}

impl<const N: usize> fmt::Debug for SecretBytes<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes<{N}>(***)")
    }
}

impl<const N: usize> fmt::Display for SecretBytes<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes<{N}>(***)")
    }
}

impl<const N: usize> From<[u8; N]> for SecretBytes<N> {
    fn from(data: [u8; N]) -> Self {
        Self::new(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_holds_copied_bytes() {
        let buf = SecretBuffer::new(b"user:pass");
        assert_eq!(buf.expose(), b"user:pass");
        assert_eq!(buf.len(), 9);
        assert!(!buf.is_empty());
    }

    #[test]
    fn buffer_from_vec_and_str_view() {
        let buf = SecretBuffer::from_vec(b"{\"a\":\"b\"}".to_vec());
        assert_eq!(buf.expose_str().unwrap(), "{\"a\":\"b\"}");
    }

    #[test]
    fn buffer_rejects_non_utf8_view() {
        let buf = SecretBuffer::new(&[0xFF, 0xFE]);
        assert!(matches!(
            buf.expose_str(),
            Err(CryptoError::InvalidKeyMaterial(_))
        ));
    }

    #[test]
    fn formatting_never_shows_contents() {
        let buf = SecretBuffer::new(b"hunter2");
        assert_eq!(format!("{buf:?}"), "SecretBuffer(***)");
        assert_eq!(format!("{buf}"), "SecretBuffer(***)");

        let key = SecretBytes::<32>::new([0x41; 32]);
        assert_eq!(format!("{key:?}"), "SecretBytes<32>(***)");
        assert!(!format!("{key}").contains("41"));
    }

    #[test]
    fn random_keys_differ() {
        let a = SecretBytes::<32>::random().unwrap();
        let b = SecretBytes::<32>::random().unwrap();
        assert_ne!(a.expose(), b.expose());
    }

    #[test]
    fn from_slice_enforces_length() {
        assert!(SecretBytes::<32>::from_slice(&[0u8; 31]).is_err());
        assert!(SecretBytes::<32>::from_slice(&[0u8; 33]).is_err());
        let key = SecretBytes::<32>::from_slice(&[7u8; 32]).unwrap();
        assert_eq!(key.expose(), &[7u8; 32]);
    }

    #[test]
    fn clone_is_independent_copy() {
        let a = SecretBytes::<16>::new([9; 16]);
        let b = a.clone();
        drop(a);
        assert_eq!(b.expose(), &[9; 16]);
    }
}
