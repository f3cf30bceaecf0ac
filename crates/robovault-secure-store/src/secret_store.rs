//! Encrypted key/value file.
//!
//! One file holds one [`EncryptedToken`] wrapping the canonical JSON of a
//! flat string map. Every mutation is a full load-modify-save under the
//! process-wide lock for the file's path, and every save replaces the file
//! atomically.
//!
//! Missing or empty file: empty map (first run). File present but not
//! decryptable: [`VaultError::Authentication`]. The two are never confused.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use robovault_crypto_core::symmetric::{decrypt, encrypt, EncryptedToken};
use robovault_crypto_core::VaultKey;
use zeroize::Zeroize;

use crate::error::VaultError;
use crate::fs_util;
use crate::key_files::KeyDerivation;
use crate::log_sink::{default_sink, LogLevel, LogSink};

/// Decrypted contents of a store. `BTreeMap` keeps the JSON key order
/// canonical.
pub type SecretMap = BTreeMap<String, String>;

/// A single encrypted file of named secrets.
///
/// `Send + Sync`. Handles opened on the same path share one lock, whether
/// or not they share the `SecretStore` value. Writers in other processes
/// are not coordinated (last writer wins).
pub struct SecretStore {
    path: PathBuf,
    key: Mutex<VaultKey>,
    sink: Arc<dyn LogSink>,
}

impl std::fmt::Debug for SecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SecretStore {
    /// Store at `path` encrypted under `key`. Nothing is read until first use.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, key: VaultKey) -> Self {
        Self {
            path: path.into(),
            key: Mutex::new(key),
            sink: default_sink(),
        }
    }

    /// Store whose key is derived from `password` through `kdf`.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::Crypto` if derivation fails.
    pub fn from_password(
        path: impl Into<PathBuf>,
        password: &str,
        kdf: &KeyDerivation,
    ) -> Result<Self, VaultError> {
        Ok(Self::new(path, kdf.derive_key(password)?))
    }

    /// Route diagnostics to `sink` instead of `tracing`.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, VaultKey> {
        self.key.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decrypt the whole file.
    ///
    /// # Errors
    ///
    /// - `VaultError::Storage` if the file exists but cannot be read
    /// - `VaultError::Authentication` on a wrong key or damaged file
    /// - `VaultError::Serialization` if the plaintext is not a string map
    pub fn load(&self) -> Result<SecretMap, VaultError> {
        fs_util::with_file_lock(&self.path, || self.load_with(&self.lock()))
    }

    /// Encrypt `map` and replace the file.
    ///
    /// # Errors
    ///
    /// - `VaultError::Storage` if the write or rename fails
    /// - `VaultError::Crypto` if sealing fails
    pub fn save(&self, map: &SecretMap) -> Result<(), VaultError> {
        fs_util::ensure_parent(&self.path)?;
        fs_util::with_file_lock(&self.path, || self.save_with(&self.lock(), map))
    }

    /// Load, apply `f`, save, all under the store lock.
    ///
    /// Use this to batch several changes into a single write.
    ///
    /// # Errors
    ///
    /// Anything [`Self::load`] or [`Self::save`] returns.
    pub fn update<T>(&self, f: impl FnOnce(&mut SecretMap) -> T) -> Result<T, VaultError> {
        fs_util::ensure_parent(&self.path)?;
        fs_util::with_file_lock(&self.path, || {
            let key = self.lock();
            let mut map = self.load_with(&key)?;
            let out = f(&mut map);
            self.save_with(&key, &map)?;
            Ok(out)
        })
    }

    /// Value for `name`, if present.
    ///
    /// # Errors
    ///
    /// Anything [`Self::load`] returns.
    pub fn get(&self, name: &str) -> Result<Option<String>, VaultError> {
        Ok(self.load()?.remove(name))
    }

    /// Insert or overwrite one entry.
    ///
    /// # Errors
    ///
    /// Anything [`Self::update`] returns.
    pub fn set(&self, name: &str, value: &str) -> Result<(), VaultError> {
        self.update(|map| {
            if let Some(mut old) = map.insert(name.to_owned(), value.to_owned()) {
                old.zeroize();
            }
        })
    }

    /// Remove one entry; returns whether it existed. The file is only
    /// rewritten when something was removed.
    ///
    /// # Errors
    ///
    /// Anything [`Self::update`] returns.
    pub fn delete(&self, name: &str) -> Result<bool, VaultError> {
        fs_util::with_file_lock(&self.path, || {
            let key = self.lock();
            let mut map = self.load_with(&key)?;
            let Some(mut old) = map.remove(name) else {
                return Ok(false);
            };
            old.zeroize();
            self.save_with(&key, &map)?;
            Ok(true)
        })
    }

    /// Whether `name` is present.
    ///
    /// # Errors
    ///
    /// Anything [`Self::load`] returns.
    pub fn contains(&self, name: &str) -> Result<bool, VaultError> {
        Ok(self.load()?.contains_key(name))
    }

    /// Entry names in sorted order.
    ///
    /// # Errors
    ///
    /// Anything [`Self::load`] returns.
    pub fn keys(&self) -> Result<Vec<String>, VaultError> {
        Ok(self.load()?.into_keys().collect())
    }

    /// Re-encrypt the file under `new_key` and switch to it.
    ///
    /// The old key must still open the file. On failure the store keeps the
    /// old key and the file is unchanged.
    ///
    /// # Errors
    ///
    /// Anything [`Self::load`] or [`Self::save`] returns.
    pub fn rekey(&self, new_key: VaultKey) -> Result<(), VaultError> {
        fs_util::with_file_lock(&self.path, || {
            let mut key = self.lock();
            let map = self.load_with(&key)?;
            self.save_with(&new_key, &map)?;
            *key = new_key;
            Ok::<(), VaultError>(())
        })?;
        self.sink.log(
            LogLevel::Info,
            &format!("re-keyed secret store {}", self.path.display()),
        );
        Ok(())
    }

    /// Delete the backing file; returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::Storage` if the file cannot be removed.
    pub fn destroy(&self) -> Result<bool, VaultError> {
        let removed = fs_util::with_file_lock(&self.path, || fs_util::remove_if_exists(&self.path))?;
        if removed {
            self.sink.log(
                LogLevel::Warning,
                &format!("destroyed secret store {}", self.path.display()),
            );
        }
        Ok(removed)
    }

    fn load_with(&self, key: &VaultKey) -> Result<SecretMap, VaultError> {
        let Some(raw) = fs_util::read_optional(&self.path)? else {
            return Ok(SecretMap::new());
        };
        let Ok(text) = String::from_utf8(raw) else {
            self.sink.log(
                LogLevel::Error,
                &format!("secret store {} is not a token file", self.path.display()),
            );
            return Err(VaultError::Authentication);
        };
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(SecretMap::new());
        }

        let token = EncryptedToken::from_string(trimmed.to_owned());
        let plaintext = decrypt(&token, key.expose()).map_err(|e| {
            self.sink.log(
                LogLevel::Error,
                &format!("cannot decrypt {}: {e}", self.path.display()),
            );
            VaultError::from(e)
        })?;
        Ok(serde_json::from_slice(plaintext.expose())?)
    }

    fn save_with(&self, key: &VaultKey, map: &SecretMap) -> Result<(), VaultError> {
        let mut json = serde_json::to_vec(map)?;
        let sealed = encrypt(&json, key.expose());
        json.zeroize();
        let token = sealed?;
        fs_util::write_atomic(&self.path, token.as_str().as_bytes())?;
        self.sink.log(
            LogLevel::Debug,
            &format!("saved {} entries to {}", map.len(), self.path.display()),
        );
        Ok(())
    }
}
