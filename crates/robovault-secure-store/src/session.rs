//! In-memory sessions with an idle timeout, plus random token helpers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use data_encoding::{BASE64URL_NOPAD, HEXLOWER};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::clock::{Clock, SystemClock};
use crate::error::VaultError;

/// Random bytes behind each session id (hex-encoded to 64 characters).
pub const SESSION_ID_BYTES: usize = 32;

fn random_bytes(len: usize) -> Result<Vec<u8>, VaultError> {
    let mut bytes = vec![0u8; len];
    OsRng.try_fill_bytes(&mut bytes).map_err(|e| {
        VaultError::Crypto(robovault_crypto_core::CryptoError::SecureMemory(format!(
            "CSPRNG fill failed: {e}"
        )))
    })?;
    Ok(bytes)
}

/// `len` random bytes as unpadded URL-safe base64.
///
/// # Errors
///
/// Returns `VaultError::Crypto` if the CSPRNG fails.
pub fn generate_secure_token(len: usize) -> Result<String, VaultError> {
    Ok(BASE64URL_NOPAD.encode(&random_bytes(len)?))
}

#[derive(Debug, Clone)]
struct Session {
    identifier: String,
    last_seen: u64,
}

/// Live sessions keyed by id.
pub struct SessionRegistry {
    idle_timeout_secs: u64,
    clock: Arc<dyn Clock>,
    sessions: Mutex<HashMap<String, Session>>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("idle_timeout_secs", &self.idle_timeout_secs)
            .finish_non_exhaustive()
    }
}

impl SessionRegistry {
    /// Registry whose sessions expire after `idle_timeout_secs` without
    /// activity.
    #[must_use]
    pub fn new(idle_timeout_secs: u64) -> Self {
        Self::with_clock(idle_timeout_secs, Arc::new(SystemClock))
    }

    /// Same, reading time from `clock`.
    #[must_use]
    pub fn with_clock(idle_timeout_secs: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            idle_timeout_secs,
            clock,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a session for `identifier` and return its id.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::Crypto` if the CSPRNG fails.
    pub fn create(&self, identifier: &str) -> Result<String, VaultError> {
        let id = HEXLOWER.encode(&random_bytes(SESSION_ID_BYTES)?);
        let session = Session {
            identifier: identifier.to_owned(),
            last_seen: self.clock.now_secs(),
        };
        self.sessions().insert(id.clone(), session);
        tracing::debug!(identifier, "session created");
        Ok(id)
    }

    /// Identifier owning `session_id` if the session is live. Counts as
    /// activity and restarts the idle timer; an expired session is dropped.
    pub fn validate(&self, session_id: &str) -> Option<String> {
        let now = self.clock.now_secs();
        let mut sessions = self.sessions();
        let session = sessions.get_mut(session_id)?;
        if now.saturating_sub(session.last_seen) >= self.idle_timeout_secs {
            let identifier = session.identifier.clone();
            sessions.remove(session_id);
            tracing::debug!(identifier = %identifier, "session expired");
            return None;
        }
        session.last_seen = now;
        Some(session.identifier.clone())
    }

    /// End a session; returns whether it existed.
    pub fn revoke(&self, session_id: &str) -> bool {
        self.sessions().remove(session_id).is_some()
    }

    /// Drop every expired session; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_secs();
        let mut sessions = self.sessions();
        let before = sessions.len();
        sessions.retain(|_, s| now.saturating_sub(s.last_seen) < self.idle_timeout_secs);
        before.saturating_sub(sessions.len())
    }

    /// Sessions currently held, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    /// Whether no sessions are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
