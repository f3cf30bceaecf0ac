//! Append-only security audit log.
//!
//! Two on-disk forms:
//! - **Plain**: CSV with a `Timestamp,Event Type,User/IP,Details,Status`
//!   header, local-time timestamps, RFC 4180 quoting.
//! - **Encrypted**: one [`EncryptedToken`] per line, each sealing the JSON
//!   of a single [`AuditEntry`].
//!
//! Writing never fails from the caller's point of view: errors go to the
//! log sink at error level and the security operation carries on.

use std::borrow::Cow;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use robovault_crypto_core::symmetric::{decrypt, encrypt, EncryptedToken};
use robovault_crypto_core::VaultKey;
use serde::{Deserialize, Serialize};

use crate::error::VaultError;
use crate::fs_util;
use crate::log_sink::{default_sink, LogLevel, LogSink};

/// Header row of the plain CSV form.
pub const CSV_HEADER: &str = "Timestamp,Event Type,User/IP,Details,Status";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Event type names written by this crate.
pub mod events {
    /// Passcode verification attempt.
    pub const PASSCODE_VERIFY: &str = "PASSCODE_VERIFY";
    /// Passcode set or changed.
    pub const PASSCODE_SET: &str = "PASSCODE_SET";
    /// Passcode removed.
    pub const PASSCODE_CLEAR: &str = "PASSCODE_CLEAR";
    /// Request refused by the sliding-window limiter.
    pub const RATE_LIMIT: &str = "RATE_LIMIT";
    /// Attempt refused during an active lockout.
    pub const LOCKOUT_CHECK: &str = "LOCKOUT_CHECK";
    /// Failed authentication counted.
    pub const FAILED_ATTEMPT: &str = "FAILED_ATTEMPT";
    /// Failure threshold reached.
    pub const LOCKOUT: &str = "LOCKOUT";
    /// Counters cleared after a success.
    pub const RESET_ATTEMPTS: &str = "RESET_ATTEMPTS";
    /// TOTP secret enrolled or removed.
    pub const TOTP_ENROLL: &str = "TOTP_ENROLL";
    /// TOTP code checked.
    pub const TOTP_VERIFY: &str = "TOTP_VERIFY";
    /// Network credential written or removed.
    pub const CREDENTIAL_STORE: &str = "CREDENTIAL_STORE";
    /// Network credential read.
    pub const CREDENTIAL_ACCESS: &str = "CREDENTIAL_ACCESS";
    /// Session opened, expired or revoked.
    pub const SESSION: &str = "SESSION";
}

// ── Types ──────────────────────────────────────────────────────────

/// Outcome recorded with each event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    /// Operation succeeded.
    Success,
    /// Authentication failed.
    Failed,
    /// Refused by the rate limiter or an active lockout.
    Blocked,
    /// Lockout started.
    Locked,
    /// Something unusual but not fatal.
    Warning,
    /// Operation failed for a non-authentication reason.
    Error,
}

impl AuditStatus {
    /// Column value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Blocked => "BLOCKED",
            Self::Locked => "LOCKED",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditStatus {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "SUCCESS" => Self::Success,
            "FAILED" => Self::Failed,
            "BLOCKED" => Self::Blocked,
            "LOCKED" => Self::Locked,
            "WARNING" => Self::Warning,
            "ERROR" => Self::Error,
            other => {
                return Err(VaultError::CorruptRecord(format!(
                    "unknown audit status {other:?}"
                )))
            }
        })
    }
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// Local time, `YYYY-MM-DD HH:MM:SS`.
    pub timestamp: String,
    /// Event name, e.g. [`events::LOCKOUT`].
    pub event_type: String,
    /// Machine, user or IP the event concerns.
    pub identifier: String,
    /// Free text. Never contains secret values.
    pub details: String,
    /// Outcome.
    pub status: AuditStatus,
}

enum Format {
    Plain,
    Encrypted(VaultKey),
}

/// Append-only audit log file.
pub struct AuditTrail {
    path: PathBuf,
    format: Format,
    sink: Arc<dyn LogSink>,
    write_lock: Mutex<()>,
}

impl fmt::Debug for AuditTrail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditTrail")
            .field("path", &self.path)
            .field("encrypted", &self.is_encrypted())
            .finish_non_exhaustive()
    }
}

impl AuditTrail {
    /// CSV log at `path`.
    #[must_use]
    pub fn plain(path: impl Into<PathBuf>) -> Self {
        Self::with_format(path.into(), Format::Plain)
    }

    /// Token-per-line log at `path`, sealed under `key`.
    #[must_use]
    pub fn encrypted(path: impl Into<PathBuf>, key: VaultKey) -> Self {
        Self::with_format(path.into(), Format::Encrypted(key))
    }

    fn with_format(path: PathBuf, format: Format) -> Self {
        Self {
            path,
            format,
            sink: default_sink(),
            write_lock: Mutex::new(()),
        }
    }

    /// Report write failures to `sink` instead of `tracing`.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Log file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether lines are sealed tokens.
    #[must_use]
    pub const fn is_encrypted(&self) -> bool {
        matches!(self.format, Format::Encrypted(_))
    }

    /// Append one event, stamped with the current local time.
    pub fn log_event(&self, event_type: &str, identifier: &str, details: &str, status: AuditStatus) {
        let entry = AuditEntry {
            timestamp: chrono::Local::now().format(TIMESTAMP_FORMAT).to_string(),
            event_type: event_type.to_owned(),
            identifier: identifier.to_owned(),
            details: details.to_owned(),
            status,
        };
        if let Err(e) = self.append(&entry) {
            self.sink.log(
                LogLevel::Error,
                &format!(
                    "audit log write to {} failed ({event_type}/{status}): {e}",
                    self.path.display()
                ),
            );
        }
    }

    fn append(&self, entry: &AuditEntry) -> Result<(), VaultError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        fs_util::ensure_parent(&self.path)?;

        let line = match &self.format {
            Format::Plain => csv_line(entry),
            Format::Encrypted(key) => {
                let json = serde_json::to_vec(entry)?;
                let mut line = encrypt(&json, key.expose())?.into_string();
                line.push('\n');
                line
            }
        };

        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let io = |e| VaultError::storage(&self.path, e);
        let mut file = options.open(&self.path).map_err(io)?;

        let mut out = String::new();
        if matches!(self.format, Format::Plain) && file.metadata().map_err(io)?.len() == 0 {
            out.push_str(CSV_HEADER);
            out.push('\n');
        }
        out.push_str(&line);
        file.write_all(out.as_bytes()).map_err(io)
    }

    /// Parse the whole log.
    ///
    /// # Errors
    ///
    /// - `VaultError::Storage` if the file cannot be read
    /// - `VaultError::Authentication` if an encrypted line does not open
    /// - `VaultError::CorruptRecord` if a CSV row is malformed
    pub fn read_entries(&self) -> Result<Vec<AuditEntry>, VaultError> {
        let Some(raw) = fs_util::read_optional(&self.path)? else {
            return Ok(Vec::new());
        };
        let text = String::from_utf8(raw)
            .map_err(|_| VaultError::CorruptRecord("audit log is not UTF-8".into()))?;

        match &self.format {
            Format::Plain => parse_csv(&text)
                .into_iter()
                .filter(|row| !(row.len() == 1 && row[0].is_empty()))
                .filter(|row| row.join(",") != CSV_HEADER)
                .map(entry_from_row)
                .collect(),
            Format::Encrypted(key) => text
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(|line| -> Result<AuditEntry, VaultError> {
                    let token = EncryptedToken::from_string(line.to_owned());
                    let plain = decrypt(&token, key.expose())?;
                    Ok(serde_json::from_slice(plain.expose())?)
                })
                .collect(),
        }
    }
}

// ── CSV ────────────────────────────────────────────────────────────

fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

fn csv_line(entry: &AuditEntry) -> String {
    let fields = [
        csv_field(&entry.timestamp),
        csv_field(&entry.event_type),
        csv_field(&entry.identifier),
        csv_field(&entry.details),
        Cow::Borrowed(entry.status.as_str()),
    ];
    let mut line = fields.join(",");
    line.push('\n');
    line
}

/// Split CSV text into rows, honouring quoted fields that span lines.
fn parse_csv(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            _ => field.push(c),
        }
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    rows
}

fn entry_from_row(row: Vec<String>) -> Result<AuditEntry, VaultError> {
    let Ok([timestamp, event_type, identifier, details, status]) = <[String; 5]>::try_from(row)
    else {
        return Err(VaultError::CorruptRecord(
            "audit row does not have 5 columns".into(),
        ));
    };
    Ok(AuditEntry {
        timestamp,
        event_type,
        identifier,
        details,
        status: status.parse()?,
    })
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn plain_log_starts_with_header() {
        let dir = TempDir::new().unwrap();
        let trail = AuditTrail::plain(dir.path().join("logs/security_audit.log"));
        trail.log_event(events::LOCKOUT, "BACKUP-PC", "5 failed attempts", AuditStatus::Locked);
        trail.log_event(events::RESET_ATTEMPTS, "BACKUP-PC", "", AuditStatus::Success);

        let text = std::fs::read_to_string(trail.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_HEADER);
        assert!(lines[1].ends_with(",LOCKOUT,BACKUP-PC,5 failed attempts,LOCKED"));
    }

    #[test]
    fn timestamp_format() {
        let dir = TempDir::new().unwrap();
        let trail = AuditTrail::plain(dir.path().join("a.log"));
        trail.log_event(events::SESSION, "pc", "opened", AuditStatus::Success);
        let entry = &trail.read_entries().unwrap()[0];
        assert!(
            chrono::NaiveDateTime::parse_from_str(&entry.timestamp, TIMESTAMP_FORMAT).is_ok(),
            "bad timestamp {}",
            entry.timestamp
        );
    }

    #[test]
    fn awkward_fields_survive_quoting() {
        let dir = TempDir::new().unwrap();
        let trail = AuditTrail::plain(dir.path().join("a.log"));
        let details = "share \\\\srv\\a,b said \"hi\"\nsecond line";
        trail.log_event(events::CREDENTIAL_STORE, "10.0.0.5", details, AuditStatus::Warning);
        trail.log_event(events::SESSION, "pc", "plain", AuditStatus::Success);

        let entries = trail.read_entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].details, details);
        assert_eq!(entries[0].status, AuditStatus::Warning);
        assert_eq!(entries[1].details, "plain");
    }

    #[test]
    fn appends_never_rewrite_earlier_lines() {
        let dir = TempDir::new().unwrap();
        let trail = AuditTrail::plain(dir.path().join("a.log"));
        trail.log_event(events::FAILED_ATTEMPT, "pc", "1/5", AuditStatus::Failed);
        let before = std::fs::read_to_string(trail.path()).unwrap();
        trail.log_event(events::FAILED_ATTEMPT, "pc", "2/5", AuditStatus::Failed);
        let after = std::fs::read_to_string(trail.path()).unwrap();
        assert!(after.starts_with(&before));
    }

    #[test]
    fn encrypted_log_hides_contents() {
        let dir = TempDir::new().unwrap();
        let key = VaultKey::new([3; 32]);
        let trail = AuditTrail::encrypted(dir.path().join("a.log"), key.clone());
        trail.log_event(events::PASSCODE_VERIFY, "BACKUP-PC", "wrong", AuditStatus::Failed);
        trail.log_event(events::PASSCODE_VERIFY, "BACKUP-PC", "ok", AuditStatus::Success);

        let text = std::fs::read_to_string(trail.path()).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(!text.contains("BACKUP-PC"));

        let entries = trail.read_entries().unwrap();
        assert_eq!(entries[0].status, AuditStatus::Failed);
        assert_eq!(entries[1].details, "ok");

        let wrong = AuditTrail::encrypted(trail.path(), VaultKey::new([4; 32]));
        assert!(matches!(wrong.read_entries(), Err(VaultError::Authentication)));
    }

    #[test]
    fn write_failure_goes_to_sink_not_caller() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file where a directory should be").unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&seen);
        let trail = AuditTrail::plain(blocker.join("audit.log")).with_sink(Arc::new(
            move |level: LogLevel, msg: &str| captured.lock().unwrap().push((level, msg.to_owned())),
        ));
        trail.log_event(events::LOCKOUT, "pc", "", AuditStatus::Locked);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, LogLevel::Error);
        assert!(seen[0].1.contains("LOCKOUT/LOCKED"));
    }

    #[test]
    fn missing_log_reads_empty() {
        let dir = TempDir::new().unwrap();
        assert!(AuditTrail::plain(dir.path().join("none.log"))
            .read_entries()
            .unwrap()
            .is_empty());
    }

    #[test]
    fn malformed_rows_are_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, format!("{CSV_HEADER}\nonly,three,columns\n")).unwrap();
        assert!(matches!(
            AuditTrail::plain(&path).read_entries(),
            Err(VaultError::CorruptRecord(_))
        ));
        std::fs::write(&path, format!("{CSV_HEADER}\nt,e,i,d,MAYBE\n")).unwrap();
        assert!(AuditTrail::plain(&path).read_entries().is_err());
    }

    #[test]
    fn status_names_roundtrip() {
        for status in [
            AuditStatus::Success,
            AuditStatus::Failed,
            AuditStatus::Blocked,
            AuditStatus::Locked,
            AuditStatus::Warning,
            AuditStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<AuditStatus>().unwrap(), status);
        }
    }
}
