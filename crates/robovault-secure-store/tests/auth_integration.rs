#![allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]

//! Integration tests for the passcode lifecycle, lockout and rate limiting,
//! and the audit records they leave behind.

use std::path::Path;
use std::sync::Arc;

use robovault_secure_store::audit::events;
use robovault_secure_store::passcode::CHANGE_IDENTIFIER;
use robovault_secure_store::{
    AuditStatus, AuditTrail, Clock, GuardPolicy, LockoutGuard, LockoutStatus, ManualClock,
    PasscodeAuthenticator, VaultError,
};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const ID: &str = "BACKUP-PC";

struct Fixture {
    _dir: TempDir,
    clock: Arc<ManualClock>,
    guard: Arc<LockoutGuard>,
    audit: Arc<AuditTrail>,
    auth: PasscodeAuthenticator,
}

fn fixture(policy: GuardPolicy) -> Fixture {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(10_000));
    let audit = Arc::new(AuditTrail::plain(dir.path().join("security_audit.log")));
    let guard = Arc::new(
        LockoutGuard::new(policy, Arc::clone(&clock) as Arc<dyn Clock>)
            .with_audit(Arc::clone(&audit)),
    );
    let auth = PasscodeAuthenticator::new(
        dir.path().join("passcode.dat"),
        100_000,
        Arc::clone(&guard),
    )
    .unwrap()
    .with_audit(Arc::clone(&audit));
    Fixture {
        _dir: dir,
        clock,
        guard,
        audit,
        auth,
    }
}

/// Policy with a rate limit loose enough not to interfere with lockout.
fn lockout_only() -> GuardPolicy {
    GuardPolicy {
        max_requests: 100,
        ..GuardPolicy::default()
    }
}

fn statuses(audit: &AuditTrail, event: &str) -> Vec<AuditStatus> {
    audit
        .read_entries()
        .unwrap()
        .into_iter()
        .filter(|e| e.event_type == event)
        .map(|e| e.status)
        .collect()
}

// ---------------------------------------------------------------------------
// Passcode lifecycle
// ---------------------------------------------------------------------------

#[test]
fn passcode_lifecycle() {
    let f = fixture(lockout_only());
    assert!(!f.auth.has_passcode().unwrap());
    assert!(matches!(
        f.auth.verify("1234", ID),
        Err(VaultError::PasscodeNotSet)
    ));

    f.auth.set_passcode("1234", None).unwrap();
    assert!(f.auth.has_passcode().unwrap());
    assert!(f.auth.verify("1234", ID).unwrap());
    assert!(!f.auth.verify("9999", ID).unwrap());

    assert!(matches!(
        f.auth.set_passcode("5678", None),
        Err(VaultError::Authorization)
    ));
    assert!(matches!(
        f.auth.set_passcode("5678", Some("0000")),
        Err(VaultError::Authorization)
    ));
    f.auth.set_passcode("5678", Some("1234")).unwrap();
    assert!(!f.auth.verify("1234", ID).unwrap());
    assert!(f.auth.verify("5678", ID).unwrap());

    f.auth.clear_passcode("5678").unwrap();
    assert!(!f.auth.has_passcode().unwrap());
    assert!(!file_exists(f.auth.path()));
}

fn file_exists(path: &Path) -> bool {
    path.try_exists().unwrap()
}

#[test]
fn resetting_same_passcode_changes_salt() {
    let f = fixture(lockout_only());
    f.auth.set_passcode("1234", None).unwrap();
    let first = std::fs::read_to_string(f.auth.path()).unwrap();
    f.auth.set_passcode("1234", Some("1234")).unwrap();
    let second = std::fs::read_to_string(f.auth.path()).unwrap();
    assert_ne!(first, second);
    assert!(first.starts_with("100000:"));
    assert_eq!(first.trim().split(':').count(), 3);
}

#[test]
fn malformed_record_is_corrupt_not_unprotected() {
    let f = fixture(lockout_only());
    std::fs::write(f.auth.path(), "garbage-without-separators").unwrap();
    assert!(matches!(
        f.auth.has_passcode(),
        Err(VaultError::CorruptRecord(_))
    ));
    assert!(matches!(
        f.auth.verify("1234", ID),
        Err(VaultError::CorruptRecord(_))
    ));
}

#[test]
fn repeated_wrong_current_passcode_locks_changes() {
    let f = fixture(lockout_only());
    f.auth.set_passcode("1234", None).unwrap();
    for _ in 0..5 {
        assert!(matches!(
            f.auth.set_passcode("0000", Some("bad")),
            Err(VaultError::Authorization)
        ));
    }
    assert!(f.guard.check_lockout(CHANGE_IDENTIFIER).is_locked());
    assert!(matches!(
        f.auth.clear_passcode("1234"),
        Err(VaultError::LockedOut { .. })
    ));
    // Verification for the operator is unaffected.
    assert!(f.auth.verify("1234", ID).unwrap());
}

// ---------------------------------------------------------------------------
// Lockout
// ---------------------------------------------------------------------------

#[test]
fn five_failures_lock_then_timeout_unlocks() {
    let f = fixture(lockout_only());
    f.auth.set_passcode("1234", None).unwrap();

    for _ in 0..5 {
        assert!(!f.auth.verify("0000", ID).unwrap());
    }
    assert_eq!(f.guard.failure_count(ID), 5);

    match f.auth.verify("1234", ID) {
        Err(VaultError::LockedOut { remaining_seconds }) => {
            assert!(remaining_seconds > 0 && remaining_seconds <= 120);
        }
        other => panic!("expected lockout, got {other:?}"),
    }

    f.clock.advance(119);
    assert!(f.guard.check_lockout(ID).is_locked());

    f.clock.advance(1);
    assert_eq!(f.guard.check_lockout(ID), LockoutStatus::Unlocked);
    assert_eq!(f.guard.failure_count(ID), 0);
    assert!(f.auth.verify("1234", ID).unwrap());

    assert_eq!(statuses(&f.audit, events::LOCKOUT), [AuditStatus::Locked]);
    assert_eq!(
        statuses(&f.audit, events::LOCKOUT_CHECK),
        [AuditStatus::Blocked, AuditStatus::Blocked]
    );
}

#[test]
fn success_resets_failure_count() {
    let f = fixture(lockout_only());
    f.auth.set_passcode("1234", None).unwrap();
    for _ in 0..4 {
        assert!(!f.auth.verify("0000", ID).unwrap());
    }
    assert!(f.auth.verify("1234", ID).unwrap());
    assert_eq!(f.guard.failure_count(ID), 0);
    assert!(!f.auth.verify("0000", ID).unwrap());
    assert!(!f.guard.check_lockout(ID).is_locked());
}

#[test]
fn lockout_is_per_identifier() {
    let f = fixture(lockout_only());
    f.auth.set_passcode("1234", None).unwrap();
    for _ in 0..5 {
        f.auth.verify("0000", "attacker").unwrap();
    }
    assert!(f.guard.check_lockout("attacker").is_locked());
    assert!(f.auth.verify("1234", ID).unwrap());
}

// ---------------------------------------------------------------------------
// Rate limiting
// ---------------------------------------------------------------------------

#[test]
fn sixth_request_in_window_is_rate_limited() {
    let f = fixture(GuardPolicy {
        max_attempts: 100,
        ..GuardPolicy::default()
    });
    f.auth.set_passcode("1234", None).unwrap();

    for _ in 0..5 {
        f.auth.verify("1234", ID).unwrap();
        f.clock.advance(5);
    }
    assert!(matches!(
        f.auth.verify("1234", ID),
        Err(VaultError::RateLimited)
    ));

    // The first request leaves the window 60s after it was made.
    f.clock.advance(35);
    assert!(f.auth.verify("1234", ID).unwrap());
    assert_eq!(statuses(&f.audit, events::RATE_LIMIT), [AuditStatus::Blocked]);
}

#[test]
fn default_policy_reports_lockout_before_rate_limit() {
    let f = fixture(GuardPolicy::default());
    f.auth.set_passcode("1234", None).unwrap();
    for _ in 0..5 {
        assert!(!f.auth.verify("0000", ID).unwrap());
    }
    assert!(matches!(
        f.auth.verify("0000", ID),
        Err(VaultError::LockedOut { .. })
    ));
}
