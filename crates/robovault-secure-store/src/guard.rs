//! Brute-force throttling: per-identifier lockout plus a sliding-window
//! request cap.
//!
//! The guard knows nothing about what is being authenticated; it only
//! counts. All state sits in one in-memory ledger behind a mutex and is
//! pruned lazily on access.
//!
//! Per identifier:
//!
//! ```text
//! UNLOCKED(n) --failure--> UNLOCKED(n+1) --n+1 >= max--> LOCKED
//! LOCKED --lockout elapsed--> UNLOCKED(0)
//! UNLOCKED(n) --success--> UNLOCKED(0)
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::audit::{events, AuditStatus, AuditTrail};
use crate::clock::{Clock, SystemClock};

/// Thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardPolicy {
    /// Consecutive failures that trigger a lockout.
    pub max_attempts: u32,
    /// Lockout length in seconds.
    pub lockout_secs: u64,
    /// Sliding window length in seconds.
    pub window_secs: u64,
    /// Requests allowed inside one window.
    pub max_requests: u32,
}

impl Default for GuardPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lockout_secs: 120,
            window_secs: 60,
            max_requests: 5,
        }
    }
}

/// Answer from [`LockoutGuard::check_lockout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockoutStatus {
    /// Attempts are accepted.
    Unlocked,
    /// Attempts are refused for this many more seconds.
    Locked {
        /// Seconds until the lockout lifts.
        remaining_seconds: u64,
    },
}

impl LockoutStatus {
    /// Whether attempts are currently refused.
    #[must_use]
    pub const fn is_locked(self) -> bool {
        matches!(self, Self::Locked { .. })
    }

    /// Seconds left, 0 when unlocked.
    #[must_use]
    pub const fn remaining_seconds(self) -> u64 {
        match self {
            Self::Unlocked => 0,
            Self::Locked { remaining_seconds } => remaining_seconds,
        }
    }
}

#[derive(Debug, Default)]
struct AttemptState {
    failures: u32,
    locked_at: Option<u64>,
    requests: VecDeque<u64>,
}

impl AttemptState {
    fn is_idle(&self) -> bool {
        self.failures == 0 && self.locked_at.is_none() && self.requests.is_empty()
    }
}

/// Shared throttle for every authentication path.
pub struct LockoutGuard {
    policy: GuardPolicy,
    clock: Arc<dyn Clock>,
    audit: Option<Arc<AuditTrail>>,
    ledger: Mutex<HashMap<String, AttemptState>>,
}

impl std::fmt::Debug for LockoutGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockoutGuard")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Default for LockoutGuard {
    fn default() -> Self {
        Self::new(GuardPolicy::default(), Arc::new(SystemClock))
    }
}

impl LockoutGuard {
    /// Guard with the given thresholds and time source.
    #[must_use]
    pub fn new(policy: GuardPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            clock,
            audit: None,
            ledger: Mutex::new(HashMap::new()),
        }
    }

    /// Record refusals, failures, lockouts and resets in `audit`.
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<AuditTrail>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Thresholds in force.
    #[must_use]
    pub const fn policy(&self) -> &GuardPolicy {
        &self.policy
    }

    fn ledger(&self) -> MutexGuard<'_, HashMap<String, AttemptState>> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn audit(&self, event: &str, identifier: &str, details: &str, status: AuditStatus) {
        if let Some(audit) = &self.audit {
            audit.log_event(event, identifier, details, status);
        }
    }

    /// Count one request against the sliding window.
    ///
    /// Returns `false` when the window is full. Refused requests are not
    /// counted, so a caller hammering the limiter does not extend it.
    pub fn check_rate_limit(&self, identifier: &str) -> bool {
        let now = self.clock.now_secs();
        let allowed = {
            let mut ledger = self.ledger();
            let state = ledger.entry(identifier.to_owned()).or_default();
            while state
                .requests
                .front()
                .is_some_and(|&t| now.saturating_sub(t) >= self.policy.window_secs)
            {
                state.requests.pop_front();
            }
            let under_cap = u32::try_from(state.requests.len())
                .is_ok_and(|n| n < self.policy.max_requests);
            if under_cap {
                state.requests.push_back(now);
            }
            under_cap
        };

        if !allowed {
            tracing::warn!(identifier, "rate limit exceeded");
            self.audit(
                events::RATE_LIMIT,
                identifier,
                &format!(
                    "more than {} requests in {}s",
                    self.policy.max_requests, self.policy.window_secs
                ),
                AuditStatus::Blocked,
            );
        }
        allowed
    }

    /// Whether `identifier` is locked out, and for how long.
    ///
    /// An expired lockout is cleared here together with the failure count.
    pub fn check_lockout(&self, identifier: &str) -> LockoutStatus {
        let now = self.clock.now_secs();
        let status = {
            let mut ledger = self.ledger();
            let Some(state) = ledger.get_mut(identifier) else {
                return LockoutStatus::Unlocked;
            };
            match state.locked_at {
                Some(locked_at) => {
                    let elapsed = now.saturating_sub(locked_at);
                    if elapsed < self.policy.lockout_secs {
                        LockoutStatus::Locked {
                            remaining_seconds: self.policy.lockout_secs.saturating_sub(elapsed),
                        }
                    } else {
                        state.locked_at = None;
                        state.failures = 0;
                        if state.is_idle() {
                            ledger.remove(identifier);
                        }
                        tracing::info!(identifier, "lockout expired");
                        LockoutStatus::Unlocked
                    }
                }
                None => LockoutStatus::Unlocked,
            }
        };

        if let LockoutStatus::Locked { remaining_seconds } = status {
            self.audit(
                events::LOCKOUT_CHECK,
                identifier,
                &format!("attempt refused, {remaining_seconds}s remaining"),
                AuditStatus::Blocked,
            );
        }
        status
    }

    /// Count a failed attempt. Returns `true` if this failure started a
    /// lockout.
    pub fn record_failure(&self, identifier: &str) -> bool {
        let now = self.clock.now_secs();
        let (failures, triggered) = {
            let mut ledger = self.ledger();
            let state = ledger.entry(identifier.to_owned()).or_default();
            state.failures = state.failures.saturating_add(1);
            let triggered =
                state.locked_at.is_none() && state.failures >= self.policy.max_attempts;
            if triggered {
                state.locked_at = Some(now);
            }
            (state.failures, triggered)
        };

        self.audit(
            events::FAILED_ATTEMPT,
            identifier,
            &format!("failed attempt {failures}/{}", self.policy.max_attempts),
            AuditStatus::Failed,
        );
        if triggered {
            tracing::warn!(identifier, failures, "lockout triggered");
            self.audit(
                events::LOCKOUT,
                identifier,
                &format!(
                    "locked for {}s after {failures} failed attempts",
                    self.policy.lockout_secs
                ),
                AuditStatus::Locked,
            );
        }
        triggered
    }

    /// Clear failures and any lockout after a successful authentication.
    pub fn reset(&self, identifier: &str) {
        {
            let mut ledger = self.ledger();
            if let Some(state) = ledger.get_mut(identifier) {
                state.failures = 0;
                state.locked_at = None;
                if state.is_idle() {
                    ledger.remove(identifier);
                }
            }
        }
        self.audit(
            events::RESET_ATTEMPTS,
            identifier,
            "failure counter cleared",
            AuditStatus::Success,
        );
    }

    /// Consecutive failures currently counted for `identifier`.
    #[must_use]
    pub fn failure_count(&self, identifier: &str) -> u32 {
        self.ledger().get(identifier).map_or(0, |s| s.failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use tempfile::TempDir;

    fn guard() -> (LockoutGuard, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        (
            LockoutGuard::new(GuardPolicy::default(), Arc::clone(&clock) as Arc<dyn Clock>),
            clock,
        )
    }

    #[test]
    fn fifth_failure_locks() {
        let (g, _) = guard();
        for _ in 0..4 {
            assert!(!g.record_failure("pc"));
        }
        assert!(!g.check_lockout("pc").is_locked());
        assert!(g.record_failure("pc"));
        assert_eq!(
            g.check_lockout("pc"),
            LockoutStatus::Locked {
                remaining_seconds: 120
            }
        );
    }

    #[test]
    fn lockout_counts_down_then_clears_everything() {
        let (g, clock) = guard();
        for _ in 0..5 {
            g.record_failure("pc");
        }
        clock.advance(100);
        assert_eq!(g.check_lockout("pc").remaining_seconds(), 20);
        clock.advance(20);
        assert_eq!(g.check_lockout("pc"), LockoutStatus::Unlocked);
        assert_eq!(g.failure_count("pc"), 0);
    }

    #[test]
    fn failures_while_locked_do_not_extend_lockout() {
        let (g, clock) = guard();
        for _ in 0..5 {
            g.record_failure("pc");
        }
        clock.advance(60);
        assert!(!g.record_failure("pc"));
        clock.advance(60);
        assert!(!g.check_lockout("pc").is_locked());
    }

    #[test]
    fn reset_clears_failures() {
        let (g, _) = guard();
        g.record_failure("pc");
        g.record_failure("pc");
        g.reset("pc");
        assert_eq!(g.failure_count("pc"), 0);
        for _ in 0..4 {
            assert!(!g.record_failure("pc"));
        }
    }

    #[test]
    fn identifiers_are_independent() {
        let (g, _) = guard();
        for _ in 0..5 {
            g.record_failure("attacker");
        }
        assert!(g.check_lockout("attacker").is_locked());
        assert!(!g.check_lockout("operator").is_locked());
    }

    #[test]
    fn sixth_request_in_window_refused() {
        let (g, clock) = guard();
        for _ in 0..5 {
            assert!(g.check_rate_limit("pc"));
            clock.advance(1);
        }
        assert!(!g.check_rate_limit("pc"));
        clock.advance(60);
        assert!(g.check_rate_limit("pc"));
    }

    #[test]
    fn window_slides_rather_than_resets() {
        let (g, clock) = guard();
        assert!(g.check_rate_limit("pc")); // t=1000
        clock.advance(30);
        for _ in 0..4 {
            assert!(g.check_rate_limit("pc")); // t=1030
        }
        assert!(!g.check_rate_limit("pc"));
        clock.advance(30); // first request ages out, the other four do not
        assert!(g.check_rate_limit("pc"));
        assert!(!g.check_rate_limit("pc"));
    }

    #[test]
    fn refused_requests_are_not_counted() {
        let (g, clock) = guard();
        for _ in 0..5 {
            g.check_rate_limit("pc");
        }
        for _ in 0..50 {
            assert!(!g.check_rate_limit("pc"));
        }
        clock.advance(60);
        assert!(g.check_rate_limit("pc"));
    }

    #[test]
    fn audit_records_the_state_machine() {
        let dir = TempDir::new().unwrap();
        let audit = Arc::new(AuditTrail::plain(dir.path().join("audit.log")));
        let clock = Arc::new(ManualClock::new(0));
        let g = LockoutGuard::new(
            GuardPolicy {
                max_attempts: 2,
                max_requests: 1,
                ..GuardPolicy::default()
            },
            clock,
        )
        .with_audit(Arc::clone(&audit));

        g.check_rate_limit("pc");
        g.check_rate_limit("pc");
        g.record_failure("pc");
        g.record_failure("pc");
        g.check_lockout("pc");
        g.reset("pc");

        let got: Vec<(String, AuditStatus)> = audit
            .read_entries()
            .unwrap()
            .into_iter()
            .map(|e| (e.event_type, e.status))
            .collect();
        let want = [
            (events::RATE_LIMIT, AuditStatus::Blocked),
            (events::FAILED_ATTEMPT, AuditStatus::Failed),
            (events::FAILED_ATTEMPT, AuditStatus::Failed),
            (events::LOCKOUT, AuditStatus::Locked),
            (events::LOCKOUT_CHECK, AuditStatus::Blocked),
            (events::RESET_ATTEMPTS, AuditStatus::Success),
        ];
        assert_eq!(got.len(), want.len());
        for ((event, status), (want_event, want_status)) in got.iter().zip(want) {
            assert_eq!(event, want_event);
            assert_eq!(*status, want_status);
        }
    }

    #[test]
    fn guard_is_shareable_across_threads() {
        let (g, _) = guard();
        let g = Arc::new(g);
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let g = Arc::clone(&g);
                std::thread::spawn(move || g.record_failure("pc"))
            })
            .collect();
        let triggered = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|t| *t)
            .count();
        assert_eq!(triggered, 1);
        assert_eq!(g.failure_count("pc"), 10);
    }
}
