//! Reconnection guard for a single target device.
//!
//! A device that just refused a connection, or whose session piled up I/O
//! errors, is left alone for a cooldown window of `2 × timeout`. Attempts
//! inside the window fail fast with [`FinsError::TryLater`] instead of
//! hammering an unreachable controller.
//!
//! ```text
//!   Idle ──(dial failed / error ceiling reached)──▶ CoolingDown
//!    ▲                                                  │
//!    └────────────(window elapsed / reset)──────────────┘
//! ```
//!
//! The guard is a cheap cloneable handle. Live sessions hold a clone and
//! report fatal errors into it, while the owning [`FinsSystem`](crate::FinsSystem)
//! consults it before every connect. Time is monotonic ([`Instant`]); every
//! operation has an `*_at` variant taking an explicit `now`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{FinsError, Result};

/// Observable guard state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardPhase {
    /// Connect attempts are allowed.
    Idle,
    /// Connect attempts are rejected until the window elapses.
    CoolingDown,
}

#[derive(Debug, Default)]
struct GuardState {
    last_attempt: Option<Instant>,
    error_count: u32,
    error_max: u32,
    error_changed: bool,
    session: Option<u64>,
}

impl GuardState {
    /// Arms the cooldown. The stored timestamp never moves backwards.
    fn arm(&mut self, now: Instant) {
        self.last_attempt = Some(match self.last_attempt {
            Some(previous) if previous > now => previous,
            _ => now,
        });
    }
}

/// Cooldown guard keyed on connect failures and accumulated I/O errors.
#[derive(Debug, Clone)]
pub struct ConnectionGuard {
    timeout: Duration,
    state: Arc<Mutex<GuardState>>,
}

impl ConnectionGuard {
    /// Creates an open guard with the given protocol timeout.
    ///
    /// # Example
    ///
    /// ```
    /// use omron_fins_tcp::{ConnectionGuard, GuardPhase};
    /// use std::time::{Duration, Instant};
    ///
    /// let guard = ConnectionGuard::new(Duration::from_secs(10));
    /// let t0 = Instant::now();
    /// guard.record_failure_at(t0);
    ///
    /// assert!(guard.check_at(t0 + Duration::from_secs(10)).is_err());
    /// assert!(guard.check_at(t0 + Duration::from_secs(21)).is_ok());
    /// assert_eq!(guard.phase_at(t0 + Duration::from_secs(21)), GuardPhase::Idle);
    /// ```
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            state: Arc::new(Mutex::new(GuardState::default())),
        }
    }

    /// Returns the cooldown window, twice the protocol timeout.
    pub fn window(&self) -> Duration {
        self.timeout.saturating_mul(2)
    }

    /// Checks whether a connect attempt may proceed now.
    pub fn check(&self) -> Result<()> {
        self.check_at(Instant::now())
    }

    /// Checks whether a connect attempt may proceed at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`FinsError::TryLater`] while cooling down. No state changes
    /// either way.
    pub fn check_at(&self, now: Instant) -> Result<()> {
        match self.remaining_at(now) {
            Some(remaining) => {
                log::warn!("connect rejected, guard cooling down for another {remaining:?}");
                Err(FinsError::TryLater)
            }
            None => Ok(()),
        }
    }

    /// Returns the time left in the cooldown window at `now`, if any.
    pub fn remaining_at(&self, now: Instant) -> Option<Duration> {
        let last = self.state.lock().last_attempt?;
        let until = last.checked_add(self.window())?;
        until.checked_duration_since(now).filter(|d| !d.is_zero())
    }

    /// Returns the guard phase at `now`.
    pub fn phase_at(&self, now: Instant) -> GuardPhase {
        if self.remaining_at(now).is_some() {
            GuardPhase::CoolingDown
        } else {
            GuardPhase::Idle
        }
    }

    /// Records a failed connect attempt, arming the cooldown.
    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now());
    }

    /// Records a failed connect attempt at `now`.
    pub fn record_failure_at(&self, now: Instant) {
        self.state.lock().arm(now);
    }

    /// Counts one I/O or protocol error against the ceiling.
    ///
    /// Returns `true` if this error reached the ceiling and armed the cooldown.
    pub fn record_error(&self) -> bool {
        self.record_error_at(Instant::now())
    }

    /// Counts one error at `now`. A ceiling of 0 disables arming.
    pub fn record_error_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock();
        state.error_count = state.error_count.saturating_add(1);
        if state.error_max > 0 && state.error_count == state.error_max {
            state.arm(now);
            state.error_changed = true;
            return true;
        }
        false
    }

    /// Counts an error reported by session `session_id`.
    ///
    /// Only the session the guard is bound to is charged; a stale session
    /// from an earlier connect is ignored and `false` is returned.
    pub fn record_session_error(&self, session_id: u64) -> bool {
        self.record_session_error_at(session_id, Instant::now())
    }

    /// [`record_session_error`](Self::record_session_error) at `now`.
    pub fn record_session_error_at(&self, session_id: u64, now: Instant) -> bool {
        if self.state.lock().session != Some(session_id) {
            log::debug!("ignoring error from unbound session {session_id}");
            return false;
        }
        self.record_error_at(now)
    }

    /// Binds the guard to the session opened by the latest connect.
    pub fn bind(&self, session_id: u64) {
        self.state.lock().session = Some(session_id);
    }

    /// Returns the session the guard is bound to.
    pub fn session(&self) -> Option<u64> {
        self.state.lock().session
    }

    /// Starts a clean slate after a successful connect.
    ///
    /// Clears the error count, stores the new ceiling and re-opens the guard,
    /// so success never leaves an artificial cooldown behind.
    pub fn reset(&self, error_max: u32) {
        let mut state = self.state.lock();
        state.last_attempt = None;
        state.error_count = 0;
        state.error_max = error_max;
        state.error_changed = false;
    }

    /// Returns the timestamp that started the current cooldown, if armed.
    pub fn last_attempt(&self) -> Option<Instant> {
        self.state.lock().last_attempt
    }

    /// Returns the number of errors counted since the last reset.
    pub fn error_count(&self) -> u32 {
        self.state.lock().error_count
    }

    /// Returns the error ceiling.
    pub fn error_max(&self) -> u32 {
        self.state.lock().error_max
    }

    /// Returns whether the ceiling was reached since the flag was last taken.
    pub fn error_changed(&self) -> bool {
        self.state.lock().error_changed
    }

    /// Returns and clears the "ceiling reached" flag.
    pub fn take_error_changed(&self) -> bool {
        std::mem::take(&mut self.state.lock().error_changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_secs(60);

    #[test]
    fn test_new_guard_is_open() {
        let guard = ConnectionGuard::new(T);
        let now = Instant::now();
        assert!(guard.check_at(now).is_ok());
        assert_eq!(guard.phase_at(now), GuardPhase::Idle);
        assert_eq!(guard.last_attempt(), None);
        assert_eq!(guard.window(), Duration::from_secs(120));
    }

    #[test]
    fn test_rejects_inside_window() {
        let guard = ConnectionGuard::new(T);
        let t0 = Instant::now();
        guard.record_failure_at(t0);

        assert!(matches!(guard.check_at(t0 + T), Err(FinsError::TryLater)));
        assert_eq!(guard.phase_at(t0 + T), GuardPhase::CoolingDown);
        assert_eq!(guard.remaining_at(t0 + T), Some(T));
    }

    #[test]
    fn test_allows_after_window() {
        let guard = ConnectionGuard::new(T);
        let t0 = Instant::now();
        guard.record_failure_at(t0);

        assert!(guard.check_at(t0 + 2 * T).is_ok());
        assert!(guard.check_at(t0 + 2 * T + Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn test_check_does_not_mutate() {
        let guard = ConnectionGuard::new(T);
        let t0 = Instant::now();
        guard.record_failure_at(t0);
        let _ = guard.check_at(t0 + T);
        assert_eq!(guard.last_attempt(), Some(t0));
    }

    #[test]
    fn test_timestamp_never_moves_backwards() {
        let guard = ConnectionGuard::new(T);
        let t0 = Instant::now();
        guard.record_failure_at(t0 + T);
        guard.record_failure_at(t0);
        assert_eq!(guard.last_attempt(), Some(t0 + T));
    }

    #[test]
    fn test_reset_reopens_guard() {
        let guard = ConnectionGuard::new(T);
        let t0 = Instant::now();
        guard.record_failure_at(t0);
        guard.record_error_at(t0);

        guard.reset(6);
        assert!(guard.check_at(t0).is_ok());
        assert_eq!(guard.error_count(), 0);
        assert_eq!(guard.error_max(), 6);
    }

    #[test]
    fn test_error_ceiling_arms_guard() {
        let guard = ConnectionGuard::new(T);
        guard.reset(3);
        let t0 = Instant::now();

        assert!(!guard.record_error_at(t0));
        assert!(!guard.record_error_at(t0));
        assert!(guard.check_at(t0).is_ok());
        assert!(guard.record_error_at(t0));

        assert!(guard.check_at(t0 + T).is_err());
        assert!(guard.error_changed());
        assert!(guard.take_error_changed());
        assert!(!guard.error_changed());
        assert_eq!(guard.error_count(), 3);
    }

    #[test]
    fn test_zero_ceiling_never_arms() {
        let guard = ConnectionGuard::new(T);
        let now = Instant::now();
        for _ in 0..10 {
            assert!(!guard.record_error_at(now));
        }
        assert!(guard.check_at(now).is_ok());
    }

    #[test]
    fn test_session_errors_only_count_for_bound_session() {
        let guard = ConnectionGuard::new(T);
        guard.reset(1);
        let t0 = Instant::now();

        assert!(!guard.record_session_error_at(1, t0));
        guard.bind(2);
        assert_eq!(guard.session(), Some(2));
        assert!(!guard.record_session_error_at(1, t0));
        assert_eq!(guard.error_count(), 0);
        assert!(guard.check_at(t0).is_ok());

        assert!(guard.record_session_error_at(2, t0));
        assert!(guard.check_at(t0).is_err());
    }

    #[test]
    fn test_clones_share_state() {
        let guard = ConnectionGuard::new(T);
        let reporter = guard.clone();
        let t0 = Instant::now();
        reporter.record_failure_at(t0);
        assert!(guard.check_at(t0).is_err());
    }
}
