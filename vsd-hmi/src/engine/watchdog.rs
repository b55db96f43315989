use std::sync::{Arc, Mutex};

/// Consecutive failures tolerated before the link is declared dead.
pub(crate) const FAILURE_THRESHOLD: u32 = 3;

/// Consecutive-failure counter shared by both schedulers.
///
/// One physical link underlies both, so any read failure counts as evidence
/// of link health regardless of which scheduler observed it. Both schedulers
/// report from independent tasks, hence the mutex: counter mutations must
/// serialise. The `tripped` latch makes escalation fire exactly once even
/// when both schedulers cross the threshold in the same tick cycle.
#[derive(Clone, Debug, Default)]
pub struct Watchdog {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    failures: u32,
    tripped: bool,
}

impl Watchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A successful batch read. Resets the counter unless teardown is
    /// already in progress.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.tripped {
            inner.failures = 0;
        }
    }

    /// A failed batch read. Returns `true` exactly once, when the counter
    /// first reaches the threshold; the caller must then force a disconnect.
    pub fn record_failure(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.tripped {
            return false;
        }
        inner.failures += 1;
        if inner.failures >= FAILURE_THRESHOLD {
            inner.tripped = true;
            return true;
        }
        false
    }

    /// Re-arm for a fresh connection.
    pub fn rearm(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.failures = 0;
        inner.tripped = false;
    }

    #[cfg(test)]
    pub(crate) fn failures(&self) -> u32 {
        self.inner.lock().unwrap().failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_exactly_once_at_the_threshold() {
        let watchdog = Watchdog::new();
        assert!(!watchdog.record_failure());
        assert!(!watchdog.record_failure());
        assert!(watchdog.record_failure());

        // Stale ticks from a scheduler that has not yet observed the
        // teardown must not re-trigger it.
        assert!(!watchdog.record_failure());
        assert!(!watchdog.record_failure());
    }

    #[test]
    fn success_resets_the_count() {
        let watchdog = Watchdog::new();
        assert!(!watchdog.record_failure());
        assert!(!watchdog.record_failure());
        watchdog.record_success();
        assert_eq!(watchdog.failures(), 0);

        // Two more failures after the reset stay below the threshold.
        assert!(!watchdog.record_failure());
        assert!(!watchdog.record_failure());
        assert!(watchdog.record_failure());
    }

    #[test]
    fn success_after_the_trip_does_not_untrip() {
        let watchdog = Watchdog::new();
        for _ in 0..2 {
            watchdog.record_failure();
        }
        assert!(watchdog.record_failure());

        watchdog.record_success();
        assert!(!watchdog.record_failure());
    }

    #[test]
    fn rearm_starts_a_fresh_cycle() {
        let watchdog = Watchdog::new();
        for _ in 0..3 {
            watchdog.record_failure();
        }

        watchdog.rearm();
        assert!(!watchdog.record_failure());
        assert!(!watchdog.record_failure());
        assert!(watchdog.record_failure());
    }
}
