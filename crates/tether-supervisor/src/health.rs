//! Health monitoring of the running daemon.
//!
//! Probes the liveness endpoint on a fixed cadence, counts *consecutive*
//! timeouts, and declares a crash exactly once when the threshold is
//! crossed. The counting core lives in [`HealthCounter`], a plain struct
//! with no I/O, so the policy is testable without a daemon.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;

use tether_core::{BusyReason, EventBus, LifecycleEvent, StatusMachine, SupervisorConfig};

use crate::probe::DaemonApi;

// =============================================================================
// HealthCounter
// =============================================================================

/// Consecutive-timeout counter with a latch-once crash flag.
///
/// A successful probe resets the count; once the threshold is reached the
/// crash flag latches and further timeouts are ignored until [`reset`]
/// (called on each new start attempt).
///
/// [`reset`]: HealthCounter::reset
#[derive(Debug, Clone)]
pub struct HealthCounter {
    threshold: u32,
    consecutive_failures: u32,
    crashed: bool,
}

impl HealthCounter {
    /// Creates a counter that latches after `threshold` consecutive
    /// timeouts.
    #[must_use]
    pub const fn new(threshold: u32) -> Self {
        Self {
            threshold,
            consecutive_failures: 0,
            crashed: false,
        }
    }

    /// Records a successful probe. No effect once crashed.
    pub fn record_success(&mut self) {
        if !self.crashed {
            self.consecutive_failures = 0;
        }
    }

    /// Records a probe timeout.
    ///
    /// Returns true exactly when this timeout crossed the threshold; the
    /// caller emits the crash signal on that transition only.
    pub fn record_timeout(&mut self) -> bool {
        if self.crashed {
            return false;
        }
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.threshold {
            self.crashed = true;
            return true;
        }
        false
    }

    /// Clears the counter and the crash latch for a new start attempt.
    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.crashed = false;
    }

    /// Current consecutive failure count.
    #[must_use]
    pub const fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Whether the crash flag is latched.
    #[must_use]
    pub const fn is_crashed(&self) -> bool {
        self.crashed
    }
}

// =============================================================================
// HealthMonitor
// =============================================================================

/// Periodic liveness prober.
///
/// One long-lived loop re-reads the state machine on every tick and skips
/// probing while the daemon is not active or while an install is in
/// progress, so there is never a second overlapping interval to tear down
/// and the counter is untouched while paused.
pub struct HealthMonitor {
    machine: Arc<StatusMachine>,
    bus: EventBus,
    api: Arc<dyn DaemonApi>,
    interval: Duration,
    probe_timeout: Duration,
    counter: Mutex<HealthCounter>,
}

impl HealthMonitor {
    /// Creates a monitor from the supervisor configuration.
    #[must_use]
    pub fn new(
        config: &SupervisorConfig,
        machine: Arc<StatusMachine>,
        bus: EventBus,
        api: Arc<dyn DaemonApi>,
    ) -> Self {
        Self {
            machine,
            bus,
            api,
            interval: config.probe_interval,
            probe_timeout: config.probe_timeout,
            counter: Mutex::new(HealthCounter::new(config.failure_threshold)),
        }
    }

    /// Clears the counter and crash latch. Called on every start attempt.
    pub fn reset(&self) {
        self.counter.lock().reset();
    }

    /// Current consecutive failure count.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.counter.lock().consecutive_failures()
    }

    /// Whether the crash latch is set.
    #[must_use]
    pub fn is_crashed(&self) -> bool {
        self.counter.lock().is_crashed()
    }

    /// Runs the probe loop until the owning task is aborted.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.probe_once().await;
        }
    }

    /// One probe cycle. Reads current state fresh; never probes while the
    /// daemon is not supposed to be up.
    pub async fn probe_once(&self) {
        let state = self.machine.snapshot().await;

        if !state.daemon_active {
            return;
        }
        if state.status.busy_reason() == Some(BusyReason::Installing) {
            // The daemon may be legitimately overloaded during an install;
            // neither increment nor reset while paused.
            tracing::trace!("health probe paused during install");
            return;
        }

        match tokio::time::timeout(self.probe_timeout, self.api.liveness()).await {
            Ok(Ok(())) => {
                self.counter.lock().record_success();
            }
            Ok(Err(failure)) if !failure.counts_toward_crash() => {
                // The daemon answered, just not happily. Alive.
                tracing::warn!(error = %failure, "liveness probe failed without timeout, not counted");
            }
            Ok(Err(failure)) => {
                self.record_timeout(&failure.to_string());
            }
            Err(_) => {
                let detail = format!("no response within {:?}", self.probe_timeout);
                self.record_timeout(&detail);
            }
        }
    }

    fn record_timeout(&self, detail: &str) {
        let crossed;
        let failures;
        {
            let mut counter = self.counter.lock();
            crossed = counter.record_timeout();
            failures = counter.consecutive_failures();
        }

        if crossed {
            tracing::error!(
                failures,
                detail,
                "liveness threshold crossed, declaring daemon crashed"
            );
            self.bus.emit(LifecycleEvent::CrashDetected {
                consecutive_failures: failures,
            });
        } else {
            tracing::debug!(failures, detail, "liveness probe timed out");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_counter_all_successes_stay_zero() {
        let mut counter = HealthCounter::new(3);
        for _ in 0..20 {
            counter.record_success();
        }
        assert_eq!(counter.consecutive_failures(), 0);
        assert!(!counter.is_crashed());
    }

    #[test]
    fn test_counter_crash_fires_exactly_once() {
        let mut counter = HealthCounter::new(3);
        assert!(!counter.record_timeout());
        assert!(!counter.record_timeout());
        assert!(counter.record_timeout());
        assert!(counter.is_crashed());
        // A fourth timeout does not re-fire and does not increment.
        assert!(!counter.record_timeout());
        assert_eq!(counter.consecutive_failures(), 3);
    }

    #[test]
    fn test_counter_success_resets_below_threshold() {
        let mut counter = HealthCounter::new(3);
        counter.record_timeout();
        counter.record_timeout();
        assert_eq!(counter.consecutive_failures(), 2);
        counter.record_success();
        assert_eq!(counter.consecutive_failures(), 0);
        assert!(!counter.is_crashed());
    }

    #[test]
    fn test_counter_success_does_not_clear_latch() {
        let mut counter = HealthCounter::new(2);
        counter.record_timeout();
        counter.record_timeout();
        assert!(counter.is_crashed());
        // Only an explicit reset (new start attempt) clears the latch.
        counter.record_success();
        assert!(counter.is_crashed());
        counter.reset();
        assert!(!counter.is_crashed());
        assert_eq!(counter.consecutive_failures(), 0);
    }

    proptest! {
        /// The latch sets iff some run of `threshold` consecutive timeouts
        /// occurs with no intervening success.
        #[test]
        fn prop_latch_iff_consecutive_run(sequence in proptest::collection::vec(any::<bool>(), 0..64)) {
            const THRESHOLD: u32 = 3;
            let mut counter = HealthCounter::new(THRESHOLD);
            let mut fired = 0u32;

            let mut run = 0u32;
            let mut expect_latched = false;
            for &timeout in &sequence {
                if timeout {
                    if counter.record_timeout() {
                        fired += 1;
                    }
                    if !expect_latched {
                        run += 1;
                        if run >= THRESHOLD {
                            expect_latched = true;
                        }
                    }
                } else {
                    counter.record_success();
                    if !expect_latched {
                        run = 0;
                    }
                }
            }

            prop_assert_eq!(counter.is_crashed(), expect_latched);
            prop_assert_eq!(fired, u32::from(expect_latched));
        }
    }
}
