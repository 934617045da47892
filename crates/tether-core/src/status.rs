//! The status state machine: the single authoritative representation of
//! what the robot is doing right now.
//!
//! Every other component reads from or writes to it exclusively through the
//! transition methods below; nothing sets status directly. The machine is
//! one owned object handed to each component behind an `Arc`, never reached
//! through ambient lookup. Every successful mutation is broadcast so the
//! cross-window synchronizer and the UI observe each write.

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast};

use crate::types::{
    BusyReason, ExitInfo, HardwareError, RobotStatus, Telemetry,
};

/// Capacity of the change broadcast channel.
const CHANGE_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// TransitionError
// =============================================================================

/// A rejected status transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    /// The event is not defined for the current status.
    #[error("cannot {event} while {from}")]
    Invalid {
        /// Status at the time of the event.
        from: RobotStatus,
        /// The rejected event.
        event: &'static str,
    },

    /// A ready confirmation arrived while a hardware error is attached.
    ///
    /// `Starting` is sticky in that case: the error must be cleared by a
    /// retry first, never overridden by an independent "daemon responded"
    /// signal.
    #[error("ready signal rejected while a hardware error is attached")]
    HardwareErrorAttached,
}

// =============================================================================
// StartupFailure
// =============================================================================

/// Why the current start attempt has not reached `Ready`.
///
/// Spawn failure, startup timeout, and unexpected termination are distinct
/// causes with distinct user-facing messages, all converging on the same
/// stay-in-`Starting`, offer-retry behavior. Hardware faults are carried
/// separately as [`HardwareError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "kebab-case")]
pub enum StartupFailure {
    /// The daemon executable could not be launched at all.
    Spawn {
        /// Launch error detail.
        detail: String,
    },
    /// The daemon launched but never signalled ready within the deadline.
    Timeout,
    /// The daemon process exited before reaching ready.
    Terminated {
        /// How it exited.
        exit: ExitInfo,
    },
}

impl StartupFailure {
    /// User-facing message for this failure.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Spawn { detail } => {
                format!("The robot daemon could not be launched: {detail}")
            }
            Self::Timeout => {
                "The robot daemon did not become ready in time. \
                 Retry, and check the USB connection if this persists."
                    .to_string()
            }
            Self::Terminated { exit } => {
                format!("The robot daemon stopped unexpectedly ({exit}).")
            }
        }
    }
}

// =============================================================================
// RobotState
// =============================================================================

/// Full observable state held by the machine.
///
/// Cloned out on every read; components re-read at each decision point
/// instead of caching a copy in a long-lived closure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotState {
    /// Current lifecycle status.
    pub status: RobotStatus,
    /// True while a daemon is believed to be up (spawned or already
    /// answering). Gates the health monitor.
    pub daemon_active: bool,
    /// Active hardware fault, if any.
    pub hardware_error: Option<HardwareError>,
    /// Active startup failure, if any.
    pub startup_failure: Option<StartupFailure>,
    /// Name of the user application holding the robot, if any.
    pub running_app: Option<String>,
    /// Latest telemetry from the readiness endpoint.
    pub telemetry: Telemetry,
}

impl Default for RobotState {
    fn default() -> Self {
        Self {
            status: RobotStatus::Disconnected,
            daemon_active: false,
            hardware_error: None,
            startup_failure: None,
            running_app: None,
            telemetry: Telemetry::default(),
        }
    }
}

impl RobotState {
    /// User-facing status label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        self.status.label()
    }

    /// Returns true while retry should be offered: `Starting` with an
    /// attached error of either kind.
    #[must_use]
    pub fn can_retry(&self) -> bool {
        self.status == RobotStatus::Starting
            && (self.hardware_error.is_some() || self.startup_failure.is_some())
    }

    /// Releases any held busy/app lock.
    ///
    /// Compensating action for `Crashed`/`Disconnected`/`stop_confirmed`;
    /// idempotent when nothing is held.
    fn release_locks(&mut self) {
        self.running_app = None;
    }
}

// =============================================================================
// StatusMachine
// =============================================================================

/// The authoritative status store.
pub struct StatusMachine {
    state: RwLock<RobotState>,
    changes: broadcast::Sender<RobotState>,
}

impl StatusMachine {
    /// Creates a machine in the initial `Disconnected` state.
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(RobotState::default()),
            changes,
        }
    }

    /// Subscribes to state writes. Every successful mutation sends the full
    /// post-mutation state.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RobotState> {
        self.changes.subscribe()
    }

    /// Returns a clone of the current state.
    pub async fn snapshot(&self) -> RobotState {
        self.state.read().await.clone()
    }

    /// Returns the current status.
    pub async fn status(&self) -> RobotStatus {
        self.state.read().await.status
    }

    /// Returns true while retry should be offered.
    pub async fn can_retry(&self) -> bool {
        self.state.read().await.can_retry()
    }

    /// Applies a mutation under the write lock and broadcasts the result.
    async fn mutate<F>(&self, event: &'static str, f: F) -> Result<(), TransitionError>
    where
        F: FnOnce(&mut RobotState) -> Result<bool, TransitionError>,
    {
        let mut state = self.state.write().await;
        let old = state.status;
        let changed = f(&mut state)?;
        if changed {
            tracing::debug!(event, old = %old, new = %state.status, "status transition");
            let _ = self.changes.send(state.clone());
        }
        Ok(())
    }

    /// A robot device was attached.
    pub async fn device_attached(&self) -> Result<(), TransitionError> {
        self.mutate("attach device", |s| match s.status {
            RobotStatus::Disconnected => {
                s.status = RobotStatus::ReadyToStart;
                Ok(true)
            }
            from => Err(TransitionError::Invalid {
                from,
                event: "attach device",
            }),
        })
        .await
    }

    /// The robot device was detached.
    ///
    /// Valid from any state; force-clears busy/app locks and both error
    /// slots. Idempotent when already disconnected.
    pub async fn device_detached(&self) -> Result<(), TransitionError> {
        self.mutate("detach device", |s| {
            if s.status == RobotStatus::Disconnected {
                return Ok(false);
            }
            s.status = RobotStatus::Disconnected;
            s.daemon_active = false;
            s.hardware_error = None;
            s.startup_failure = None;
            s.release_locks();
            Ok(true)
        })
        .await
    }

    /// A start (or retry) was requested.
    ///
    /// Clears prior startup and hardware errors. Valid from `ReadyToStart`
    /// and, for retry, from `Starting`.
    pub async fn start_requested(&self) -> Result<(), TransitionError> {
        self.mutate("start", |s| match s.status {
            RobotStatus::ReadyToStart | RobotStatus::Starting => {
                s.status = RobotStatus::Starting;
                s.hardware_error = None;
                s.startup_failure = None;
                Ok(true)
            }
            from => Err(TransitionError::Invalid {
                from,
                event: "start",
            }),
        })
        .await
    }

    /// The daemon was confirmed ready (control layer initialized).
    ///
    /// Rejected with [`TransitionError::HardwareErrorAttached`] while a
    /// hardware error is attached; the error must be cleared by retry
    /// first.
    pub async fn confirm_ready(&self, telemetry: Telemetry) -> Result<(), TransitionError> {
        self.mutate("confirm ready", |s| match s.status {
            RobotStatus::Starting => {
                if s.hardware_error.is_some() {
                    return Err(TransitionError::HardwareErrorAttached);
                }
                s.status = RobotStatus::Ready;
                s.startup_failure = None;
                s.daemon_active = true;
                s.telemetry = telemetry;
                Ok(true)
            }
            from => Err(TransitionError::Invalid {
                from,
                event: "confirm ready",
            }),
        })
        .await
    }

    /// The startup deadline elapsed before a ready signal.
    ///
    /// Stays in `Starting` with the timeout error surfaced.
    pub async fn startup_timed_out(&self) -> Result<(), TransitionError> {
        self.startup_failed(StartupFailure::Timeout).await
    }

    /// The current start attempt failed for the given cause.
    ///
    /// Stays in `Starting`; the UI shows the message and offers retry.
    pub async fn startup_failed(&self, failure: StartupFailure) -> Result<(), TransitionError> {
        self.mutate("fail startup", |s| match s.status {
            RobotStatus::Starting => {
                s.startup_failure = Some(failure);
                Ok(true)
            }
            from => Err(TransitionError::Invalid {
                from,
                event: "fail startup",
            }),
        })
        .await
    }

    /// Attaches a classified hardware fault. Stays in `Starting`.
    ///
    /// A generic diagnosis never overwrites a specific one already
    /// attached; the existing error is kept and the new one dropped.
    pub async fn attach_hardware_error(&self, error: HardwareError) -> Result<(), TransitionError> {
        self.mutate("attach hardware error", |s| match s.status {
            RobotStatus::Starting => {
                if let Some(existing) = &s.hardware_error {
                    if existing.kind.is_specific() && !error.kind.is_specific() {
                        tracing::debug!(
                            kept = ?existing.kind,
                            "generic fault ignored; specific diagnosis already attached"
                        );
                        return Ok(false);
                    }
                }
                s.hardware_error = Some(error);
                Ok(true)
            }
            from => Err(TransitionError::Invalid {
                from,
                event: "attach hardware error",
            }),
        })
        .await
    }

    /// An exclusive operation began.
    ///
    /// Valid only from `Ready`; a second reason while already `Busy` is
    /// rejected; that rejection is the busy-lock mutual exclusion.
    pub async fn begin_busy(&self, reason: BusyReason) -> Result<(), TransitionError> {
        self.mutate("begin busy", |s| match s.status {
            RobotStatus::Ready => {
                s.status = RobotStatus::Busy(reason);
                Ok(true)
            }
            from => Err(TransitionError::Invalid {
                from,
                event: "begin busy",
            }),
        })
        .await
    }

    /// A user application took the robot.
    pub async fn begin_app(&self, name: impl Into<String>) -> Result<(), TransitionError> {
        let name = name.into();
        self.mutate("begin app", |s| match s.status {
            RobotStatus::Ready => {
                s.status = RobotStatus::Busy(BusyReason::AppRunning);
                s.running_app = Some(name);
                Ok(true)
            }
            from => Err(TransitionError::Invalid {
                from,
                event: "begin app",
            }),
        })
        .await
    }

    /// The exclusive operation ended; reason is cleared.
    pub async fn end_busy(&self) -> Result<(), TransitionError> {
        self.mutate("end busy", |s| match s.status {
            RobotStatus::Busy(_) => {
                s.status = RobotStatus::Ready;
                s.release_locks();
                Ok(true)
            }
            from => Err(TransitionError::Invalid {
                from,
                event: "end busy",
            }),
        })
        .await
    }

    /// A stop was requested.
    pub async fn stop_requested(&self) -> Result<(), TransitionError> {
        self.mutate("stop", |s| match s.status {
            RobotStatus::Ready | RobotStatus::Busy(_) => {
                s.status = RobotStatus::Stopping;
                Ok(true)
            }
            from => Err(TransitionError::Invalid { from, event: "stop" }),
        })
        .await
    }

    /// The stop completed; settles in `ReadyToStart`.
    pub async fn stop_confirmed(&self) -> Result<(), TransitionError> {
        self.mutate("confirm stop", |s| match s.status {
            RobotStatus::Stopping => {
                s.status = RobotStatus::ReadyToStart;
                s.daemon_active = false;
                s.release_locks();
                Ok(true)
            }
            from => Err(TransitionError::Invalid {
                from,
                event: "confirm stop",
            }),
        })
        .await
    }

    /// The daemon crashed or stopped responding.
    ///
    /// Valid from any state; force-clears busy/app locks, since a crash
    /// invalidates any in-progress operation. Idempotent when already
    /// crashed.
    pub async fn crashed(&self) -> Result<(), TransitionError> {
        self.mutate("crash", |s| {
            if s.status == RobotStatus::Crashed {
                return Ok(false);
            }
            s.status = RobotStatus::Crashed;
            s.daemon_active = false;
            s.release_locks();
            Ok(true)
        })
        .await
    }

    /// Leaves `Crashed` back to `ReadyToStart` so a new start can begin.
    pub async fn acknowledge_crash(&self) -> Result<(), TransitionError> {
        self.mutate("acknowledge crash", |s| match s.status {
            RobotStatus::Crashed => {
                s.status = RobotStatus::ReadyToStart;
                s.hardware_error = None;
                s.startup_failure = None;
                Ok(true)
            }
            from => Err(TransitionError::Invalid {
                from,
                event: "acknowledge crash",
            }),
        })
        .await
    }

    /// Marks whether a daemon is believed to be up.
    pub async fn set_daemon_active(&self, active: bool) {
        let mut state = self.state.write().await;
        if state.daemon_active != active {
            state.daemon_active = active;
            let _ = self.changes.send(state.clone());
        }
    }

    /// Stores fresh telemetry without a status change.
    pub async fn update_telemetry(&self, telemetry: Telemetry) {
        let mut state = self.state.write().await;
        if state.telemetry != telemetry {
            state.telemetry = telemetry;
            let _ = self.changes.send(state.clone());
        }
    }
}

impl Default for StatusMachine {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
