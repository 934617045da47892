//! Core types for robot daemon supervision.
//!
//! Status is an explicit state machine value; the busy reason lives inside
//! the `Busy` variant so it cannot outlive the busy state.

use serde::{Deserialize, Serialize};

// =============================================================================
// AttemptId
// =============================================================================

/// Unique identifier for one daemon start attempt.
///
/// Deadline timers and readiness signals carry the attempt they belong to,
/// so a timer left over from a previous attempt resolves to a no-op instead
/// of corrupting the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttemptId(uuid::Uuid);

impl AttemptId {
    /// Creates a new random attempt ID.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Returns the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for AttemptId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AttemptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// RobotStatus / BusyReason
// =============================================================================

/// Why the robot is busy.
///
/// Meaningful only inside [`RobotStatus::Busy`]; dropped on any transition
/// out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BusyReason {
    /// A motion command is playing.
    Moving,
    /// A one-shot command is executing.
    Command,
    /// A user application holds the robot.
    AppRunning,
    /// An application install is in progress; the daemon may be
    /// legitimately overloaded, so health probing pauses.
    Installing,
}

impl BusyReason {
    /// User-facing label for this reason.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Moving => "moving",
            Self::Command => "running command",
            Self::AppRunning => "app running",
            Self::Installing => "installing",
        }
    }
}

/// Robot lifecycle status.
///
/// Exactly one value is active at any time. Transitions happen only through
/// [`StatusMachine`](crate::status::StatusMachine) methods:
/// ```text
/// Disconnected → ReadyToStart → Starting → Ready ↔ Busy → Stopping → ReadyToStart
///                                   ↑__________________________|
///              (any) → Crashed / Disconnected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RobotStatus {
    /// No robot device attached.
    Disconnected,
    /// Device attached, daemon not running.
    ReadyToStart,
    /// Daemon launched (or launching), not yet confirmed ready.
    Starting,
    /// Daemon answering and control layer initialized.
    Ready,
    /// An exclusive operation holds the robot.
    Busy(BusyReason),
    /// Shutdown in progress.
    Stopping,
    /// The daemon died or stopped responding while believed active.
    Crashed,
}

impl RobotStatus {
    /// Returns true while the daemon is expected to be up.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Starting | Self::Ready | Self::Busy(_) | Self::Stopping
        )
    }

    /// Returns true if the robot can accept a new exclusive operation.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Returns the busy reason, if any.
    #[must_use]
    pub const fn busy_reason(&self) -> Option<BusyReason> {
        match self {
            Self::Busy(reason) => Some(*reason),
            _ => None,
        }
    }

    /// User-facing status label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::ReadyToStart => "ready to start",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Busy(reason) => reason.label(),
            Self::Stopping => "stopping",
            Self::Crashed => "crashed",
        }
    }
}

impl std::fmt::Display for RobotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// =============================================================================
// HardwareError
// =============================================================================

/// Subsystem a hardware fault was attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HardwareErrorKind {
    /// Camera pipeline fault.
    Camera,
    /// Motor bus / servo fault.
    MotorBus,
    /// Inertial measurement unit fault.
    Imu,
    /// Audio device fault.
    Audio,
    /// Unattributed runtime failure.
    Generic,
}

impl HardwareErrorKind {
    /// Returns true for a subsystem-specific diagnosis.
    ///
    /// A generic diagnosis never overwrites a specific one.
    #[must_use]
    pub const fn is_specific(&self) -> bool {
        !matches!(self, Self::Generic)
    }
}

/// A typed hardware fault produced by the log classifier.
///
/// Persists until the user retries or the daemon is confirmed ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareError {
    /// Which subsystem failed.
    pub kind: HardwareErrorKind,
    /// The raw log line that matched. Never shown verbatim to the user.
    pub raw_message: String,
    /// User-actionable guidance.
    pub suggested_action: String,
    /// Settings pane the UI should focus, if any.
    pub focus_target: Option<String>,
}

impl HardwareError {
    /// Creates a hardware error.
    #[must_use]
    pub fn new(
        kind: HardwareErrorKind,
        raw_message: impl Into<String>,
        suggested_action: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            raw_message: raw_message.into(),
            suggested_action: suggested_action.into(),
            focus_target: None,
        }
    }

    /// Constructs the generic error used when a failure marker matched but
    /// no subsystem pattern did.
    #[must_use]
    pub fn generic(raw_message: impl Into<String>) -> Self {
        Self::new(
            HardwareErrorKind::Generic,
            raw_message,
            "The robot daemon reported an internal error. Retry, and check the daemon log if it persists.",
        )
    }

    /// Sets the UI focus target.
    #[must_use]
    pub fn with_focus(mut self, target: impl Into<String>) -> Self {
        self.focus_target = Some(target.into());
        self
    }
}

// =============================================================================
// ExitInfo
// =============================================================================

/// Exit status of the daemon process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitInfo {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal, if any (Unix).
    pub signal: Option<i32>,
}

impl ExitInfo {
    /// Creates exit info from a code.
    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    /// Creates exit info from a terminating signal.
    #[must_use]
    pub const fn from_signal(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    /// Returns true for a clean zero exit.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.code == Some(0)
    }

    /// Short human description, used inside composed user messages.
    #[must_use]
    pub fn describe(&self) -> String {
        match (self.code, self.signal) {
            (Some(code), _) => format!("exited with code {code}"),
            (None, Some(sig)) => format!("killed by signal {sig}"),
            (None, None) => "exited".to_string(),
        }
    }
}

impl From<std::process::ExitStatus> for ExitInfo {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            Self {
                code: status.code(),
                signal: status.signal(),
            }
        }
        #[cfg(not(unix))]
        {
            Self {
                code: status.code(),
                signal: None,
            }
        }
    }
}

impl std::fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}

// =============================================================================
// Telemetry
// =============================================================================

/// Frequently-polled robot state fetched from the readiness endpoint and
/// mirrored to other windows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    /// Active control mode. Presence signals the control layer is
    /// initialized, not merely that the HTTP server is up.
    #[serde(default)]
    pub control_mode: Option<String>,
    /// Head joint positions, radians.
    #[serde(default)]
    pub head_joints: Vec<f64>,
    /// Body yaw, radians.
    #[serde(default)]
    pub body_yaw: Option<f64>,
    /// Antenna positions, radians.
    #[serde(default)]
    pub antenna_positions: Vec<f64>,
}

impl Telemetry {
    /// Returns true once the control layer reports a mode.
    #[must_use]
    pub fn control_initialized(&self) -> bool {
        self.control_mode.is_some()
    }
}

// =============================================================================
// LifecycleEvent
// =============================================================================

/// The vocabulary exchanged over the event bus.
///
/// Raw-signal producers (output listener, timers, health monitor) emit
/// these; exactly one consumer loop turns them into status transitions.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// A start attempt began.
    StartAttempted {
        /// The new attempt.
        attempt: AttemptId,
    },
    /// The daemon was confirmed ready.
    StartSucceeded {
        /// Which attempt succeeded.
        attempt: AttemptId,
        /// Telemetry fetched with the readiness confirmation.
        telemetry: Telemetry,
    },
    /// The spawn call itself failed.
    StartFailed {
        /// Which attempt failed.
        attempt: AttemptId,
        /// Why the launch failed.
        reason: String,
    },
    /// The startup deadline elapsed before a ready signal.
    StartTimedOut {
        /// Which attempt timed out.
        attempt: AttemptId,
    },
    /// The daemon process terminated.
    ProcessTerminated(ExitInfo),
    /// The classifier recognized a hardware fault in daemon output.
    HardwareErrorDetected(HardwareError),
    /// The health monitor crossed its consecutive-timeout threshold.
    CrashDetected {
        /// Failed probes counted when the threshold was crossed.
        consecutive_failures: u32,
    },
    /// A stop request completed.
    StopConfirmed,
}

impl LifecycleEvent {
    /// Short name used in log fields.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::StartAttempted { .. } => "start-attempted",
            Self::StartSucceeded { .. } => "start-succeeded",
            Self::StartFailed { .. } => "start-failed",
            Self::StartTimedOut { .. } => "start-timed-out",
            Self::ProcessTerminated(_) => "process-terminated",
            Self::HardwareErrorDetected(_) => "hardware-error",
            Self::CrashDetected { .. } => "crash-detected",
            Self::StopConfirmed => "stop-confirmed",
        }
    }
}
