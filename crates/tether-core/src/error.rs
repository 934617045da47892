//! Error types for the supervision core.
//!
//! All failure modes are explicit; raw signals (log lines, exit codes,
//! probe errors) are wrapped here or classified before they reach a user.

use std::time::Duration;

use crate::status::TransitionError;

/// Result type alias for supervisor operations.
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Comprehensive error type for supervisor operations.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The daemon executable could not be launched.
    #[error("failed to launch daemon: {0}")]
    Spawn(String),

    /// A liveness or readiness probe failed.
    #[error("probe failed: {0}")]
    Probe(String),

    /// The daemon never became ready within the startup deadline.
    #[error("daemon did not become ready within {0:?}")]
    StartupTimeout(Duration),

    /// A status transition was rejected by the state machine.
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// Invalid state for the requested operation.
    #[error("invalid state: {0}")]
    State(String),

    /// An internal channel closed unexpectedly.
    #[error("channel closed: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl SupervisorError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a spawn error.
    #[must_use]
    pub fn spawn(msg: impl Into<String>) -> Self {
        Self::Spawn(msg.into())
    }

    /// Creates a probe error.
    #[must_use]
    pub fn probe(msg: impl Into<String>) -> Self {
        Self::Probe(msg.into())
    }

    /// Creates an invalid-state error.
    #[must_use]
    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    /// Returns true if a retry of the current start attempt can clear this
    /// error (timeouts and probe failures; not config or spawn problems).
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Probe(_) | Self::StartupTimeout(_))
    }

    /// Returns true if this error invalidates the whole start attempt.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Spawn(_))
    }
}
