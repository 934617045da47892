//! Supervisor configuration.
//!
//! Validated at load time, with sensible defaults and clear error
//! messages. Durations are human-readable in TOML (`"1330ms"`, `"30s"`).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, SupervisorError};

/// Configuration for the daemon supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Path to the daemon executable.
    pub daemon_binary: PathBuf,

    /// Extra arguments passed to the daemon.
    #[serde(default)]
    pub daemon_args: Vec<String>,

    /// Launch the daemon in simulation mode (no hardware).
    #[serde(default)]
    pub simulation: bool,

    /// Base URL of the daemon's loopback HTTP API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Cadence of liveness probes.
    #[serde(default = "default_probe_interval")]
    #[serde(with = "humantime_serde")]
    pub probe_interval: Duration,

    /// Per-probe response timeout. A probe that does not resolve within
    /// this window is a failure, never "still pending".
    #[serde(default = "default_probe_timeout")]
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,

    /// Consecutive probe timeouts before the daemon is declared crashed.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Deadline for the daemon to become ready after a start attempt.
    #[serde(default = "default_startup_deadline")]
    #[serde(with = "humantime_serde")]
    pub startup_deadline: Duration,

    /// Cadence of readiness polls while starting.
    #[serde(default = "default_readiness_interval")]
    #[serde(with = "humantime_serde")]
    pub readiness_interval: Duration,

    /// Bounded wait for the best-effort safe-pose command during stop.
    #[serde(default = "default_safe_pose_timeout")]
    #[serde(with = "humantime_serde")]
    pub safe_pose_timeout: Duration,

    /// Grace period between SIGTERM and SIGKILL during stop.
    #[serde(default = "default_stop_grace")]
    #[serde(with = "humantime_serde")]
    pub stop_grace: Duration,

    /// Name of the inter-window broadcast topic.
    #[serde(default = "default_sync_topic")]
    pub sync_topic: String,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_probe_interval() -> Duration {
    Duration::from_millis(1330)
}

fn default_probe_timeout() -> Duration {
    Duration::from_millis(1000)
}

const fn default_failure_threshold() -> u32 {
    3
}

fn default_startup_deadline() -> Duration {
    Duration::from_secs(30)
}

fn default_readiness_interval() -> Duration {
    Duration::from_millis(1000)
}

fn default_safe_pose_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_stop_grace() -> Duration {
    Duration::from_secs(5)
}

fn default_sync_topic() -> String {
    "robot-state".to_string()
}

impl SupervisorConfig {
    /// Creates a configuration with defaults for everything but the
    /// daemon binary.
    #[must_use]
    pub fn new(daemon_binary: impl Into<PathBuf>) -> Self {
        Self {
            daemon_binary: daemon_binary.into(),
            daemon_args: vec![],
            simulation: false,
            base_url: default_base_url(),
            probe_interval: default_probe_interval(),
            probe_timeout: default_probe_timeout(),
            failure_threshold: default_failure_threshold(),
            startup_deadline: default_startup_deadline(),
            readiness_interval: default_readiness_interval(),
            safe_pose_timeout: default_safe_pose_timeout(),
            stop_grace: default_stop_grace(),
            sync_topic: default_sync_topic(),
        }
    }

    /// Enables simulation mode.
    #[must_use]
    pub const fn with_simulation(mut self, simulation: bool) -> Self {
        self.simulation = simulation;
        self
    }

    /// Overrides the daemon API base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an error if any value is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.daemon_binary.as_os_str().is_empty() {
            return Err(SupervisorError::config("daemon_binary cannot be empty"));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(SupervisorError::config(format!(
                "base_url must be an http(s) URL, got {:?}",
                self.base_url
            )));
        }
        if self.failure_threshold == 0 {
            return Err(SupervisorError::config(
                "failure_threshold must be at least 1",
            ));
        }
        if self.probe_interval.is_zero() || self.probe_timeout.is_zero() {
            return Err(SupervisorError::config(
                "probe_interval and probe_timeout must be non-zero",
            ));
        }
        if self.startup_deadline.is_zero() {
            return Err(SupervisorError::config("startup_deadline must be non-zero"));
        }
        if self.sync_topic.is_empty() {
            return Err(SupervisorError::config("sync_topic cannot be empty"));
        }
        Ok(())
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or if the
    /// parsed configuration is invalid.
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| SupervisorError::config(format!("failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| SupervisorError::config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }
}
