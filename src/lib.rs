//! Tether: daemon supervision core for a robot-control desktop shell.
//!
//! The shell's windows render views; this workspace owns the hard part:
//! supervising the external robot-control daemon and keeping one
//! authoritative robot status consistent across windows.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tether::prelude::*;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = SupervisorConfig::new("/usr/lib/tether/robotd");
//! let machine = Arc::new(StatusMachine::new());
//! let bus = EventBus::new();
//!
//! let supervisor = Supervisor::with_http_api(config, Arc::clone(&machine), bus)?;
//! let tasks = supervisor.spawn_tasks()?;
//!
//! supervisor.device_attached().await?;
//! supervisor.start().await?;
//! # tasks.abort_all();
//! # Ok(())
//! # }
//! ```

pub use tether_core as core;
pub use tether_supervisor as supervisor;
pub use tether_sync as sync;

/// Prelude module for common imports.
pub mod prelude {
    pub use tether_core::{
        BusyReason, EventBus, HardwareError, HardwareErrorKind, LifecycleEvent, RobotState,
        RobotStatus, StatusMachine, SupervisorConfig, SupervisorError, Telemetry,
    };
    pub use tether_supervisor::{
        DaemonApi, HealthMonitor, HttpApi, ProbeFailure, Supervisor, SupervisorTasks,
    };
    pub use tether_sync::{SyncMirror, SyncPublisher, SyncSnapshot, WindowChannel, WindowRole};
}
