// Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # tether-supervisor
//!
//! The daemon supervision core of the Tether desktop shell: starts and
//! stops the external robot-control daemon, decides whether it is alive
//! and ready, distinguishes transient hiccups from real crashes, and
//! translates raw process output into typed hardware errors.
//!
//! Components:
//!
//! - [`Supervisor`]: lifecycle controller and the single consumer loop
//!   that turns events into status transitions
//! - [`HealthMonitor`] / [`HealthCounter`]: consecutive-timeout probing
//!   with a latch-once crash signal
//! - [`DaemonProcess`]: spawn, output listening, graceful termination
//! - [`classify`]: log line to typed hardware error
//! - [`DaemonApi`] / [`HttpApi`]: the probe transport seam

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod classify;
pub mod health;
pub mod lifecycle;
pub mod probe;
pub mod process;
#[cfg(test)]
mod tests;

pub use classify::classify;
pub use health::{HealthCounter, HealthMonitor};
pub use lifecycle::{Supervisor, SupervisorTasks};
pub use probe::{DaemonApi, HttpApi, ProbeFailure, ProbeResult};
pub use process::{DaemonProcess, ProcessEvent};
