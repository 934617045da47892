// Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # tether-core
//!
//! Shared types, the status state machine, and the event bus for the
//! Tether daemon supervision core.
//!
//! This crate holds everything the supervisor and the cross-window
//! synchronizer agree on:
//!
//! - [`RobotStatus`] / [`BusyReason`]: the authoritative lifecycle enum
//! - [`StatusMachine`]: the single owned state store; all transitions go
//!   through its methods
//! - [`EventBus`]: typed lifecycle events with one consuming mutator
//! - [`SupervisorConfig`]: validated, TOML-loadable configuration
//! - [`SupervisorError`]: the shared error type

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod bus;
pub mod config;
pub mod error;
pub mod status;
pub mod types;

pub use bus::EventBus;
pub use config::SupervisorConfig;
pub use error::{Result, SupervisorError};
pub use status::{RobotState, StartupFailure, StatusMachine, TransitionError};
pub use types::{
    AttemptId, BusyReason, ExitInfo, HardwareError, HardwareErrorKind, LifecycleEvent,
    RobotStatus, Telemetry,
};
