//! Scenario tests for the supervision core.
//!
//! Unit tests live at the bottom of each module; these cover the
//! cross-component behaviors (probe counting against the live state
//! machine, start/stop/retry sequencing, crash compensation) using a
//! scripted [`MockApi`] in place of the HTTP transport.

pub mod lifecycle;

pub use mocks::MockApi;
