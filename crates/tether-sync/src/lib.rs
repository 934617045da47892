// Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # tether-sync
//!
//! Cross-window state synchronization for the Tether desktop shell.
//!
//! Windows of the shell do not share process memory; the primary window
//! mirrors a filtered subset of the status state machine to every other
//! window over a one-way broadcast topic with last-writer-wins semantics:
//!
//! - [`SyncSnapshot`]: the allow-listed field subset and its semantic
//!   diff
//! - [`SyncPublisher`]: primary-window loop publishing changed keys on
//!   every state write
//! - [`SyncMirror`]: secondary-window read-only copy applying incoming
//!   payloads as trusted overwrites
//!
//! The channel is best-effort and eventually consistent: no
//! acknowledgement, no replay. A newly opened window pulls
//! [`SyncPublisher::full_snapshot`] rather than relying on deltas.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod mirror;
pub mod publisher;
pub mod snapshot;

pub use mirror::SyncMirror;
pub use publisher::{SyncPublisher, WindowChannel, WindowRole};
pub use snapshot::{ALWAYS_INCLUDED_KEYS, SyncPayload, SyncSnapshot};

/// Errors raised while snapshotting or broadcasting state.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A snapshot or payload could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The windowing layer rejected the broadcast.
    #[error("broadcast failed: {0}")]
    Broadcast(String),
}
