//! Secondary-window mirror.
//!
//! Applies incoming broadcasts as a trusted overwrite of a local
//! read-only copy. Never writes back: the channel is one-way, and a
//! mirror that misses deltas asks the primary window for a full snapshot
//! instead of reconstructing history.

use parking_lot::RwLock;

use tether_core::{BusyReason, RobotStatus};

use crate::SyncError;
use crate::snapshot::{SyncPayload, SyncSnapshot};

/// Read-only mirror of the primary window's snapshot.
#[derive(Debug, Default)]
pub struct SyncMirror {
    snapshot: RwLock<SyncSnapshot>,
}

impl SyncMirror {
    /// Creates a mirror holding the initial (disconnected) snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a partial-state payload over the current mirror.
    ///
    /// Keys outside the allow-list are ignored; a payload that does not
    /// deserialize leaves the mirror untouched.
    pub fn apply(&self, payload: &SyncPayload) -> Result<(), SyncError> {
        let mut guard = self.snapshot.write();

        let mut value = serde_json::to_value(&*guard)
            .map_err(|e| SyncError::Serialization(e.to_string()))?;
        if let serde_json::Value::Object(map) = &mut value {
            for (key, field) in payload {
                map.insert(key.clone(), field.clone());
            }
        }

        *guard = serde_json::from_value(value)
            .map_err(|e| SyncError::Serialization(format!("malformed sync payload: {e}")))?;
        Ok(())
    }

    /// Current mirrored snapshot.
    #[must_use]
    pub fn snapshot(&self) -> SyncSnapshot {
        self.snapshot.read().clone()
    }

    /// Mirrored status.
    #[must_use]
    pub fn status(&self) -> RobotStatus {
        self.snapshot.read().status
    }

    /// Mirrored busy reason.
    #[must_use]
    pub fn busy_reason(&self) -> Option<BusyReason> {
        self.snapshot.read().busy_reason
    }
}
