//! Snapshot allow-list and semantic diffing.
//!
//! The snapshot is the fixed subset of state machine fields other windows
//! are allowed to see. It is recomputed on every state write and diffed
//! against the last transmitted snapshot by deep JSON equality, never by
//! reference, so only changed keys travel, plus a small always-included
//! set receiving windows need for UI consistency.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use tether_core::{BusyReason, HardwareError, RobotState, RobotStatus};

use crate::SyncError;

/// Partial-state payload carried on the inter-window topic.
pub type SyncPayload = Map<String, Value>;

/// Keys included in every non-empty broadcast, changed or not.
pub const ALWAYS_INCLUDED_KEYS: &[&str] = &["status", "daemon_active"];

/// The allow-listed subset of state visible to other windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSnapshot {
    /// Current lifecycle status.
    pub status: RobotStatus,
    /// Busy reason, mirrored alongside the status for direct binding.
    pub busy_reason: Option<BusyReason>,
    /// Whether a daemon is believed to be up.
    pub daemon_active: bool,
    /// Active hardware fault, if any.
    pub hardware_error: Option<HardwareError>,
    /// Active control mode.
    pub control_mode: Option<String>,
    /// Head joint positions, radians.
    pub head_joints: Vec<f64>,
    /// Body yaw, radians.
    pub body_yaw: Option<f64>,
    /// Antenna positions, radians.
    pub antenna_positions: Vec<f64>,
}

impl Default for SyncSnapshot {
    fn default() -> Self {
        Self {
            status: RobotStatus::Disconnected,
            busy_reason: None,
            daemon_active: false,
            hardware_error: None,
            control_mode: None,
            head_joints: vec![],
            body_yaw: None,
            antenna_positions: vec![],
        }
    }
}

impl SyncSnapshot {
    /// Captures the allow-listed fields from the full state.
    #[must_use]
    pub fn capture(state: &RobotState) -> Self {
        Self {
            status: state.status,
            busy_reason: state.status.busy_reason(),
            daemon_active: state.daemon_active,
            hardware_error: state.hardware_error.clone(),
            control_mode: state.telemetry.control_mode.clone(),
            head_joints: state.telemetry.head_joints.clone(),
            body_yaw: state.telemetry.body_yaw,
            antenna_positions: state.telemetry.antenna_positions.clone(),
        }
    }

    /// Serializes the snapshot to a full payload.
    pub fn to_payload(&self) -> Result<SyncPayload, SyncError> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(SyncError::Serialization(format!(
                "snapshot serialized to non-object: {other}"
            ))),
            Err(e) => Err(SyncError::Serialization(e.to_string())),
        }
    }

    /// Diffs against the previously transmitted snapshot.
    ///
    /// Returns `None` when nothing changed (no broadcast at all), and
    /// otherwise the changed keys plus [`ALWAYS_INCLUDED_KEYS`].
    pub fn diff(&self, previous: &Self) -> Result<Option<SyncPayload>, SyncError> {
        let current = self.to_payload()?;
        let old = previous.to_payload()?;

        let mut changed: SyncPayload = current
            .iter()
            .filter(|(key, value)| old.get(*key) != Some(value))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        if changed.is_empty() {
            return Ok(None);
        }

        for key in ALWAYS_INCLUDED_KEYS {
            if !changed.contains_key(*key) {
                if let Some(value) = current.get(*key) {
                    changed.insert((*key).to_string(), value.clone());
                }
            }
        }

        Ok(Some(changed))
    }
}
