//! Primary-window publisher.
//!
//! Subscribes to state machine writes, captures the allow-listed
//! snapshot, diffs it against the last transmitted one, and broadcasts
//! the changed keys on a named topic. One-way, best-effort: no
//! acknowledgement, no replay. A newly opened window pulls
//! [`SyncPublisher::full_snapshot`] instead of reconstructing from
//! deltas.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use tether_core::{RobotState, StatusMachine};

use crate::SyncError;
use crate::snapshot::{SyncPayload, SyncSnapshot};

/// Which role this window plays in state synchronization.
///
/// Determined once at startup by querying the windowing layer's identity
/// primitive; only the primary window publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowRole {
    /// Sole publisher of state broadcasts.
    Primary,
    /// Read-only mirror; never writes back.
    Secondary,
}

impl WindowRole {
    /// Returns true for the publishing window.
    #[must_use]
    pub const fn is_primary(&self) -> bool {
        matches!(self, Self::Primary)
    }
}

/// The windowing layer's broadcast primitive.
///
/// Implemented by the shell over whatever inter-window messaging the
/// native layer offers; mocked in tests.
#[async_trait]
pub trait WindowChannel: Send + Sync + 'static {
    /// Broadcasts a partial-state payload on a named topic.
    async fn broadcast(&self, topic: &str, payload: &SyncPayload) -> Result<(), SyncError>;
}

/// Mirrors state machine changes to every other open window.
pub struct SyncPublisher {
    machine: Arc<StatusMachine>,
    channel: Arc<dyn WindowChannel>,
    topic: String,
    role: WindowRole,
    /// Last transmitted snapshot; diffs are computed against this, not
    /// against whatever the receivers currently hold.
    last: Mutex<Option<SyncSnapshot>>,
}

impl SyncPublisher {
    /// Creates a publisher.
    #[must_use]
    pub fn new(
        machine: Arc<StatusMachine>,
        channel: Arc<dyn WindowChannel>,
        topic: impl Into<String>,
        role: WindowRole,
    ) -> Self {
        Self {
            machine,
            channel,
            topic: topic.into(),
            role,
            last: Mutex::new(None),
        }
    }

    /// This window's role.
    #[must_use]
    pub const fn role(&self) -> WindowRole {
        self.role
    }

    /// Runs the publish loop until the state machine is dropped.
    ///
    /// Returns immediately in a secondary window.
    pub async fn run(&self) {
        if !self.role.is_primary() {
            tracing::debug!("secondary window, publisher idle");
            return;
        }

        let mut rx = self.machine.subscribe();
        loop {
            match rx.recv().await {
                Ok(state) => {
                    if let Err(e) = self.publish(&state).await {
                        // Best-effort channel: log and keep going.
                        tracing::warn!(error = %e, "state broadcast failed");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    // Diffs are computed against the last *transmitted*
                    // snapshot, so skipped intermediate states are folded
                    // into the next payload.
                    tracing::warn!(missed, "publisher lagged behind state writes");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        tracing::debug!("sync publisher ended");
    }

    /// Publishes one state write. Returns the number of keys transmitted,
    /// or `None` when the diff was empty and nothing was broadcast.
    pub async fn publish(&self, state: &RobotState) -> Result<Option<usize>, SyncError> {
        let snapshot = SyncSnapshot::capture(state);

        let payload = {
            let mut last = self.last.lock();
            let payload = match last.as_ref() {
                Some(previous) => snapshot.diff(previous)?,
                // First write: everything is news.
                None => Some(snapshot.to_payload()?),
            };
            if payload.is_some() {
                *last = Some(snapshot);
            }
            payload
        };

        match payload {
            Some(payload) => {
                let keys = payload.len();
                self.channel.broadcast(&self.topic, &payload).await?;
                tracing::trace!(keys, topic = %self.topic, "state broadcast");
                Ok(Some(keys))
            }
            None => Ok(None),
        }
    }

    /// Full snapshot of current state, served to a newly opened window
    /// that cannot rely on deltas it never received.
    pub async fn full_snapshot(&self) -> Result<SyncPayload, SyncError> {
        let state = self.machine.snapshot().await;
        SyncSnapshot::capture(&state).to_payload()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::{RobotStatus, Telemetry};

    /// Records every broadcast instead of crossing a window boundary.
    struct RecordingChannel {
        sent: Mutex<Vec<(String, SyncPayload)>>,
    }

    impl RecordingChannel {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<(String, SyncPayload)> {
            self.sent.lock().clone()
        }
    }

    #[async_trait]
    impl WindowChannel for RecordingChannel {
        async fn broadcast(&self, topic: &str, payload: &SyncPayload) -> Result<(), SyncError> {
            self.sent.lock().push((topic.to_string(), payload.clone()));
            Ok(())
        }
    }

    fn publisher(
        machine: &Arc<StatusMachine>,
        channel: &Arc<RecordingChannel>,
        role: WindowRole,
    ) -> SyncPublisher {
        SyncPublisher::new(
            Arc::clone(machine),
            Arc::clone(channel) as Arc<dyn WindowChannel>,
            "robot-state",
            role,
        )
    }

    #[tokio::test]
    async fn test_first_publish_is_full_snapshot() {
        let machine = Arc::new(StatusMachine::new());
        let channel = RecordingChannel::new();
        let publisher = publisher(&machine, &channel, WindowRole::Primary);

        let state = machine.snapshot().await;
        let keys = publisher.publish(&state).await.unwrap();
        assert_eq!(keys, Some(8));

        let sent = channel.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "robot-state");
    }

    #[tokio::test]
    async fn test_same_state_twice_broadcasts_once() {
        let machine = Arc::new(StatusMachine::new());
        let channel = RecordingChannel::new();
        let publisher = publisher(&machine, &channel, WindowRole::Primary);

        let state = machine.snapshot().await;
        publisher.publish(&state).await.unwrap();
        let second = publisher.publish(&state).await.unwrap();

        assert_eq!(second, None);
        assert_eq!(channel.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_only_changed_keys_travel() {
        let machine = Arc::new(StatusMachine::new());
        let channel = RecordingChannel::new();
        let publisher = publisher(&machine, &channel, WindowRole::Primary);

        publisher.publish(&machine.snapshot().await).await.unwrap();

        machine.device_attached().await.unwrap();
        publisher.publish(&machine.snapshot().await).await.unwrap();

        let sent = channel.sent();
        assert_eq!(sent.len(), 2);
        let delta = &sent[1].1;
        // status changed; daemon_active is always included; nothing else.
        assert_eq!(
            delta.get("status"),
            Some(&serde_json::json!("ready-to-start"))
        );
        assert!(delta.contains_key("daemon_active"));
        assert_eq!(delta.len(), 2);
    }

    #[tokio::test]
    async fn test_run_publishes_machine_writes() {
        let machine = Arc::new(StatusMachine::new());
        let channel = RecordingChannel::new();
        let publisher = Arc::new(publisher(&machine, &channel, WindowRole::Primary));

        let loop_handle = {
            let publisher = Arc::clone(&publisher);
            tokio::spawn(async move { publisher.run().await })
        };
        // Let the loop subscribe before writing.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        machine.device_attached().await.unwrap();
        machine.start_requested().await.unwrap();
        machine.confirm_ready(Telemetry::default()).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        loop_handle.abort();

        let sent = channel.sent();
        assert_eq!(sent.len(), 3);
        let last = &sent[2].1;
        assert_eq!(last.get("status"), Some(&serde_json::json!("ready")));
    }

    #[tokio::test]
    async fn test_secondary_window_never_publishes() {
        let machine = Arc::new(StatusMachine::new());
        let channel = RecordingChannel::new();
        let publisher = publisher(&machine, &channel, WindowRole::Secondary);

        // run() returns immediately for a secondary window.
        publisher.run().await;
        assert!(channel.sent().is_empty());
    }

    #[tokio::test]
    async fn test_full_snapshot_for_new_window() {
        let machine = Arc::new(StatusMachine::new());
        machine.device_attached().await.unwrap();
        let channel = RecordingChannel::new();
        let publisher = publisher(&machine, &channel, WindowRole::Primary);

        let payload = publisher.full_snapshot().await.unwrap();
        assert_eq!(payload.len(), 8);
        assert_eq!(
            payload.get("status"),
            Some(&serde_json::json!("ready-to-start"))
        );
        // Pulling a snapshot is not a broadcast.
        assert!(channel.sent().is_empty());
    }

    #[test]
    fn test_window_role() {
        assert!(WindowRole::Primary.is_primary());
        assert!(!WindowRole::Secondary.is_primary());
    }
}
