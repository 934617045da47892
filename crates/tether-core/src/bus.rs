//! In-process event bus for lifecycle events.
//!
//! Raw-signal producers (output listener, deadline timer, health monitor)
//! never mutate shared state directly: they emit typed
//! [`LifecycleEvent`]s here, and exactly one consumer loop in the
//! supervisor performs the state mutation. Other subscribers (UI, sync)
//! observe the same stream. Delivery is in send order; a subscriber that
//! lags past channel capacity misses old events rather than blocking the
//! sender, and one subscriber can never block another.

use tokio::sync::broadcast;

use crate::types::LifecycleEvent;

/// Default capacity of the bus channel.
const DEFAULT_CAPACITY: usize = 256;

/// Publish/subscribe router for [`LifecycleEvent`]s.
///
/// Cheap to clone; all clones share the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    /// Creates a bus with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a bus with an explicit channel capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emits an event to all current subscribers.
    ///
    /// Returns the number of subscribers the event reached. Emitting with
    /// no subscribers is not an error; the event is dropped.
    pub fn emit(&self, event: LifecycleEvent) -> usize {
        let name = event.name();
        match self.tx.send(event) {
            Ok(count) => {
                tracing::trace!(event = name, subscribers = count, "event emitted");
                count
            }
            Err(_) => {
                tracing::trace!(event = name, "event dropped, no subscribers");
                0
            }
        }
    }

    /// Subscribes to events emitted after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
