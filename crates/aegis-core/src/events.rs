//! Typed event bus for DR pub-sub.
//!
//! Producers publish `DrEvent`s without ever blocking or invoking
//! subscriber code; each subscriber drains its own bounded queue and the
//! oldest events are dropped when a slow subscriber falls behind.

use tokio::sync::broadcast;

use crate::status::FailoverEvent;

/// Default per-subscriber queue capacity.
pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// Events published on the DR bus.
#[derive(Debug, Clone)]
pub enum DrEvent {
    /// A failover entered its validating phase.
    FailoverStarted {
        /// Event id shared with the eventual audit record.
        id: uuid::Uuid,
        /// Region losing the primary role.
        from_region: String,
        /// Region gaining the primary role.
        to_region: String,
        /// Reason supplied by the operator or the auto-failover watcher.
        reason: String,
    },
    /// A failover committed.
    FailoverCommitted(FailoverEvent),
    /// A failover failed and was rolled back.
    FailoverRolledBack(FailoverEvent),
    /// A health round found a region's stores unreachable.
    RegionUnhealthy {
        /// Region name.
        region: String,
        /// Probe failure summary.
        message: String,
    },
    /// A sync pass finished for a region.
    SyncCompleted {
        /// Region name.
        region: String,
        /// Items transferred in the pass.
        items: u64,
        /// Pass duration in milliseconds.
        duration_ms: u64,
    },
    /// A replication conflict was recorded.
    ConflictDetected {
        /// Conflict record id.
        id: uuid::Uuid,
        /// Store kind as a lowercase name.
        store: String,
        /// Collection, measurement, or keyspace.
        container: String,
        /// Entity id within the container.
        entity_id: String,
        /// Whether the policy requires operator action.
        manual: bool,
    },
    /// A backup finished.
    BackupCompleted {
        /// Backup record id.
        backup_id: String,
        /// `full` or `incremental`.
        kind: String,
        /// Aggregate success across stores.
        success: bool,
    },
}

/// Bounded pub-sub bus for `DrEvent`s.
pub struct EventBus {
    sender: broadcast::Sender<DrEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a bus with the default queue capacity.
    pub fn new() -> Self {
        Self::with_capacity(EVENT_QUEUE_CAPACITY)
    }

    /// Create a bus with an explicit per-subscriber queue capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events. The returned handle owns its queue.
    pub fn subscribe(&self, name: impl Into<String>) -> Subscription {
        Subscription {
            name: name.into(),
            receiver: self.sender.subscribe(),
            dropped: 0,
        }
    }

    /// Publish an event. Never blocks; a bus with no subscribers drops the
    /// event silently.
    pub fn publish(&self, event: DrEvent) {
        let _ = self.sender.send(event);
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Subscriber handle with a bounded queue.
pub struct Subscription {
    name: String,
    receiver: broadcast::Receiver<DrEvent>,
    dropped: u64,
}

impl Subscription {
    /// The subscriber name given at registration.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Events dropped so far because this subscriber fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Receive the next event, skipping over any dropped window.
    pub async fn next(&mut self) -> Option<DrEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.dropped += n;
                    tracing::warn!(subscriber = %self.name, dropped = n, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Receive an event without waiting, if one is queued.
    pub fn try_next(&mut self) -> Option<DrEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    self.dropped += n;
                }
                Err(_) => return None,
            }
        }
    }
}
