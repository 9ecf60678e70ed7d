//! Events pushed to a user's live connection.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::types::Category;

/// Steps reported for one user sync: six categories, the store write, and
/// the relational commit.
pub const SYNC_PROGRESS_STEPS: u32 = 8;

/// Opaque identifier of a client connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(pub String);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    UpdateProgress { step: u32, total: u32 },
    ShowRefreshAlert { categories: Vec<Category> },
    StoreLastUpdatedEpoch { epoch: i64 },
}

/// Delivery of events to connections. Fire and forget.
pub trait EventSink: Send + Sync {
    fn emit(&self, connection: &ConnectionId, event: SyncEvent);
}

/// Fans events out over a tokio broadcast channel.
pub struct BroadcastSink {
    tx: broadcast::Sender<(ConnectionId, SyncEvent)>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<(ConnectionId, SyncEvent)> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, connection: &ConnectionId, event: SyncEvent) {
        if self.tx.send((connection.clone(), event)).is_err() {
            tracing::trace!(%connection, "No event subscribers");
        }
    }
}

/// Counts sync steps for one connection.
pub struct ProgressReporter {
    sink: Arc<dyn EventSink>,
    connection: ConnectionId,
    step: AtomicU32,
}

impl ProgressReporter {
    pub fn new(sink: Arc<dyn EventSink>, connection: ConnectionId) -> Self {
        Self {
            sink,
            connection,
            step: AtomicU32::new(0),
        }
    }

    pub fn advance(&self) {
        let step = self.step.fetch_add(1, Ordering::SeqCst) + 1;
        self.sink.emit(
            &self.connection,
            SyncEvent::UpdateProgress {
                step,
                total: SYNC_PROGRESS_STEPS,
            },
        );
    }
}
