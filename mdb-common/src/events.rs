//! Session lifecycle events
//!
//! Reconciliation sessions publish their lifecycle on an [`EventBus`] so that
//! front ends (CLI progress output, a UI, audit log writers) can follow a
//! session without being coupled to the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events emitted by a reconciliation session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReconcileEvent {
    /// Incoming parameters loaded and baseline snapshot frozen
    SessionLoaded {
        session_id: Uuid,
        equipment_id: String,
        incoming_count: usize,
        baseline_count: usize,
        baseline_version: u64,
        timestamp: DateTime<Utc>,
    },

    /// Comparison, classification, resolution and QC finished
    AnalysisCompleted {
        session_id: Uuid,
        candidate_count: usize,
        conflict_count: usize,
        manual_review_count: usize,
        qc_finding_count: usize,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Commit attempted; `failed_count > 0` means the session stayed analyzed
    CommitCompleted {
        session_id: Uuid,
        saved_count: usize,
        failed_count: usize,
        version: Option<u64>,
        timestamp: DateTime<Utc>,
    },

    /// Session aborted without writing
    SessionAborted {
        session_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl ReconcileEvent {
    /// Session this event belongs to
    pub fn session_id(&self) -> Uuid {
        match self {
            Self::SessionLoaded { session_id, .. }
            | Self::AnalysisCompleted { session_id, .. }
            | Self::CommitCompleted { session_id, .. }
            | Self::SessionAborted { session_id, .. } => *session_id,
        }
    }
}

/// Broadcast bus for [`ReconcileEvent`]s
///
/// Cloning the bus shares the underlying channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ReconcileEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ReconcileEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ReconcileEvent,
    ) -> Result<usize, broadcast::error::SendError<ReconcileEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ReconcileEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        let session_id = Uuid::new_v4();

        bus.emit(ReconcileEvent::SessionAborted {
            session_id,
            reason: "operator cancelled".to_string(),
            timestamp: Utc::now(),
        })
        .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.session_id(), session_id);
    }

    #[test]
    fn test_emit_lossy_without_subscribers() {
        let bus = EventBus::new(4);
        assert_eq!(bus.subscriber_count(), 0);
        bus.emit_lossy(ReconcileEvent::SessionAborted {
            session_id: Uuid::new_v4(),
            reason: "nobody listening".to_string(),
            timestamp: Utc::now(),
        });
        assert_eq!(bus.capacity(), 4);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = ReconcileEvent::CommitCompleted {
            session_id: Uuid::nil(),
            saved_count: 3,
            failed_count: 0,
            version: Some(2),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "commit_completed");
        assert_eq!(json["saved_count"], 3);
    }
}
