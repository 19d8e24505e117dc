//! Sync event types and event bus for status indicators and diagnostics.
//!
//! The orchestrator emits a [`SyncEvent`] at each connectivity change, queue
//! append, and drain pass. Consumers (a status bar, the CLI, tests) subscribe
//! independently. Each event is wrapped in a [`SyncEventEnvelope`] carrying
//! an ID and timestamp.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

// ============================================================================
// Envelope
// ============================================================================

/// Self-describing wrapper around a [`SyncEvent`].
#[derive(Debug, Clone, Serialize)]
pub struct SyncEventEnvelope {
    /// UUIDv7, so IDs sort by emission time.
    pub event_id: Uuid,
    /// Namespaced event type, e.g. `"queue.drain_completed"`.
    pub event_type: &'static str,
    pub occurred_at: DateTime<Utc>,
    pub payload: SyncEvent,
}

impl SyncEventEnvelope {
    pub fn new(event: SyncEvent) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            event_type: event.event_type(),
            occurred_at: Utc::now(),
            payload: event,
        }
    }
}

// ============================================================================
// Events
// ============================================================================

/// Something the sync layer did.
///
/// Serialized with a `type` tag, e.g. `{"type":"NoteQueued","note_id":"..."}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum SyncEvent {
    /// Platform connectivity flipped.
    ConnectivityChanged { online: bool },
    /// A remote write was deferred to the offline queue.
    NoteQueued {
        note_id: String,
        op: &'static str,
        queue_len: usize,
    },
    /// A drain pass began replaying entries.
    DrainStarted { queue_len: usize },
    /// Every entry in the pass was replayed and removed.
    DrainCompleted { replayed: usize, duration_ms: u64 },
    /// The pass stopped at the first failing entry; the queue is intact.
    DrainFailed {
        note_id: String,
        position: usize,
        error: String,
    },
    /// Login-time bulk merge finished.
    LocalMerged {
        user_id: String,
        pushed: usize,
        failed: usize,
    },
    /// A remote document was mirrored into the local cache by a subscription.
    RemoteNoteMirrored { note_id: String },
}

impl SyncEvent {
    /// Namespaced event type used in the envelope.
    pub fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::ConnectivityChanged { .. } => "connectivity.changed",
            SyncEvent::NoteQueued { .. } => "queue.note_queued",
            SyncEvent::DrainStarted { .. } => "queue.drain_started",
            SyncEvent::DrainCompleted { .. } => "queue.drain_completed",
            SyncEvent::DrainFailed { .. } => "queue.drain_failed",
            SyncEvent::LocalMerged { .. } => "sync.local_merged",
            SyncEvent::RemoteNoteMirrored { .. } => "sync.remote_mirrored",
        }
    }

    /// The note this event concerns, if any.
    pub fn note_id(&self) -> Option<&str> {
        match self {
            SyncEvent::NoteQueued { note_id, .. }
            | SyncEvent::DrainFailed { note_id, .. }
            | SyncEvent::RemoteNoteMirrored { note_id } => Some(note_id),
            _ => None,
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Broadcast-based bus distributing sync events to any number of consumers.
///
/// Slow receivers that fall behind get `Lagged` and miss events. Emitting
/// with no subscribers is a no-op.
#[derive(Clone)]
pub struct SyncEventBus {
    tx: broadcast::Sender<SyncEventEnvelope>,
}

impl SyncEventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn emit(&self, event: SyncEvent) {
        let envelope = SyncEventEnvelope::new(event);
        tracing::debug!(
            subsystem = "sync",
            component = "event_bus",
            event_type = envelope.event_type,
            event_id = %envelope.event_id,
            subscriber_count = self.tx.receiver_count(),
            "SyncEventBus emit"
        );
        let _ = self.tx.send(envelope);
    }

    /// Subscribe to enveloped events. Each subscriber gets its own stream.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEventEnvelope> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for SyncEventBus {
    fn default() -> Self {
        Self::new(crate::defaults::EVENT_BUS_CAPACITY)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus_emit_subscribe() {
        let bus = SyncEventBus::new(32);
        let mut rx = bus.subscribe();

        bus.emit(SyncEvent::DrainStarted { queue_len: 3 });

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.payload, SyncEvent::DrainStarted { queue_len: 3 });
        assert_eq!(envelope.event_type, "queue.drain_started");
    }

    #[tokio::test]
    async fn test_event_bus_multiple_subscribers() {
        let bus = SyncEventBus::new(32);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.emit(SyncEvent::ConnectivityChanged { online: false });

        let e1 = rx1.recv().await.unwrap();
        let e2 = rx2.recv().await.unwrap();
        assert_eq!(e1.payload, SyncEvent::ConnectivityChanged { online: false });
        assert_eq!(e1.event_id, e2.event_id);
    }

    #[tokio::test]
    async fn test_event_bus_no_subscribers_ok() {
        let bus = SyncEventBus::new(32);
        bus.emit(SyncEvent::DrainCompleted {
            replayed: 0,
            duration_ms: 0,
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_event_bus_clones_share_channel() {
        let bus = SyncEventBus::new(32);
        let other = bus.clone();
        let mut rx = bus.subscribe();

        other.emit(SyncEvent::RemoteNoteMirrored {
            note_id: "n1".to_string(),
        });

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.payload.note_id(), Some("n1"));
    }

    #[tokio::test]
    async fn test_event_bus_lagged_receiver() {
        let bus = SyncEventBus::new(2);
        let mut rx = bus.subscribe();

        for i in 0..5 {
            bus.emit(SyncEvent::DrainStarted { queue_len: i });
        }

        let result = rx.recv().await;
        assert!(matches!(
            result,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
    }

    #[test]
    fn test_sync_event_json_serialization() {
        let event = SyncEvent::NoteQueued {
            note_id: "2025-10-06".to_string(),
            op: "save",
            queue_len: 1,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "NoteQueued");
        assert_eq!(json["note_id"], "2025-10-06");
        assert_eq!(json["op"], "save");
        assert_eq!(json["queue_len"], 1);
    }

    #[test]
    fn test_event_type_names() {
        assert_eq!(
            SyncEvent::ConnectivityChanged { online: true }.event_type(),
            "connectivity.changed"
        );
        assert_eq!(
            SyncEvent::LocalMerged {
                user_id: "u".into(),
                pushed: 1,
                failed: 0
            }
            .event_type(),
            "sync.local_merged"
        );
        assert!(SyncEvent::DrainStarted { queue_len: 1 }.note_id().is_none());
    }

    #[test]
    fn test_envelope_ids_are_v7() {
        let envelope = SyncEventEnvelope::new(SyncEvent::DrainStarted { queue_len: 0 });
        assert_eq!(envelope.event_id.get_version_num(), 7);
    }
}
