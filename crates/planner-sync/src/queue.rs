//! Durable offline queue of deferred remote writes.
//!
//! Entries live as one JSON array under `offline_sync_queue` in the local
//! key-value store. A drain pass replays a snapshot of the queue in FIFO
//! order and removes it only after every entry in the snapshot succeeded.
//! The first failure aborts the pass and leaves the queue untouched, so
//! entries replayed earlier in that pass are replayed again next time; remote
//! save and delete are idempotent.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

use planner_core::defaults::{OFFLINE_QUEUE_BACKUP_KEY, OFFLINE_QUEUE_KEY};
use planner_core::{
    KeyValueStore, PendingOp, QueueEntry, RemoteStore, Result, SyncEvent, SyncEventBus,
};

/// Result of one drain pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DrainOutcome {
    /// Nothing was queued.
    Empty,
    /// Every entry in the pass was replayed and removed.
    Completed { replayed: usize },
    /// Entry `position` failed; the queue is unchanged.
    Aborted {
        position: usize,
        note_id: String,
        error: String,
    },
}

/// FIFO queue of pending save/delete operations.
#[derive(Clone)]
pub struct OfflineQueue {
    kv: Arc<dyn KeyValueStore>,
    events: SyncEventBus,
    /// Serializes read-modify-write of the stored array.
    write_lock: Arc<Mutex<()>>,
    /// Serializes drain passes.
    drain_lock: Arc<AsyncMutex<()>>,
}

impl OfflineQueue {
    pub fn new(kv: Arc<dyn KeyValueStore>, events: SyncEventBus) -> Self {
        Self {
            kv,
            events,
            write_lock: Arc::new(Mutex::new(())),
            drain_lock: Arc::new(AsyncMutex::new(())),
        }
    }

    /// Append an operation. Returns the new queue length.
    pub fn enqueue(&self, op: PendingOp) -> Result<usize> {
        let note_id = op.note_id().to_string();
        let kind = op.kind();

        let len = {
            let _guard = self.lock_writes();
            let mut entries = self.load()?;
            entries.push(QueueEntry::now(op));
            self.store(&entries)?;
            entries.len()
        };

        warn!(
            subsystem = "sync",
            component = "offline_queue",
            op = kind,
            note_id = %note_id,
            queue_len = len,
            "Remote write deferred to offline queue"
        );
        self.events.emit(SyncEvent::NoteQueued {
            note_id,
            op: kind,
            queue_len: len,
        });
        Ok(len)
    }

    /// Current entries in FIFO order.
    pub fn entries(&self) -> Result<Vec<QueueEntry>> {
        let _guard = self.lock_writes();
        self.load()
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.entries()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.entries()?.is_empty())
    }

    /// Whether a drain pass is running right now.
    pub fn is_draining(&self) -> bool {
        self.drain_lock.try_lock().is_err()
    }

    /// Replay queued operations for `user_id` against `remote`.
    ///
    /// Waits for any running pass to finish first. Replay failures are
    /// reported in the outcome, never as an error; only local storage
    /// failures return `Err`.
    pub async fn drain(&self, user_id: &str, remote: &dyn RemoteStore) -> Result<DrainOutcome> {
        let _pass = self.drain_lock.lock().await;

        let snapshot = self.entries()?;
        if snapshot.is_empty() {
            debug!(subsystem = "sync", component = "offline_queue", "Queue empty, nothing to drain");
            return Ok(DrainOutcome::Empty);
        }

        let start = Instant::now();
        info!(
            subsystem = "sync",
            component = "offline_queue",
            user_id,
            queue_len = snapshot.len(),
            "Draining offline queue"
        );
        self.events.emit(SyncEvent::DrainStarted {
            queue_len: snapshot.len(),
        });

        for (position, entry) in snapshot.iter().enumerate() {
            let result = match &entry.op {
                PendingOp::Save { note_id, data } => remote.save_note(user_id, note_id, data).await,
                PendingOp::Delete { note_id } => remote.delete_note(user_id, note_id).await,
            };

            if let Err(e) = result {
                let note_id = entry.op.note_id().to_string();
                warn!(
                    subsystem = "sync",
                    component = "offline_queue",
                    op = entry.op.kind(),
                    note_id = %note_id,
                    position,
                    queue_len = snapshot.len(),
                    error = %e,
                    "Queue replay failed, keeping queue for next pass"
                );
                self.events.emit(SyncEvent::DrainFailed {
                    note_id: note_id.clone(),
                    position,
                    error: e.to_string(),
                });
                return Ok(DrainOutcome::Aborted {
                    position,
                    note_id,
                    error: e.to_string(),
                });
            }
        }

        let replayed = snapshot.len();
        {
            let _guard = self.lock_writes();
            let mut current = self.load()?;
            // Only this pass removes entries and enqueue only appends, so the
            // snapshot is still the prefix.
            current.drain(..replayed.min(current.len()));
            self.store(&current)?;
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            subsystem = "sync",
            component = "offline_queue",
            user_id,
            replayed,
            duration_ms,
            "Offline queue drained"
        );
        self.events.emit(SyncEvent::DrainCompleted {
            replayed,
            duration_ms,
        });
        Ok(DrainOutcome::Completed { replayed })
    }

    /// Read the stored array. Caller holds the write lock.
    ///
    /// An unparseable value is copied to `offline_sync_queue.corrupt` and the
    /// queue restarts empty, so one bad write cannot block every later one.
    fn load(&self) -> Result<Vec<QueueEntry>> {
        let raw = match self.kv.get(OFFLINE_QUEUE_KEY)? {
            Some(raw) if !raw.trim().is_empty() => raw,
            _ => return Ok(Vec::new()),
        };
        match serde_json::from_str(&raw) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                error!(
                    subsystem = "sync",
                    component = "offline_queue",
                    backup_key = OFFLINE_QUEUE_BACKUP_KEY,
                    raw_len = raw.len(),
                    error = %e,
                    "Offline queue is corrupt, moved aside and reset"
                );
                self.kv.set(OFFLINE_QUEUE_BACKUP_KEY, &raw)?;
                self.store(&[])?;
                Ok(Vec::new())
            }
        }
    }

    fn store(&self, entries: &[QueueEntry]) -> Result<()> {
        let raw = serde_json::to_string(entries)?;
        self.kv.set(OFFLINE_QUEUE_KEY, &raw)
    }

    fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use planner_core::{Error, NoteDocument};
    use planner_remote::{MemoryRemoteStore, RemoteOp};
    use planner_store::MemoryKv;

    fn queue() -> (OfflineQueue, Arc<MemoryKv>) {
        let kv = Arc::new(MemoryKv::new());
        (OfflineQueue::new(kv.clone(), SyncEventBus::new(32)), kv)
    }

    fn save(id: &str, title: &str) -> PendingOp {
        PendingOp::save(id, NoteDocument::new(id).with_title(title))
    }

    #[test]
    fn test_enqueue_appends_in_order() {
        let (queue, _) = queue();
        assert!(queue.is_empty().unwrap());
        assert_eq!(queue.enqueue(save("a", "A")).unwrap(), 1);
        assert_eq!(queue.enqueue(PendingOp::delete("b")).unwrap(), 2);

        let ids: Vec<_> = queue
            .entries()
            .unwrap()
            .iter()
            .map(|e| e.op.note_id().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_enqueue_persists_wire_format() {
        let (queue, kv) = queue();
        queue.enqueue(PendingOp::delete("n1")).unwrap();
        let raw = kv.get(OFFLINE_QUEUE_KEY).unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value[0]["type"], "delete");
        assert_eq!(value[0]["noteId"], "n1");
        assert!(value[0]["timestamp"].is_string());
    }

    #[test]
    fn test_enqueue_fails_when_storage_full() {
        let kv = Arc::new(MemoryKv::with_quota(8));
        let queue = OfflineQueue::new(kv, SyncEventBus::new(32));
        let err = queue.enqueue(save("a", "A")).unwrap_err();
        assert!(matches!(err, Error::LocalStorage(_)));
    }

    #[test]
    fn test_corrupt_queue_is_moved_aside_and_reset() {
        let (queue, kv) = queue();
        kv.set(OFFLINE_QUEUE_KEY, "[{\"type\":\"save\",\"noteId\"").unwrap();

        assert!(queue.is_empty().unwrap());
        assert_eq!(
            kv.get(OFFLINE_QUEUE_BACKUP_KEY).unwrap().as_deref(),
            Some("[{\"type\":\"save\",\"noteId\"")
        );

        assert_eq!(queue.enqueue(PendingOp::delete("n1")).unwrap(), 1);
        assert_eq!(queue.entries().unwrap()[0].op.note_id(), "n1");
    }

    #[test]
    fn test_enqueue_recovers_from_corrupt_queue() {
        let (queue, kv) = queue();
        kv.set(OFFLINE_QUEUE_KEY, "not json").unwrap();

        assert_eq!(queue.enqueue(save("a", "A")).unwrap(), 1);
        assert_eq!(
            kv.get(OFFLINE_QUEUE_BACKUP_KEY).unwrap().as_deref(),
            Some("not json")
        );
    }

    #[tokio::test]
    async fn test_drain_empty_is_noop() {
        let (queue, _) = queue();
        let remote = MemoryRemoteStore::new();
        assert_eq!(queue.drain("u1", &remote).await.unwrap(), DrainOutcome::Empty);
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn test_drain_replays_fifo_and_clears() {
        let (queue, _) = queue();
        let remote = MemoryRemoteStore::new();
        queue.enqueue(save("a", "A1")).unwrap();
        queue.enqueue(PendingOp::delete("a")).unwrap();
        queue.enqueue(save("a", "A2")).unwrap();

        let outcome = queue.drain("u1", &remote).await.unwrap();
        assert_eq!(outcome, DrainOutcome::Completed { replayed: 3 });
        assert!(queue.is_empty().unwrap());

        let ops: Vec<_> = remote.calls().iter().map(|c| c.op).collect();
        assert_eq!(ops, vec![RemoteOp::SaveNote, RemoteOp::DeleteNote, RemoteOp::SaveNote]);
        assert_eq!(remote.note("u1", "a").await.unwrap().title, "A2");
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_whole_queue() {
        let (queue, _) = queue();
        let remote = MemoryRemoteStore::new();
        queue.enqueue(save("a", "A")).unwrap();
        queue.enqueue(save("b", "B")).unwrap();
        queue.enqueue(save("c", "C")).unwrap();

        remote.fail_after(1);
        let outcome = queue.drain("u1", &remote).await.unwrap();
        assert!(matches!(
            outcome,
            DrainOutcome::Aborted { position: 1, ref note_id, .. } if note_id == "b"
        ));
        assert_eq!(queue.len().unwrap(), 3);
        // Nothing after the failing entry was attempted.
        assert_eq!(remote.call_count(RemoteOp::SaveNote), 2);

        remote.set_available(true);
        remote.clear_calls();
        let outcome = queue.drain("u1", &remote).await.unwrap();
        assert_eq!(outcome, DrainOutcome::Completed { replayed: 3 });
        assert!(queue.is_empty().unwrap());
        assert_eq!(remote.call_count(RemoteOp::SaveNote), 3);
        for id in ["a", "b", "c"] {
            assert!(remote.note("u1", id).await.is_some());
        }
        assert_eq!(remote.notes("u1").await.len(), 3);
    }

    #[tokio::test]
    async fn test_permission_failure_aborts_pass() {
        let (queue, _) = queue();
        let remote = MemoryRemoteStore::new();
        remote.deny_user("u1");
        queue.enqueue(save("a", "A")).unwrap();

        let outcome = queue.drain("u1", &remote).await.unwrap();
        assert!(matches!(outcome, DrainOutcome::Aborted { position: 0, .. }));
        assert_eq!(queue.len().unwrap(), 1);
    }

    /// Remote that appends to the queue while a pass is replaying.
    struct AppendingRemote {
        queue: OfflineQueue,
        inner: MemoryRemoteStore,
    }

    #[async_trait::async_trait]
    impl RemoteStore for AppendingRemote {
        async fn save_note(&self, user_id: &str, note_id: &str, note: &NoteDocument) -> Result<()> {
            self.queue.enqueue(save("late", "L"))?;
            self.inner.save_note(user_id, note_id, note).await
        }
        async fn delete_note(&self, user_id: &str, note_id: &str) -> Result<()> {
            self.inner.delete_note(user_id, note_id).await
        }
        async fn get_note(&self, user_id: &str, note_id: &str) -> Result<Option<NoteDocument>> {
            self.inner.get_note(user_id, note_id).await
        }
        async fn list_recent(&self, user_id: &str, count: usize) -> Result<Vec<NoteDocument>> {
            self.inner.list_recent(user_id, count).await
        }
        async fn watch_note(
            &self,
            user_id: &str,
            note_id: &str,
        ) -> Result<planner_core::RemoteFeed<Option<NoteDocument>>> {
            self.inner.watch_note(user_id, note_id).await
        }
        async fn watch_notes(
            &self,
            user_id: &str,
        ) -> Result<planner_core::RemoteFeed<Vec<NoteDocument>>> {
            self.inner.watch_notes(user_id).await
        }
        async fn health_check(&self) -> Result<()> {
            self.inner.health_check().await
        }
    }

    #[tokio::test]
    async fn test_entries_appended_during_pass_survive() {
        let (queue, _) = queue();
        queue.enqueue(PendingOp::delete("a")).unwrap();
        queue.enqueue(save("b", "B")).unwrap();

        let remote = AppendingRemote {
            queue: queue.clone(),
            inner: MemoryRemoteStore::new(),
        };
        let outcome = queue.drain("u1", &remote).await.unwrap();
        assert_eq!(outcome, DrainOutcome::Completed { replayed: 2 });

        let ids: Vec<_> = queue
            .entries()
            .unwrap()
            .iter()
            .map(|e| e.op.note_id().to_string())
            .collect();
        assert_eq!(ids, vec!["late"]);
    }

    #[tokio::test]
    async fn test_passes_are_serialized() {
        let (queue, _) = queue();
        let remote = MemoryRemoteStore::new();
        queue.enqueue(save("a", "A")).unwrap();

        let (first, second) = tokio::join!(queue.drain("u1", &remote), queue.drain("u1", &remote));
        let mut outcomes = vec![first.unwrap(), second.unwrap()];
        outcomes.sort_by_key(|o| matches!(o, DrainOutcome::Empty));
        assert_eq!(
            outcomes,
            vec![DrainOutcome::Completed { replayed: 1 }, DrainOutcome::Empty]
        );
        assert_eq!(remote.call_count(RemoteOp::SaveNote), 1);
        assert!(!queue.is_draining());
    }

    #[tokio::test]
    async fn test_drain_emits_events() {
        let kv = Arc::new(MemoryKv::new());
        let bus = SyncEventBus::new(32);
        let mut rx = bus.subscribe();
        let queue = OfflineQueue::new(kv, bus);
        let remote = MemoryRemoteStore::new();

        queue.enqueue(save("a", "A")).unwrap();
        queue.drain("u1", &remote).await.unwrap();

        let kinds: Vec<_> = [
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
        ]
        .into_iter()
        .map(|e| e.event_type)
        .collect();
        assert_eq!(
            kinds,
            vec!["queue.note_queued", "queue.drain_started", "queue.drain_completed"]
        );
    }
}
