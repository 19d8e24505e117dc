//! Sync orchestrator: local-first note operations, connectivity handling,
//! login merge, and live subscriptions.
//!
//! ## Write path
//!
//! 1. The local cache is written synchronously. A failure here is returned.
//! 2. Nobody signed in: done.
//! 3. Signed in and offline: the operation is queued, no remote call.
//! 4. Signed in and online: the remote is called. A recoverable failure
//!    queues the operation; any other failure is returned.
//!
//! ## Connectivity
//!
//! `handle_online` runs one drain pass to completion and then starts the
//! periodic timer. `handle_offline` stops the timer without cancelling a
//! pass already in flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use planner_core::{
    AuthUser, DayIndexEntry, Error, NoteDocument, PendingOp, RemoteStore, Result, SyncEvent,
    SyncEventBus, SyncStatus,
};
use planner_store::LocalCache;

use crate::config::SyncConfig;
use crate::connectivity::DrainTimer;
use crate::queue::{DrainOutcome, OfflineQueue};
use crate::session::AuthSession;
use crate::subscription::Subscription;

/// Result of a login-time merge of local notes into the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub pushed: usize,
    pub failed: usize,
    pub drain: DrainOutcome,
}

#[derive(Default)]
struct SyncHistory {
    last_sync_at: Option<String>,
    last_error: Option<String>,
}

struct Shared {
    cache: LocalCache,
    queue: OfflineQueue,
    remote: Arc<dyn RemoteStore>,
    session: AuthSession,
    config: SyncConfig,
    events: SyncEventBus,
    online: AtomicBool,
    timer: Mutex<Option<DrainTimer>>,
    history: Mutex<SyncHistory>,
}

/// Coordinates the local cache, offline queue, and remote store.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SyncOrchestrator {
    shared: Arc<Shared>,
}

impl SyncOrchestrator {
    /// Create an orchestrator. `online` is the platform's connectivity at
    /// construction. The drain timer is not started until [`start`](Self::start).
    pub fn new(
        cache: LocalCache,
        remote: Arc<dyn RemoteStore>,
        session: AuthSession,
        config: SyncConfig,
        online: bool,
    ) -> Self {
        let events = SyncEventBus::default();
        let queue = OfflineQueue::new(cache.store(), events.clone());
        Self {
            shared: Arc::new(Shared {
                cache,
                queue,
                remote,
                session,
                config,
                events,
                online: AtomicBool::new(online),
                timer: Mutex::new(None),
                history: Mutex::new(SyncHistory::default()),
            }),
        }
    }

    pub fn cache(&self) -> &LocalCache {
        &self.shared.cache
    }

    pub fn queue(&self) -> &OfflineQueue {
        &self.shared.queue
    }

    pub fn session(&self) -> &AuthSession {
        &self.shared.session
    }

    /// Event bus carrying [`SyncEvent`]s.
    pub fn events(&self) -> SyncEventBus {
        self.shared.events.clone()
    }

    pub fn is_online(&self) -> bool {
        self.shared.online.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Lifecycle & connectivity
    // =========================================================================

    /// Start the periodic drain timer if online.
    pub fn start(&self) {
        if self.is_online() {
            self.start_timer();
        }
    }

    /// Stop the periodic drain timer.
    pub fn stop(&self) {
        self.stop_timer();
    }

    pub fn timer_running(&self) -> bool {
        self.timer_slot().as_ref().is_some_and(DrainTimer::is_running)
    }

    /// Platform reports connectivity. Drains once, then starts the timer.
    pub async fn handle_online(&self) {
        if !self.shared.online.swap(true, Ordering::SeqCst) {
            info!(subsystem = "sync", component = "connectivity", online = true, "Connectivity restored");
            self.shared
                .events
                .emit(SyncEvent::ConnectivityChanged { online: true });
        }

        if let Err(e) = self.drain_now().await {
            error!(subsystem = "sync", component = "connectivity", error = %e, "Drain on reconnect failed");
        }
        self.start_timer();
    }

    /// Platform reports loss of connectivity. Stops the timer.
    pub fn handle_offline(&self) {
        if self.shared.online.swap(false, Ordering::SeqCst) {
            info!(subsystem = "sync", component = "connectivity", online = false, "Connectivity lost");
            self.shared
                .events
                .emit(SyncEvent::ConnectivityChanged { online: false });
        }
        self.stop_timer();
    }

    /// Run one drain pass for the signed-in user. `None` when nobody is
    /// signed in.
    pub async fn drain_now(&self) -> Result<Option<DrainOutcome>> {
        let Some(uid) = self.shared.session.uid() else {
            debug!(subsystem = "sync", op = "drain", "No user signed in, skipping drain");
            return Ok(None);
        };
        let outcome = self
            .shared
            .queue
            .drain(&uid, self.shared.remote.as_ref())
            .await?;
        self.record(&outcome);
        Ok(Some(outcome))
    }

    fn start_timer(&self) {
        let mut slot = self.timer_slot();
        if slot.as_ref().is_some_and(DrainTimer::is_running) {
            return;
        }

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        *slot = Some(DrainTimer::start(
            self.shared.config.drain_interval(),
            move || {
                let weak = weak.clone();
                async move {
                    let Some(shared) = weak.upgrade() else {
                        return false;
                    };
                    let orchestrator = SyncOrchestrator { shared };
                    if orchestrator.is_online() && orchestrator.shared.session.is_signed_in() {
                        if let Err(e) = orchestrator.drain_now().await {
                            error!(subsystem = "sync", component = "drain_timer", error = %e, "Periodic drain failed");
                        }
                    }
                    true
                }
            },
        ));
    }

    fn stop_timer(&self) {
        if let Some(timer) = self.timer_slot().take() {
            timer.stop();
        }
    }

    // =========================================================================
    // Note operations
    // =========================================================================

    /// Save a note locally, then remotely or to the offline queue.
    pub async fn save_note(&self, note_id: &str, mut note: NoteDocument) -> Result<()> {
        if note.id.is_empty() {
            note.id = note_id.to_string();
        }
        self.shared
            .cache
            .put(note_id, &note)
            .map_err(|e| local_write_failed("save", note_id, e))?;

        let Some(uid) = self.shared.session.uid() else {
            debug!(subsystem = "sync", op = "save", note_id, "Saved locally, no user signed in");
            return Ok(());
        };

        if !self.is_online() {
            self.shared
                .queue
                .enqueue(PendingOp::save(note_id, note))
                .map_err(|e| local_write_failed("save", note_id, e))?;
            return Ok(());
        }

        match self.shared.remote.save_note(&uid, note_id, &note).await {
            Ok(()) => {
                debug!(subsystem = "sync", op = "save", note_id, user_id = %uid, "Saved remotely");
                Ok(())
            }
            Err(e) if e.is_recoverable() => {
                warn!(subsystem = "sync", op = "save", note_id, error = %e, "Remote save failed, queueing");
                self.shared.queue.enqueue(PendingOp::save(note_id, note))?;
                Ok(())
            }
            Err(e) => {
                warn!(subsystem = "sync", op = "save", note_id, error = %e, "Remote save rejected");
                Err(e)
            }
        }
    }

    /// Delete a note locally (and from `date`'s index), then remotely or via
    /// the offline queue.
    pub async fn delete_note(&self, note_id: &str, date: Option<&str>) -> Result<()> {
        self.shared
            .cache
            .remove(note_id, date)
            .map_err(|e| local_write_failed("delete", note_id, e))?;

        let Some(uid) = self.shared.session.uid() else {
            debug!(subsystem = "sync", op = "delete", note_id, "Deleted locally, no user signed in");
            return Ok(());
        };

        if !self.is_online() {
            self.shared
                .queue
                .enqueue(PendingOp::delete(note_id))
                .map_err(|e| local_write_failed("delete", note_id, e))?;
            return Ok(());
        }

        match self.shared.remote.delete_note(&uid, note_id).await {
            Ok(()) => {
                debug!(subsystem = "sync", op = "delete", note_id, user_id = %uid, "Deleted remotely");
                Ok(())
            }
            Err(e) if e.is_recoverable() => {
                warn!(subsystem = "sync", op = "delete", note_id, error = %e, "Remote delete failed, queueing");
                self.shared.queue.enqueue(PendingOp::delete(note_id))?;
                Ok(())
            }
            Err(e) => {
                warn!(subsystem = "sync", op = "delete", note_id, error = %e, "Remote delete rejected");
                Err(e)
            }
        }
    }

    /// Load a note from the local cache, falling back to the remote (and
    /// caching the result) when signed in.
    pub async fn load_note(&self, note_id: &str) -> Result<Option<NoteDocument>> {
        if let Some(note) = self.shared.cache.get(note_id)? {
            return Ok(Some(note));
        }

        let Some(uid) = self.shared.session.uid() else {
            return Ok(None);
        };

        match self.shared.remote.get_note(&uid, note_id).await {
            Ok(Some(mut note)) => {
                if note.id.is_empty() {
                    note.id = note_id.to_string();
                }
                self.shared.cache.cache_remote(note_id, &note)?;
                debug!(subsystem = "sync", op = "load", note_id, "Loaded from remote and cached");
                Ok(Some(note))
            }
            Ok(None) => Ok(None),
            Err(e) if e.is_recoverable() => {
                warn!(subsystem = "sync", op = "load", note_id, error = %e, "Remote load failed");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Day index entries for `date`.
    pub fn list_day_notes(&self, date: &str) -> Result<Vec<DayIndexEntry>> {
        self.shared.cache.list_by_date(date)
    }

    /// Most recently updated notes. Prefers the remote listing when signed in
    /// and online and it is non-empty; otherwise the local one.
    pub async fn list_recent_notes(&self, count: usize) -> Result<Vec<NoteDocument>> {
        let local = self.shared.cache.recent_notes(count)?;

        let Some(uid) = self.shared.session.uid() else {
            return Ok(local);
        };
        if !self.is_online() {
            return Ok(local);
        }

        match self.shared.remote.list_recent(&uid, count).await {
            Ok(remote) if !remote.is_empty() => Ok(remote),
            Ok(_) => Ok(local),
            Err(e) => {
                warn!(subsystem = "sync", op = "recent", error = %e, "Remote recent listing failed, using local");
                Ok(local)
            }
        }
    }

    // =========================================================================
    // Login
    // =========================================================================

    /// Sign `user` in. On a login (nobody was signed in before), merge local
    /// notes into the account. Merge failures are logged, never returned.
    pub async fn handle_sign_in(&self, user: AuthUser) -> Option<MergeReport> {
        let uid = user.uid.clone();
        if !self.shared.session.sign_in(user) {
            return None;
        }

        match self.sync_local_to_remote(&uid).await {
            Ok(report) => Some(report),
            Err(e) => {
                error!(subsystem = "sync", op = "merge", user_id = %uid, error = %e, "Login merge failed");
                None
            }
        }
    }

    pub fn handle_sign_out(&self) {
        self.shared.session.sign_out();
    }

    /// Push every local note to `user_id`'s remote collection, then drain the
    /// queue once.
    ///
    /// Remote copies are overwritten unconditionally. Per-note failures are
    /// logged and counted.
    pub async fn sync_local_to_remote(&self, user_id: &str) -> Result<MergeReport> {
        let notes = self.shared.cache.all_notes()?;
        info!(
            subsystem = "sync",
            op = "merge",
            user_id,
            count = notes.len(),
            "Merging local notes into account"
        );

        let mut pushed = 0;
        let mut failed = 0;
        for note in &notes {
            match self.shared.remote.save_note(user_id, &note.id, note).await {
                Ok(()) => pushed += 1,
                Err(e) => {
                    failed += 1;
                    warn!(subsystem = "sync", op = "merge", note_id = %note.id, error = %e, "Note merge failed");
                }
            }
        }

        self.shared.events.emit(SyncEvent::LocalMerged {
            user_id: user_id.to_string(),
            pushed,
            failed,
        });
        if failed == 0 {
            self.history().last_sync_at = Some(Utc::now().to_rfc3339());
        }

        let drain = self
            .shared
            .queue
            .drain(user_id, self.shared.remote.as_ref())
            .await?;
        self.record(&drain);

        info!(subsystem = "sync", op = "merge", user_id, pushed, failed, "Local merge finished");
        Ok(MergeReport {
            pushed,
            failed,
            drain,
        })
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Live updates of one note. Each delivered document is written to the
    /// local cache before `callback` runs.
    pub async fn subscribe_to_note<F>(&self, note_id: &str, callback: F) -> Subscription
    where
        F: Fn(Option<NoteDocument>) + Send + 'static,
    {
        let Some(uid) = self.shared.session.uid() else {
            return Subscription::inert();
        };
        if note_id.is_empty() {
            return Subscription::inert();
        }

        let feed = match self.shared.remote.watch_note(&uid, note_id).await {
            Ok(feed) => feed,
            Err(e) => {
                warn!(subsystem = "sync", op = "subscribe", note_id, error = %e, "Note subscription failed");
                return Subscription::inert();
            }
        };

        let shared = Arc::clone(&self.shared);
        let note_id = note_id.to_string();
        Subscription::pump("note", feed, move |update: Option<NoteDocument>| {
            if let Some(ref note) = update {
                mirror(&shared, &note_id, note);
            }
            callback(update);
        })
    }

    /// Live updates of the signed-in user's whole collection. Each document is
    /// written to the local cache before `callback` receives the list.
    pub async fn subscribe_to_user_notes<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Vec<NoteDocument>) + Send + 'static,
    {
        let Some(uid) = self.shared.session.uid() else {
            return Subscription::inert();
        };

        let feed = match self.shared.remote.watch_notes(&uid).await {
            Ok(feed) => feed,
            Err(e) => {
                warn!(subsystem = "sync", op = "subscribe", user_id = %uid, error = %e, "Collection subscription failed");
                return Subscription::inert();
            }
        };

        let shared = Arc::clone(&self.shared);
        Subscription::pump("notes", feed, move |notes: Vec<NoteDocument>| {
            for note in notes.iter().filter(|n| !n.id.is_empty()) {
                mirror(&shared, &note.id, note);
            }
            callback(notes);
        })
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Snapshot for a status indicator.
    pub fn status(&self) -> SyncStatus {
        let pending = self.shared.queue.len().unwrap_or_else(|e| {
            warn!(subsystem = "sync", error = %e, "Offline queue unreadable");
            0
        });
        let history = self.history();
        SyncStatus {
            online: self.is_online(),
            syncing: self.shared.queue.is_draining(),
            signed_in: self.shared.session.is_signed_in(),
            pending,
            last_sync_at: history.last_sync_at.clone(),
            last_error: history.last_error.clone(),
        }
    }

    fn record(&self, outcome: &DrainOutcome) {
        let mut history = self.history();
        match outcome {
            DrainOutcome::Completed { .. } => {
                history.last_sync_at = Some(Utc::now().to_rfc3339());
                history.last_error = None;
            }
            DrainOutcome::Aborted { error, .. } => {
                history.last_error = Some(error.clone());
            }
            DrainOutcome::Empty => {}
        }
    }

    fn history(&self) -> MutexGuard<'_, SyncHistory> {
        self.shared
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn timer_slot(&self) -> MutexGuard<'_, Option<DrainTimer>> {
        self.shared
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Log a failed local write before it is handed back to the caller.
fn local_write_failed(op: &'static str, note_id: &str, e: Error) -> Error {
    if e.is_local() {
        error!(subsystem = "sync", op, note_id, error = %e, "Local write failed");
    } else {
        warn!(subsystem = "sync", op, note_id, error = %e, "Local write rejected");
    }
    e
}

/// Write a remote document into the local cache for a subscription.
fn mirror(shared: &Shared, note_id: &str, note: &NoteDocument) {
    match shared.cache.cache_remote(note_id, note) {
        Ok(()) => shared.events.emit(SyncEvent::RemoteNoteMirrored {
            note_id: note_id.to_string(),
        }),
        Err(e) => {
            error!(subsystem = "sync", op = "mirror", note_id, error = %e, "Failed to mirror remote note");
        }
    }
}
