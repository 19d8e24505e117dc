//! In-memory remote document store.
//!
//! Holds per-user note collections and team workspaces behind an async lock.
//! Live feeds are unbounded channels that receive the current state on
//! subscribe and again after every change; feeds whose receiver was dropped
//! are pruned on the next notification.
//!
//! Fault injection mirrors what a real network does to the sync layer:
//!
//! ```rust
//! use planner_remote::MemoryRemoteStore;
//!
//! let remote = MemoryRemoteStore::new();
//! remote.set_available(false); // every call fails with RemoteUnavailable
//! remote.set_available(true);
//! remote.fail_after(2);        // two more calls succeed, then the link drops
//! remote.deny_user("mallory"); // note calls for this user are Forbidden
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::debug;
use uuid::Uuid;

use planner_core::{
    newest_first, sort_newest_first, Error, FeedSender, NewTeamDoc, NoteDocument, RemoteFeed,
    RemoteStore, Result, Team, TeamDoc, TeamDocPatch, TeamStore,
};

/// Remote operation kinds recorded in the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    SaveNote,
    DeleteNote,
    GetNote,
    ListRecent,
    WatchNote,
    WatchNotes,
    HealthCheck,
    CreateTeam,
    TeamsForMember,
    GetTeam,
    AddMember,
    WatchTeam,
    WatchTeamDocs,
    CreateTeamDoc,
    GetTeamDoc,
    UpdateTeamDoc,
    DeleteTeamDoc,
}

/// One recorded remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    pub op: RemoteOp,
    /// Acting user (note owner or team caller); empty for health checks.
    pub user_id: String,
    /// Note id, team id, or `team/doc` path.
    pub target: String,
    pub succeeded: bool,
}

#[derive(Debug)]
struct Faults {
    available: bool,
    /// Calls that may still succeed before the link drops.
    remaining: Option<usize>,
    denied: HashSet<String>,
}

impl Default for Faults {
    fn default() -> Self {
        Self {
            available: true,
            remaining: None,
            denied: HashSet::new(),
        }
    }
}

struct NoteWatcher {
    user_id: String,
    note_id: String,
    tx: FeedSender<Option<NoteDocument>>,
}

struct CollectionWatcher {
    user_id: String,
    tx: FeedSender<Vec<NoteDocument>>,
}

struct TeamWatcher {
    team_id: String,
    tx: FeedSender<Option<Team>>,
}

struct TeamDocsWatcher {
    team_id: String,
    tx: FeedSender<Vec<TeamDoc>>,
}

#[derive(Default)]
struct State {
    notes: HashMap<String, BTreeMap<String, NoteDocument>>,
    teams: BTreeMap<String, Team>,
    team_docs: HashMap<String, BTreeMap<String, TeamDoc>>,
    note_watchers: Vec<NoteWatcher>,
    collection_watchers: Vec<CollectionWatcher>,
    team_watchers: Vec<TeamWatcher>,
    team_docs_watchers: Vec<TeamDocsWatcher>,
}

impl State {
    fn note(&self, user_id: &str, note_id: &str) -> Option<NoteDocument> {
        self.notes.get(user_id).and_then(|n| n.get(note_id)).cloned()
    }

    fn user_notes(&self, user_id: &str) -> Vec<NoteDocument> {
        let mut notes: Vec<_> = self
            .notes
            .get(user_id)
            .map(|n| n.values().cloned().collect())
            .unwrap_or_default();
        sort_newest_first(&mut notes);
        notes
    }

    fn docs_of(&self, team_id: &str) -> Vec<TeamDoc> {
        let mut docs: Vec<_> = self
            .team_docs
            .get(team_id)
            .map(|d| d.values().cloned().collect())
            .unwrap_or_default();
        docs.sort_by(|a, b| newest_first(a.created_at.as_deref(), b.created_at.as_deref()));
        docs
    }

    fn notify_note(&mut self, user_id: &str, note_id: &str) {
        let current = self.note(user_id, note_id);
        self.note_watchers.retain(|w| {
            if w.user_id == user_id && w.note_id == note_id {
                w.tx.send(Ok(current.clone())).is_ok()
            } else {
                !w.tx.is_closed()
            }
        });

        let all = self.user_notes(user_id);
        self.collection_watchers.retain(|w| {
            if w.user_id == user_id {
                w.tx.send(Ok(all.clone())).is_ok()
            } else {
                !w.tx.is_closed()
            }
        });
    }

    fn notify_team(&mut self, team_id: &str) {
        let current = self.teams.get(team_id).cloned();
        self.team_watchers.retain(|w| {
            if w.team_id == team_id {
                w.tx.send(Ok(current.clone())).is_ok()
            } else {
                !w.tx.is_closed()
            }
        });
    }

    fn notify_team_docs(&mut self, team_id: &str) {
        let docs = self.docs_of(team_id);
        self.team_docs_watchers.retain(|w| {
            if w.team_id == team_id {
                w.tx.send(Ok(docs.clone())).is_ok()
            } else {
                !w.tx.is_closed()
            }
        });
    }

    fn require_member(&self, caller: &str, team_id: &str) -> Result<()> {
        match self.teams.get(team_id) {
            Some(team) if team.is_member(caller) => Ok(()),
            Some(_) => Err(Error::Forbidden(format!(
                "user {caller} is not a member of team {team_id}"
            ))),
            None => Err(Error::NotFound(format!("team {team_id}"))),
        }
    }
}

struct Inner {
    state: AsyncMutex<State>,
    faults: Mutex<Faults>,
    calls: Mutex<Vec<RemoteCall>>,
}

/// In-process remote store implementing both [`RemoteStore`] and [`TeamStore`].
///
/// Clones share the same data, so a test can keep a handle while the sync
/// layer owns another.
#[derive(Clone)]
pub struct MemoryRemoteStore {
    inner: Arc<Inner>,
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: AsyncMutex::new(State::default()),
                faults: Mutex::new(Faults::default()),
                calls: Mutex::new(Vec::new()),
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Fault injection
    // -------------------------------------------------------------------------

    /// Make every call succeed (`true`) or fail with `RemoteUnavailable`.
    /// Also clears any pending [`fail_after`](Self::fail_after).
    pub fn set_available(&self, available: bool) {
        let mut faults = self.faults();
        faults.available = available;
        faults.remaining = None;
    }

    /// Let `calls` more calls succeed, then become unavailable.
    pub fn fail_after(&self, calls: usize) {
        self.faults().remaining = Some(calls);
    }

    /// Reject note calls for `user_id` with `Forbidden`.
    pub fn deny_user(&self, user_id: impl Into<String>) {
        self.faults().denied.insert(user_id.into());
    }

    pub fn is_available(&self) -> bool {
        self.faults().available
    }

    // -------------------------------------------------------------------------
    // Call log
    // -------------------------------------------------------------------------

    /// Every call attempted so far, in order.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.call_log().clone()
    }

    pub fn clear_calls(&self) {
        self.call_log().clear();
    }

    /// Number of attempted calls of the given kind.
    pub fn call_count(&self, op: RemoteOp) -> usize {
        self.call_log().iter().filter(|c| c.op == op).count()
    }

    // -------------------------------------------------------------------------
    // Direct access (another device writing, test assertions)
    // -------------------------------------------------------------------------

    /// Stored note, bypassing faults and the call log.
    pub async fn note(&self, user_id: &str, note_id: &str) -> Option<NoteDocument> {
        self.inner.state.lock().await.note(user_id, note_id)
    }

    /// All of a user's notes, newest first.
    pub async fn notes(&self, user_id: &str) -> Vec<NoteDocument> {
        self.inner.state.lock().await.user_notes(user_id)
    }

    /// Write a note as another device would, notifying live feeds.
    pub async fn put_external(&self, user_id: &str, note: NoteDocument) {
        let mut state = self.inner.state.lock().await;
        let note_id = note.id.clone();
        state
            .notes
            .entry(user_id.to_string())
            .or_default()
            .insert(note_id.clone(), note);
        state.notify_note(user_id, &note_id);
    }

    /// Delete a note as another device would, notifying live feeds.
    pub async fn delete_external(&self, user_id: &str, note_id: &str) {
        let mut state = self.inner.state.lock().await;
        if let Some(notes) = state.notes.get_mut(user_id) {
            notes.remove(note_id);
        }
        state.notify_note(user_id, note_id);
    }

    pub async fn team(&self, team_id: &str) -> Option<Team> {
        self.inner.state.lock().await.teams.get(team_id).cloned()
    }

    /// Number of open note and collection feeds. Closed feeds still count
    /// until the next change prunes them.
    pub async fn open_note_feeds(&self) -> usize {
        let state = self.inner.state.lock().await;
        state.note_watchers.len() + state.collection_watchers.len()
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn faults(&self) -> MutexGuard<'_, Faults> {
        self.inner.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn call_log(&self) -> MutexGuard<'_, Vec<RemoteCall>> {
        self.inner.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply fault injection and record the call.
    fn admit(&self, op: RemoteOp, user_id: &str, target: &str, check_denied: bool) -> Result<()> {
        let outcome = {
            let mut faults = self.faults();
            if let Some(remaining) = faults.remaining {
                if remaining == 0 {
                    faults.available = false;
                    faults.remaining = None;
                } else {
                    faults.remaining = Some(remaining - 1);
                }
            }

            if !faults.available {
                Err(Error::RemoteUnavailable("remote store is offline".to_string()))
            } else if check_denied && faults.denied.contains(user_id) {
                Err(Error::Forbidden(format!(
                    "user {user_id} may not access this collection"
                )))
            } else {
                Ok(())
            }
        };

        self.call_log().push(RemoteCall {
            op,
            user_id: user_id.to_string(),
            target: target.to_string(),
            succeeded: outcome.is_ok(),
        });
        debug!(
            subsystem = "remote",
            component = "memory",
            op = ?op,
            user_id,
            target,
            ok = outcome.is_ok(),
            "Remote call"
        );
        outcome
    }

    fn require_caller(caller: &str) -> Result<()> {
        if caller.is_empty() {
            return Err(Error::Unauthorized("sign in required".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn save_note(&self, user_id: &str, note_id: &str, note: &NoteDocument) -> Result<()> {
        self.admit(RemoteOp::SaveNote, user_id, note_id, true)?;
        let mut stored = note.clone();
        if stored.id.is_empty() {
            stored.id = note_id.to_string();
        }

        let mut state = self.inner.state.lock().await;
        state
            .notes
            .entry(user_id.to_string())
            .or_default()
            .insert(note_id.to_string(), stored);
        state.notify_note(user_id, note_id);
        Ok(())
    }

    async fn delete_note(&self, user_id: &str, note_id: &str) -> Result<()> {
        self.admit(RemoteOp::DeleteNote, user_id, note_id, true)?;
        let mut state = self.inner.state.lock().await;
        let removed = state
            .notes
            .get_mut(user_id)
            .and_then(|notes| notes.remove(note_id))
            .is_some();
        if removed {
            state.notify_note(user_id, note_id);
        }
        Ok(())
    }

    async fn get_note(&self, user_id: &str, note_id: &str) -> Result<Option<NoteDocument>> {
        self.admit(RemoteOp::GetNote, user_id, note_id, true)?;
        Ok(self.inner.state.lock().await.note(user_id, note_id))
    }

    async fn list_recent(&self, user_id: &str, count: usize) -> Result<Vec<NoteDocument>> {
        self.admit(RemoteOp::ListRecent, user_id, "", true)?;
        let state = self.inner.state.lock().await;
        Ok(state
            .user_notes(user_id)
            .into_iter()
            .filter(|n| n.updated_at.is_some())
            .take(count)
            .collect())
    }

    async fn watch_note(
        &self,
        user_id: &str,
        note_id: &str,
    ) -> Result<RemoteFeed<Option<NoteDocument>>> {
        self.admit(RemoteOp::WatchNote, user_id, note_id, true)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.inner.state.lock().await;
        let _ = tx.send(Ok(state.note(user_id, note_id)));
        state.note_watchers.push(NoteWatcher {
            user_id: user_id.to_string(),
            note_id: note_id.to_string(),
            tx,
        });
        Ok(rx)
    }

    async fn watch_notes(&self, user_id: &str) -> Result<RemoteFeed<Vec<NoteDocument>>> {
        self.admit(RemoteOp::WatchNotes, user_id, "", true)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.inner.state.lock().await;
        let _ = tx.send(Ok(state.user_notes(user_id)));
        state.collection_watchers.push(CollectionWatcher {
            user_id: user_id.to_string(),
            tx,
        });
        Ok(rx)
    }

    async fn health_check(&self) -> Result<()> {
        self.admit(RemoteOp::HealthCheck, "", "", false)
    }
}

#[async_trait]
impl TeamStore for MemoryRemoteStore {
    async fn create_team(&self, caller: &str, name: &str) -> Result<Team> {
        Self::require_caller(caller)?;
        self.admit(RemoteOp::CreateTeam, caller, name, false)?;
        let team = Team {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            members: vec![caller.to_string()],
            created_by: caller.to_string(),
            created_at: Some(Utc::now().to_rfc3339()),
            updated_at: None,
        };

        let mut state = self.inner.state.lock().await;
        state.teams.insert(team.id.clone(), team.clone());
        state.notify_team(&team.id);
        Ok(team)
    }

    async fn teams_for_member(&self, uid: &str) -> Result<Vec<Team>> {
        self.admit(RemoteOp::TeamsForMember, uid, "", false)?;
        let state = self.inner.state.lock().await;
        Ok(state
            .teams
            .values()
            .filter(|t| t.is_member(uid))
            .cloned()
            .collect())
    }

    async fn get_team(&self, caller: &str, team_id: &str) -> Result<Option<Team>> {
        Self::require_caller(caller)?;
        self.admit(RemoteOp::GetTeam, caller, team_id, false)?;
        Ok(self.inner.state.lock().await.teams.get(team_id).cloned())
    }

    async fn add_member(&self, caller: &str, team_id: &str) -> Result<Team> {
        Self::require_caller(caller)?;
        self.admit(RemoteOp::AddMember, caller, team_id, false)?;
        let mut state = self.inner.state.lock().await;
        let team = state
            .teams
            .get_mut(team_id)
            .ok_or_else(|| Error::NotFound(format!("team {team_id}")))?;
        if team.is_member(caller) {
            return Err(Error::Conflict(format!(
                "user {caller} is already a member of team {team_id}"
            )));
        }
        team.members.push(caller.to_string());
        team.updated_at = Some(Utc::now().to_rfc3339());
        let updated = team.clone();
        state.notify_team(team_id);
        Ok(updated)
    }

    async fn watch_team(&self, caller: &str, team_id: &str) -> Result<RemoteFeed<Option<Team>>> {
        Self::require_caller(caller)?;
        self.admit(RemoteOp::WatchTeam, caller, team_id, false)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.inner.state.lock().await;
        let _ = tx.send(Ok(state.teams.get(team_id).cloned()));
        state.team_watchers.push(TeamWatcher {
            team_id: team_id.to_string(),
            tx,
        });
        Ok(rx)
    }

    async fn watch_team_docs(
        &self,
        caller: &str,
        team_id: &str,
    ) -> Result<RemoteFeed<Vec<TeamDoc>>> {
        Self::require_caller(caller)?;
        self.admit(RemoteOp::WatchTeamDocs, caller, team_id, false)?;
        let mut state = self.inner.state.lock().await;
        state.require_member(caller, team_id)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Ok(state.docs_of(team_id)));
        state.team_docs_watchers.push(TeamDocsWatcher {
            team_id: team_id.to_string(),
            tx,
        });
        Ok(rx)
    }

    async fn create_team_doc(
        &self,
        caller: &str,
        team_id: &str,
        doc: &NewTeamDoc,
    ) -> Result<String> {
        Self::require_caller(caller)?;
        self.admit(RemoteOp::CreateTeamDoc, caller, team_id, false)?;
        let mut state = self.inner.state.lock().await;
        state.require_member(caller, team_id)?;

        let doc_id = Uuid::new_v4().to_string();
        let stored = TeamDoc {
            id: doc_id.clone(),
            title: doc.title.clone(),
            author: doc.author.clone(),
            author_id: doc.author_id.clone(),
            created_at: Some(Utc::now().to_rfc3339()),
            date: Some(doc.date.clone()),
            ..Default::default()
        };
        state
            .team_docs
            .entry(team_id.to_string())
            .or_default()
            .insert(doc_id.clone(), stored);
        state.notify_team_docs(team_id);
        Ok(doc_id)
    }

    async fn get_team_doc(
        &self,
        caller: &str,
        team_id: &str,
        doc_id: &str,
    ) -> Result<Option<TeamDoc>> {
        Self::require_caller(caller)?;
        self.admit(RemoteOp::GetTeamDoc, caller, &format!("{team_id}/{doc_id}"), false)?;
        let state = self.inner.state.lock().await;
        state.require_member(caller, team_id)?;
        Ok(state
            .team_docs
            .get(team_id)
            .and_then(|docs| docs.get(doc_id))
            .cloned())
    }

    async fn update_team_doc(
        &self,
        caller: &str,
        team_id: &str,
        doc_id: &str,
        patch: &TeamDocPatch,
    ) -> Result<()> {
        Self::require_caller(caller)?;
        self.admit(RemoteOp::UpdateTeamDoc, caller, &format!("{team_id}/{doc_id}"), false)?;
        let mut state = self.inner.state.lock().await;
        state.require_member(caller, team_id)?;

        let docs = state.team_docs.entry(team_id.to_string()).or_default();
        let existing = docs.get(doc_id).cloned().unwrap_or_default();
        let mut merged = match serde_json::to_value(&existing)? {
            JsonValue::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        merged.extend(patch.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged.insert("id".to_string(), JsonValue::String(doc_id.to_string()));
        let updated: TeamDoc = serde_json::from_value(JsonValue::Object(merged))
            .map_err(|e| Error::InvalidInput(format!("team document patch: {e}")))?;
        docs.insert(doc_id.to_string(), updated);
        state.notify_team_docs(team_id);
        Ok(())
    }

    async fn delete_team_doc(&self, caller: &str, team_id: &str, doc_id: &str) -> Result<()> {
        Self::require_caller(caller)?;
        self.admit(RemoteOp::DeleteTeamDoc, caller, &format!("{team_id}/{doc_id}"), false)?;
        let mut state = self.inner.state.lock().await;
        state.require_member(caller, team_id)?;
        let removed = state
            .team_docs
            .get_mut(team_id)
            .and_then(|docs| docs.remove(doc_id))
            .is_some();
        if removed {
            state.notify_team_docs(team_id);
        }
        Ok(())
    }
}
