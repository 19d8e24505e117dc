//! Core traits for the planner storage abstractions.
//!
//! The local cache sits on a synchronous [`KeyValueStore`]; the remote side is
//! split into per-user notes ([`RemoteStore`]) and shared team workspaces
//! ([`TeamStore`]). Implementations live in `planner-store` and
//! `planner-remote`.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// LOCAL KEY-VALUE STORAGE
// =============================================================================

/// Synchronous string key-value storage backing the local cache.
///
/// Writes are visible to the next read. Every failure is a local storage
/// error and is never retried.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a key. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// All keys starting with `prefix`, in ascending order.
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

// =============================================================================
// LIVE FEEDS
// =============================================================================

/// Receiving half of a live remote subscription.
///
/// Yields the current state first, then every later state. Dropping the
/// receiver ends the subscription.
pub type RemoteFeed<T> = mpsc::UnboundedReceiver<Result<T>>;

/// Sending half of a [`RemoteFeed`].
pub type FeedSender<T> = mpsc::UnboundedSender<Result<T>>;

// =============================================================================
// REMOTE NOTES
// =============================================================================

/// Per-user remote note collection (`users/{uid}/notes/{id}`).
///
/// Save and delete are idempotent so queued operations can be replayed.
/// Transient failures surface as `Error::RemoteUnavailable`; permission
/// failures as `Error::Forbidden`.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Upsert a note document.
    async fn save_note(&self, user_id: &str, note_id: &str, note: &NoteDocument) -> Result<()>;

    /// Delete a note. Deleting an absent note succeeds.
    async fn delete_note(&self, user_id: &str, note_id: &str) -> Result<()>;

    /// Point read.
    async fn get_note(&self, user_id: &str, note_id: &str) -> Result<Option<NoteDocument>>;

    /// Up to `count` notes ordered by `updatedAt` descending.
    async fn list_recent(&self, user_id: &str, count: usize) -> Result<Vec<NoteDocument>>;

    /// Live feed of one note; `None` while it does not exist.
    async fn watch_note(
        &self,
        user_id: &str,
        note_id: &str,
    ) -> Result<RemoteFeed<Option<NoteDocument>>>;

    /// Live feed of the user's whole note collection.
    async fn watch_notes(&self, user_id: &str) -> Result<RemoteFeed<Vec<NoteDocument>>>;

    /// Check that the remote is reachable.
    async fn health_check(&self) -> Result<()>;
}

// =============================================================================
// TEAMS
// =============================================================================

/// Shared team workspaces (`teams/{teamId}`, `teams/{teamId}/docs/{docId}`).
///
/// `caller` is the signed-in user's id. Team metadata is readable by any
/// signed-in user so invitations can be resolved; documents are restricted to
/// members and return `Error::Forbidden` otherwise.
#[async_trait]
pub trait TeamStore: Send + Sync {
    /// Create a team whose only member is `caller`.
    async fn create_team(&self, caller: &str, name: &str) -> Result<Team>;

    /// Teams whose member list contains `uid`.
    async fn teams_for_member(&self, uid: &str) -> Result<Vec<Team>>;

    async fn get_team(&self, caller: &str, team_id: &str) -> Result<Option<Team>>;

    /// Append `caller` to the team's members and stamp `updatedAt`.
    async fn add_member(&self, caller: &str, team_id: &str) -> Result<Team>;

    /// Live feed of one team; `None` while it does not exist.
    async fn watch_team(&self, caller: &str, team_id: &str) -> Result<RemoteFeed<Option<Team>>>;

    /// Live feed of a team's documents ordered by `createdAt` descending.
    async fn watch_team_docs(
        &self,
        caller: &str,
        team_id: &str,
    ) -> Result<RemoteFeed<Vec<TeamDoc>>>;

    /// Create a document and return its id.
    async fn create_team_doc(&self, caller: &str, team_id: &str, doc: &NewTeamDoc)
        -> Result<String>;

    async fn get_team_doc(
        &self,
        caller: &str,
        team_id: &str,
        doc_id: &str,
    ) -> Result<Option<TeamDoc>>;

    /// Merge `patch` into the document, creating it if absent.
    async fn update_team_doc(
        &self,
        caller: &str,
        team_id: &str,
        doc_id: &str,
        patch: &TeamDocPatch,
    ) -> Result<()>;

    async fn delete_team_doc(&self, caller: &str, team_id: &str, doc_id: &str) -> Result<()>;
}
