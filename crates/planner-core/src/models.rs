//! Document model shared by the local cache, remote clients, and sync layer.
//!
//! Field names serialize in camelCase (`updatedAt`, `noteId`) so persisted
//! local state and remote documents keep one layout.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

// =============================================================================
// NOTES
// =============================================================================

/// A note as stored locally and remotely.
///
/// `content` is an opaque payload (rich-text markup or a drawing-layer
/// snapshot) and is never interpreted. Unknown fields round-trip through
/// `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteDocument {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "JsonValue::is_null")]
    pub content: JsonValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl NoteDocument {
    /// Create an empty note with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_content(mut self, content: JsonValue) -> Self {
        self.content = content;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn with_updated_at(mut self, updated_at: impl Into<String>) -> Self {
        self.updated_at = Some(updated_at.into());
        self
    }

    /// Stamp `updatedAt` with the current time.
    pub fn touch(&mut self) {
        self.updated_at = Some(Utc::now().to_rfc3339());
    }

    /// Summary projection stored in the day index, if the note has a date.
    pub fn day_entry(&self) -> Option<DayIndexEntry> {
        let date = self.date.clone().filter(|d| !d.is_empty())?;
        Some(DayIndexEntry {
            id: self.id.clone(),
            date,
            title: self.title.clone(),
            method: self.method.clone(),
            template: self.template.clone(),
            category: self.category.clone(),
            updated_at: self.updated_at.clone(),
        })
    }
}

/// Per-day summary of a note for listing without loading full documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayIndexEntry {
    pub id: String,
    pub date: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// Orders two `updatedAt` values newest first.
///
/// RFC 3339 timestamps compare chronologically. Anything else falls back to
/// a lexicographic comparison, and a missing timestamp sorts last.
pub fn newest_first(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => {
            let parsed_a = DateTime::parse_from_rfc3339(a).ok();
            let parsed_b = DateTime::parse_from_rfc3339(b).ok();
            match (parsed_a, parsed_b) {
                (Some(pa), Some(pb)) => pb.cmp(&pa),
                _ => b.cmp(a),
            }
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Sort notes newest first by `updatedAt`.
pub fn sort_newest_first(notes: &mut [NoteDocument]) {
    notes.sort_by(|a, b| newest_first(a.updated_at.as_deref(), b.updated_at.as_deref()));
}

// =============================================================================
// OFFLINE QUEUE
// =============================================================================

/// A remote write deferred until connectivity returns.
///
/// Serialized as `{"type": "save"|"delete", "noteId": ..., "data"?: ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PendingOp {
    Save {
        #[serde(rename = "noteId")]
        note_id: String,
        data: NoteDocument,
    },
    Delete {
        #[serde(rename = "noteId")]
        note_id: String,
    },
}

impl PendingOp {
    pub fn save(note_id: impl Into<String>, data: NoteDocument) -> Self {
        PendingOp::Save {
            note_id: note_id.into(),
            data,
        }
    }

    pub fn delete(note_id: impl Into<String>) -> Self {
        PendingOp::Delete {
            note_id: note_id.into(),
        }
    }

    pub fn note_id(&self) -> &str {
        match self {
            PendingOp::Save { note_id, .. } | PendingOp::Delete { note_id } => note_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PendingOp::Save { .. } => "save",
            PendingOp::Delete { .. } => "delete",
        }
    }
}

/// One persisted offline queue entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    #[serde(flatten)]
    pub op: PendingOp,
    /// Enqueue time (RFC 3339). Diagnostics only.
    pub timestamp: String,
}

impl QueueEntry {
    /// Wrap an operation, stamping the current time.
    pub fn now(op: PendingOp) -> Self {
        Self {
            op,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

// =============================================================================
// AUTH
// =============================================================================

/// The signed-in user as reported by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl AuthUser {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            display_name: None,
            email: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Name recorded as the author of team documents: the display name, else
    /// the local part of the email address.
    pub fn author_name(&self) -> String {
        if let Some(name) = self.display_name.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        self.email
            .as_deref()
            .and_then(|email| email.split('@').next())
            .filter(|local| !local.is_empty())
            .unwrap_or("unknown")
            .to_string()
    }
}

// =============================================================================
// TEAMS
// =============================================================================

/// A shared team workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub members: Vec<String>,
    pub created_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl Team {
    pub fn is_member(&self, uid: &str) -> bool {
        self.members.iter().any(|m| m == uid)
    }
}

/// A document inside a team workspace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamDoc {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub author_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

/// Request for creating a team document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTeamDoc {
    pub title: String,
    pub author: String,
    pub author_id: String,
    pub date: String,
}

/// Fields merged into an existing team document.
pub type TeamDocPatch = Map<String, JsonValue>;

/// Result of joining a team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedTeam {
    pub team_id: String,
    pub team_name: String,
}

// =============================================================================
// STATUS
// =============================================================================

/// Snapshot of the sync layer for a status indicator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub online: bool,
    pub syncing: bool,
    pub signed_in: bool,
    pub pending: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_note_serializes_camel_case() {
        let note = NoteDocument::new("2025-10-06")
            .with_date("2025-10-06")
            .with_title("X")
            .with_updated_at("2025-10-06T10:00:00Z");
        let value = serde_json::to_value(&note).unwrap();
        assert_eq!(value["updatedAt"], "2025-10-06T10:00:00Z");
        assert!(value.get("updated_at").is_none());
        assert!(value.get("content").is_none());
    }

    #[test]
    fn test_note_preserves_unknown_fields() {
        let raw = json!({
            "id": "n1",
            "title": "Lecture",
            "content": {"layers": [1, 2]},
            "pinned": true,
            "color": "#ff0000"
        });
        let note: NoteDocument = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(note.extra.get("pinned"), Some(&json!(true)));
        assert_eq!(serde_json::to_value(&note).unwrap(), raw);
    }

    #[test]
    fn test_note_without_id_parses() {
        let note: NoteDocument = serde_json::from_value(json!({"title": "t"})).unwrap();
        assert!(note.id.is_empty());
    }

    #[test]
    fn test_day_entry_requires_date() {
        let undated = NoteDocument::new("free").with_title("scratch");
        assert!(undated.day_entry().is_none());

        let blank = NoteDocument::new("free").with_date("").with_title("scratch");
        assert!(blank.day_entry().is_none());

        let dated = NoteDocument::new("2025-10-06_1")
            .with_date("2025-10-06")
            .with_title("Algorithms")
            .with_method("text")
            .with_template("meeting")
            .with_category("major")
            .with_updated_at("t1");
        let entry = dated.day_entry().unwrap();
        assert_eq!(entry.id, "2025-10-06_1");
        assert_eq!(entry.date, "2025-10-06");
        assert_eq!(entry.title, "Algorithms");
        assert_eq!(entry.method.as_deref(), Some("text"));
        assert_eq!(entry.template.as_deref(), Some("meeting"));
        assert_eq!(entry.category.as_deref(), Some("major"));
        assert_eq!(entry.updated_at.as_deref(), Some("t1"));
    }

    #[test]
    fn test_newest_first_parses_rfc3339() {
        // Offsets make the lexicographic order disagree with the chronological one.
        let earlier = "2025-10-06T12:00:00+09:00";
        let later = "2025-10-06T04:00:00+00:00";
        assert_eq!(newest_first(Some(later), Some(earlier)), Ordering::Less);
        assert_eq!(newest_first(Some(earlier), Some(later)), Ordering::Greater);
    }

    #[test]
    fn test_newest_first_missing_sorts_last() {
        assert_eq!(newest_first(Some("t1"), None), Ordering::Less);
        assert_eq!(newest_first(None, Some("t1")), Ordering::Greater);
        assert_eq!(newest_first(Some("t2"), Some("t1")), Ordering::Less);
    }

    #[test]
    fn test_pending_op_wire_format() {
        let entry = QueueEntry {
            op: PendingOp::delete("n1"),
            timestamp: "2025-10-06T00:00:00Z".to_string(),
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            value,
            json!({"type": "delete", "noteId": "n1", "timestamp": "2025-10-06T00:00:00Z"})
        );

        let save = QueueEntry {
            op: PendingOp::save("n2", NoteDocument::new("n2").with_title("X")),
            timestamp: "ts".to_string(),
        };
        let value = serde_json::to_value(&save).unwrap();
        assert_eq!(value["type"], "save");
        assert_eq!(value["noteId"], "n2");
        assert_eq!(value["data"]["title"], "X");

        let parsed: QueueEntry = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, save);
    }

    #[test]
    fn test_pending_op_accessors() {
        let op = PendingOp::save("a", NoteDocument::new("a"));
        assert_eq!(op.note_id(), "a");
        assert_eq!(op.kind(), "save");
        assert_eq!(PendingOp::delete("b").kind(), "delete");
    }

    #[test]
    fn test_author_name_fallbacks() {
        let named = AuthUser::new("u1").with_display_name("Kim");
        assert_eq!(named.author_name(), "Kim");

        let email_only = AuthUser::new("u2").with_email("lee@school.ac.kr");
        assert_eq!(email_only.author_name(), "lee");

        assert_eq!(AuthUser::new("u3").author_name(), "unknown");
    }

    #[test]
    fn test_team_membership() {
        let team = Team {
            id: "t1".into(),
            name: "Capstone".into(),
            members: vec!["u1".into()],
            created_by: "u1".into(),
            created_at: None,
            updated_at: None,
        };
        assert!(team.is_member("u1"));
        assert!(!team.is_member("u2"));
    }
}
