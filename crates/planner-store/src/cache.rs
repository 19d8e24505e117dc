//! Local note cache.
//!
//! Key layout:
//! - `note_{id}`: full [`NoteDocument`] as JSON
//! - `note_list_{date}`: JSON array of [`DayIndexEntry`] for that day
//!
//! Every call goes straight to the backing store; nothing is buffered.

use std::sync::Arc;

use tracing::{debug, error, warn};

use planner_core::defaults::{DAY_INDEX_KEY_PREFIX, NOTE_KEY_PREFIX};
use planner_core::{sort_newest_first, DayIndexEntry, KeyValueStore, NoteDocument, Result};

/// Synchronous local cache of note documents and per-day indexes.
#[derive(Clone)]
pub struct LocalCache {
    kv: Arc<dyn KeyValueStore>,
}

impl LocalCache {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// The underlying key-value store, shared with the offline queue.
    pub fn store(&self) -> Arc<dyn KeyValueStore> {
        Arc::clone(&self.kv)
    }

    /// Store a note and, when it has a date, upsert its day index entry.
    pub fn put(&self, note_id: &str, note: &NoteDocument) -> Result<()> {
        self.write_document(note_id, note)?;

        if let Some(mut entry) = note.day_entry() {
            entry.id = note_id.to_string();
            let key = day_key(&entry.date);
            let mut entries = self.read_day(&entry.date)?;
            match entries.iter_mut().find(|e| e.id == note_id) {
                Some(existing) => *existing = entry,
                None => entries.push(entry),
            }
            self.write_json(&key, &entries)?;
        }

        debug!(subsystem = "store", component = "cache", op = "put", note_id, "Note cached");
        Ok(())
    }

    /// Stored note, or `None`.
    pub fn get(&self, note_id: &str) -> Result<Option<NoteDocument>> {
        let Some(raw) = self.kv.get(&note_key(note_id))? else {
            return Ok(None);
        };
        let mut note: NoteDocument = serde_json::from_str(&raw)?;
        if note.id.is_empty() {
            note.id = note_id.to_string();
        }
        Ok(Some(note))
    }

    /// Delete a note and, when `date` is given, its entry in that day's index.
    pub fn remove(&self, note_id: &str, date: Option<&str>) -> Result<()> {
        self.kv.remove(&note_key(note_id)).inspect_err(|e| {
            error!(subsystem = "store", component = "cache", op = "remove", note_id, error = %e, "Local remove failed");
        })?;

        if let Some(date) = date {
            let mut entries = self.read_day(date)?;
            let before = entries.len();
            entries.retain(|e| e.id != note_id);
            if entries.len() != before {
                self.write_json(&day_key(date), &entries)?;
            }
        }

        debug!(subsystem = "store", component = "cache", op = "remove", note_id, "Note removed");
        Ok(())
    }

    /// Index entries for `date`, or empty.
    pub fn list_by_date(&self, date: &str) -> Result<Vec<DayIndexEntry>> {
        self.read_day(date)
    }

    /// Every stored note document. Entries that fail to parse are skipped.
    pub fn all_notes(&self) -> Result<Vec<NoteDocument>> {
        let mut notes = Vec::new();
        for key in self.kv.keys_with_prefix(NOTE_KEY_PREFIX)? {
            if key.starts_with(DAY_INDEX_KEY_PREFIX) {
                continue;
            }
            let note_id = &key[NOTE_KEY_PREFIX.len()..];
            match self.get(note_id) {
                Ok(Some(note)) => notes.push(note),
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        subsystem = "store",
                        component = "cache",
                        note_id,
                        error = %e,
                        "Skipping unreadable local note"
                    );
                }
            }
        }
        Ok(notes)
    }

    /// Up to `count` notes carrying `updatedAt`, newest first.
    pub fn recent_notes(&self, count: usize) -> Result<Vec<NoteDocument>> {
        let mut notes: Vec<NoteDocument> = self
            .all_notes()?
            .into_iter()
            .filter(|n| n.updated_at.is_some())
            .collect();
        sort_newest_first(&mut notes);
        notes.truncate(count);
        Ok(notes)
    }

    /// Store a document received from the remote. Only `note_{id}` is written;
    /// day indexes are maintained by [`LocalCache::put`].
    pub fn cache_remote(&self, note_id: &str, note: &NoteDocument) -> Result<()> {
        self.write_document(note_id, note)?;
        debug!(subsystem = "store", component = "cache", op = "cache_remote", note_id, "Remote note cached");
        Ok(())
    }

    fn write_document(&self, note_id: &str, note: &NoteDocument) -> Result<()> {
        self.write_json(&note_key(note_id), note)
    }

    fn read_day(&self, date: &str) -> Result<Vec<DayIndexEntry>> {
        match self.kv.get(&day_key(date))? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(entries) => Ok(entries),
                Err(e) => {
                    warn!(
                        subsystem = "store",
                        component = "cache",
                        date,
                        error = %e,
                        "Day index unreadable, rebuilding from empty"
                    );
                    Ok(Vec::new())
                }
            },
            None => Ok(Vec::new()),
        }
    }

    fn write_json<T: serde::Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.kv.set(key, &raw).inspect_err(|e| {
            error!(subsystem = "store", component = "cache", key, error = %e, "Local write failed");
        })
    }
}

fn note_key(note_id: &str) -> String {
    format!("{NOTE_KEY_PREFIX}{note_id}")
}

fn day_key(date: &str) -> String {
    format!("{DAY_INDEX_KEY_PREFIX}{date}")
}
