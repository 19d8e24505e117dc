//! Centralized default constants for the planner sync engine.
//!
//! All crates reference these constants instead of defining their own magic
//! numbers. Organized by domain area.

// =============================================================================
// LOCAL STORAGE KEYS
// =============================================================================

/// Key prefix for full note documents: `note_{id}`.
pub const NOTE_KEY_PREFIX: &str = "note_";

/// Key prefix for per-day index lists: `note_list_{date}`.
///
/// Shares the `note_` prefix, so note enumeration must exclude it explicitly.
pub const DAY_INDEX_KEY_PREFIX: &str = "note_list_";

/// Key holding the serialized offline queue.
pub const OFFLINE_QUEUE_KEY: &str = "offline_sync_queue";

/// Key receiving the raw queue value when it no longer parses.
pub const OFFLINE_QUEUE_BACKUP_KEY: &str = "offline_sync_queue.corrupt";

// =============================================================================
// SYNC
// =============================================================================

/// Interval between background drain passes while online (seconds).
pub const DRAIN_INTERVAL_SECS: u64 = 30;

/// Number of notes returned by the recent-notes listing when unspecified.
pub const RECENT_NOTES_COUNT: usize = 5;

/// Default sync event bus broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// REMOTE
// =============================================================================

/// Default HTTP remote base URL.
pub const REMOTE_URL: &str = "http://127.0.0.1:8080";

/// Timeout for HTTP remote requests in seconds.
pub const REMOTE_TIMEOUT_SECS: u64 = 30;

/// Polling interval backing HTTP live subscriptions (milliseconds).
pub const SUBSCRIPTION_POLL_MS: u64 = 5_000;

// =============================================================================
// LOCAL CACHE
// =============================================================================

/// Default SQLite database path for the local cache.
pub const DB_PATH: &str = "planner.db";

/// SQLite busy timeout in milliseconds.
pub const SQLITE_BUSY_TIMEOUT_MS: u64 = 5_000;

// =============================================================================
// TITLES
// =============================================================================

/// Maximum characters kept when extracting a title from note content.
pub const TITLE_MAX_CHARS: usize = 60;

/// Title used when neither content nor date yields one.
pub const UNTITLED: &str = "Untitled";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_index_prefix_shares_note_prefix() {
        assert!(DAY_INDEX_KEY_PREFIX.starts_with(NOTE_KEY_PREFIX));
        assert!(!OFFLINE_QUEUE_KEY.starts_with(NOTE_KEY_PREFIX));
        assert!(!OFFLINE_QUEUE_BACKUP_KEY.starts_with(NOTE_KEY_PREFIX));
    }

    #[test]
    fn drain_interval_is_thirty_seconds() {
        assert_eq!(DRAIN_INTERVAL_SECS, 30);
    }
}
