use std::sync::Arc;

use planner_core::{KeyValueStore, NoteDocument};
use planner_store::{LocalCache, SqliteKv};
use serde_json::json;

fn fixture_note(id: &str, date: &str) -> NoteDocument {
    NoteDocument::new(id)
        .with_date(date)
        .with_title("Database modeling lab")
        .with_method("handwriting")
        .with_template("grid")
        .with_content(json!({"layers": [{"strokes": 12}]}))
        .with_updated_at("2025-10-03T09:30:00Z")
}

#[test]
fn notes_survive_reopening_the_database() {
    let temp = tempfile::tempdir().expect("tempdir");
    let db_path = temp.path().join("cache").join("planner.db");

    {
        let kv = SqliteKv::open(&db_path).expect("open sqlite");
        let cache = LocalCache::new(Arc::new(kv));
        cache
            .put("2025-10-03", &fixture_note("2025-10-03", "2025-10-03"))
            .expect("put");
    }

    let kv = SqliteKv::open(&db_path).expect("reopen sqlite");
    assert_eq!(kv.path(), db_path.as_path());
    let cache = LocalCache::new(Arc::new(kv));

    let loaded = cache.get("2025-10-03").expect("get").expect("stored note");
    assert_eq!(loaded, fixture_note("2025-10-03", "2025-10-03"));

    let entries = cache.list_by_date("2025-10-03").expect("list");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].template.as_deref(), Some("grid"));
}

#[test]
fn remove_is_immediately_visible() {
    let temp = tempfile::tempdir().expect("tempdir");
    let cache = LocalCache::new(Arc::new(
        SqliteKv::open(temp.path().join("planner.db")).expect("open sqlite"),
    ));

    cache
        .put("2025-10-03_1", &fixture_note("2025-10-03_1", "2025-10-03"))
        .expect("put");
    cache
        .remove("2025-10-03_1", Some("2025-10-03"))
        .expect("remove");

    assert!(cache.get("2025-10-03_1").expect("get").is_none());
    assert!(cache.list_by_date("2025-10-03").expect("list").is_empty());
}

#[test]
fn all_notes_ignores_index_and_queue_keys() {
    let temp = tempfile::tempdir().expect("tempdir");
    let kv = Arc::new(SqliteKv::open(temp.path().join("planner.db")).expect("open sqlite"));
    let cache = LocalCache::new(kv.clone());

    cache
        .put("2025-10-03", &fixture_note("2025-10-03", "2025-10-03"))
        .expect("put");
    kv.set("offline_sync_queue", "[]").expect("queue key");

    let notes = cache.all_notes().expect("all notes");
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].id, "2025-10-03");
}

#[test]
fn garbage_file_reports_local_storage_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let db_path = temp.path().join("planner.db");
    std::fs::write(&db_path, "not a sqlite database ".repeat(400)).expect("write garbage");

    let err = match SqliteKv::open(&db_path) {
        Ok(_) => panic!("garbage file should not open as a cache"),
        Err(err) => err,
    };
    assert!(matches!(err, planner_core::Error::LocalStorage(_)));
    assert!(err.to_string().contains("planner.db"));
}
