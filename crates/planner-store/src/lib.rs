//! # planner-store
//!
//! Local note cache for the planner sync engine.
//!
//! [`LocalCache`] stores full note documents under `note_{id}` and per-day
//! summaries under `note_list_{date}` on top of any
//! [`KeyValueStore`](planner_core::KeyValueStore). Two backends are provided:
//! [`MemoryKv`] for tests and ephemeral sessions, and [`SqliteKv`] for durable
//! on-device storage.

pub mod cache;
pub mod kv;

pub use cache::LocalCache;
pub use kv::{MemoryKv, SqliteKv};
