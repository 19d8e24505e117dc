//! # planner-core
//!
//! Core types, traits, and abstractions for the planner sync engine.
//!
//! This crate provides the foundational data structures and trait definitions
//! that the local cache, remote clients, and sync orchestrator depend on.

pub mod defaults;
pub mod error;
pub mod events;
pub mod models;
pub mod note_id;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use events::{SyncEvent, SyncEventBus, SyncEventEnvelope};
pub use models::*;
pub use note_id::{default_title, extract_title};
pub use traits::*;
