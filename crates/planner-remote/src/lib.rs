//! # planner-remote
//!
//! Remote document store clients implementing
//! [`RemoteStore`](planner_core::RemoteStore) and
//! [`TeamStore`](planner_core::TeamStore).
//!
//! - [`MemoryRemoteStore`]: in-process multi-tenant store with live feeds,
//!   fault injection, and a call log. Used by tests and offline demos.
//! - [`HttpRemoteStore`]: JSON-over-HTTP client with polling feeds.

pub mod http;
pub mod memory;

pub use http::{HttpRemoteConfig, HttpRemoteStore};
pub use memory::{MemoryRemoteStore, RemoteCall, RemoteOp};
