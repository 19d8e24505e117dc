//! # planner-sync
//!
//! Local-first synchronisation for planner notes.
//!
//! Every write lands in the [`LocalCache`](planner_store::LocalCache) first.
//! When a user is signed in and the device is online the write is forwarded
//! to the remote store; otherwise, or when the remote is unreachable, it is
//! appended to the [`OfflineQueue`] and replayed in order once connectivity
//! returns.
//!
//! - [`SyncOrchestrator`]: the entry point for note operations, connectivity
//!   events, login merge, and live subscriptions
//! - [`OfflineQueue`]: durable FIFO of deferred remote writes
//! - [`AuthSession`]: the nullable signed-in user
//! - [`TeamWorkspace`]: shared team documents (remote only)

pub mod config;
pub mod connectivity;
pub mod orchestrator;
pub mod queue;
pub mod session;
pub mod subscription;
pub mod teams;

pub use config::SyncConfig;
pub use connectivity::DrainTimer;
pub use orchestrator::{MergeReport, SyncOrchestrator};
pub use queue::{DrainOutcome, OfflineQueue};
pub use session::AuthSession;
pub use subscription::Subscription;
pub use teams::TeamWorkspace;
