//! Live subscription handles.

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use planner_core::RemoteFeed;

/// Handle to a live remote subscription.
///
/// Updates are pumped from the remote feed by a background task. Calling
/// [`unsubscribe`](Subscription::unsubscribe) or dropping the handle stops
/// the task and closes the feed.
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// A handle that delivers nothing, used when nobody is signed in.
    pub fn inert() -> Self {
        Self { task: None }
    }

    /// Spawn a pump that passes every feed item to `on_item`, in order.
    /// Feed errors are logged and skipped.
    pub fn pump<T, F>(label: &'static str, mut feed: RemoteFeed<T>, mut on_item: F) -> Self
    where
        T: Send + 'static,
        F: FnMut(T) + Send + 'static,
    {
        let task = tokio::spawn(async move {
            while let Some(item) = feed.recv().await {
                match item {
                    Ok(value) => on_item(value),
                    Err(e) => {
                        warn!(
                            subsystem = "sync",
                            component = "subscription",
                            feed = label,
                            error = %e,
                            "Subscription update failed"
                        );
                    }
                }
            }
            debug!(subsystem = "sync", component = "subscription", feed = label, "Feed ended");
        });
        Self { task: Some(task) }
    }

    pub fn unsubscribe(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Whether updates may still arrive.
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
