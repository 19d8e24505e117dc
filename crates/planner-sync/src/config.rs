//! Sync configuration.

use std::path::PathBuf;
use std::time::Duration;

use planner_core::defaults;

/// Configuration for the sync layer and the `planner` binary.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Interval between background drain passes while online.
    pub drain_interval_secs: u64,
    /// Polling interval backing HTTP live feeds (milliseconds).
    pub subscription_poll_ms: u64,
    /// Remote store base URL.
    pub remote_url: String,
    /// Bearer token for the remote store.
    pub remote_token: Option<String>,
    /// Remote request timeout in seconds.
    pub remote_timeout_secs: u64,
    /// SQLite local cache path.
    pub db_path: PathBuf,
    /// Signed-in user, if any.
    pub user_id: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            drain_interval_secs: defaults::DRAIN_INTERVAL_SECS,
            subscription_poll_ms: defaults::SUBSCRIPTION_POLL_MS,
            remote_url: defaults::REMOTE_URL.to_string(),
            remote_token: None,
            remote_timeout_secs: defaults::REMOTE_TIMEOUT_SECS,
            db_path: PathBuf::from(defaults::DB_PATH),
            user_id: None,
        }
    }
}

impl SyncConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `PLANNER_DRAIN_INTERVAL_SECS` | `30` | Periodic drain interval |
    /// | `PLANNER_SUBSCRIPTION_POLL_MS` | `5000` | HTTP feed polling interval |
    /// | `PLANNER_REMOTE_URL` | `http://127.0.0.1:8080` | Remote base URL |
    /// | `PLANNER_REMOTE_TOKEN` | (none) | Bearer token |
    /// | `PLANNER_REMOTE_TIMEOUT_SECS` | `30` | Request timeout |
    /// | `PLANNER_DB_PATH` | `planner.db` | SQLite local cache |
    /// | `PLANNER_USER_ID` | (none) | Signed-in user |
    pub fn from_env() -> Self {
        let drain_interval_secs = std::env::var("PLANNER_DRAIN_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::DRAIN_INTERVAL_SECS)
            .max(1);

        let subscription_poll_ms = std::env::var("PLANNER_SUBSCRIPTION_POLL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::SUBSCRIPTION_POLL_MS)
            .max(1);

        let remote_url = std::env::var("PLANNER_REMOTE_URL")
            .unwrap_or_else(|_| defaults::REMOTE_URL.to_string());

        let remote_token = std::env::var("PLANNER_REMOTE_TOKEN")
            .ok()
            .filter(|v| !v.is_empty());

        let remote_timeout_secs = std::env::var("PLANNER_REMOTE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::REMOTE_TIMEOUT_SECS);

        let db_path = std::env::var("PLANNER_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(defaults::DB_PATH));

        let user_id = std::env::var("PLANNER_USER_ID")
            .ok()
            .filter(|v| !v.is_empty());

        Self {
            drain_interval_secs,
            subscription_poll_ms,
            remote_url,
            remote_token,
            remote_timeout_secs,
            db_path,
            user_id,
        }
    }

    pub fn with_drain_interval(mut self, secs: u64) -> Self {
        self.drain_interval_secs = secs;
        self
    }

    pub fn with_subscription_poll(mut self, ms: u64) -> Self {
        self.subscription_poll_ms = ms;
        self
    }

    pub fn with_remote_url(mut self, url: impl Into<String>) -> Self {
        self.remote_url = url.into();
        self
    }

    pub fn with_remote_token(mut self, token: impl Into<String>) -> Self {
        self.remote_token = Some(token.into());
        self
    }

    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Drain timer period, never below one second.
    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.drain_interval_secs.max(1))
    }

    /// Feed polling period, never below one millisecond.
    pub fn subscription_poll_interval(&self) -> Duration {
        Duration::from_millis(self.subscription_poll_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.drain_interval_secs, 30);
        assert_eq!(config.subscription_poll_ms, 5_000);
        assert_eq!(config.remote_url, "http://127.0.0.1:8080");
        assert_eq!(config.db_path, PathBuf::from("planner.db"));
        assert!(config.remote_token.is_none());
        assert!(config.user_id.is_none());
    }

    #[test]
    fn test_builder_pattern() {
        let config = SyncConfig::default()
            .with_drain_interval(5)
            .with_subscription_poll(250)
            .with_remote_url("http://remote:9000")
            .with_remote_token("tok")
            .with_db_path("/tmp/p.db")
            .with_user_id("u1");

        assert_eq!(config.drain_interval(), Duration::from_secs(5));
        assert_eq!(config.subscription_poll_interval(), Duration::from_millis(250));
        assert_eq!(config.remote_url, "http://remote:9000");
        assert_eq!(config.remote_token.as_deref(), Some("tok"));
        assert_eq!(config.db_path, PathBuf::from("/tmp/p.db"));
        assert_eq!(config.user_id.as_deref(), Some("u1"));
    }

    #[test]
    fn test_zero_intervals_are_clamped() {
        let config = SyncConfig::default()
            .with_drain_interval(0)
            .with_subscription_poll(0);

        assert_eq!(config.drain_interval(), Duration::from_secs(1));
        assert_eq!(config.subscription_poll_interval(), Duration::from_millis(1));
    }
}
