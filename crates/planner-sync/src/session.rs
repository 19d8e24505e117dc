//! Signed-in user state.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use planner_core::AuthUser;

/// The nullable current user, observable through a watch channel.
///
/// Clones share the same state.
#[derive(Clone)]
pub struct AuthSession {
    tx: Arc<watch::Sender<Option<AuthUser>>>,
}

impl Default for AuthSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthSession {
    /// A session with nobody signed in.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// A session with `user` already signed in.
    pub fn signed_in(user: AuthUser) -> Self {
        let (tx, _) = watch::channel(Some(user));
        Self { tx: Arc::new(tx) }
    }

    /// Set the current user. Returns `true` when this is a login, i.e. nobody
    /// was signed in before.
    pub fn sign_in(&self, user: AuthUser) -> bool {
        let uid = user.uid.clone();
        let previous = self.tx.send_replace(Some(user));
        let is_login = previous.is_none();
        info!(subsystem = "auth", user_id = %uid, is_login, "User signed in");
        is_login
    }

    pub fn sign_out(&self) {
        if self.tx.send_replace(None).is_some() {
            info!(subsystem = "auth", "User signed out");
        }
    }

    pub fn current(&self) -> Option<AuthUser> {
        self.tx.borrow().clone()
    }

    pub fn uid(&self) -> Option<String> {
        self.tx.borrow().as_ref().map(|u| u.uid.clone())
    }

    pub fn is_signed_in(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Observe user changes.
    pub fn subscribe(&self) -> watch::Receiver<Option<AuthUser>> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_in_reports_login_transition() {
        let session = AuthSession::new();
        assert!(!session.is_signed_in());

        assert!(session.sign_in(AuthUser::new("u1")));
        assert!(!session.sign_in(AuthUser::new("u1").with_display_name("Kim")));
        assert_eq!(session.uid().as_deref(), Some("u1"));
        assert_eq!(
            session.current().unwrap().display_name.as_deref(),
            Some("Kim")
        );

        session.sign_out();
        assert!(session.uid().is_none());
        assert!(session.sign_in(AuthUser::new("u2")));
    }

    #[test]
    fn test_clones_share_state() {
        let session = AuthSession::new();
        let other = session.clone();
        session.sign_in(AuthUser::new("u1"));
        assert_eq!(other.uid().as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn test_subscribers_observe_changes() {
        let session = AuthSession::signed_in(AuthUser::new("u1"));
        let mut rx = session.subscribe();
        session.sign_out();
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_none());
    }
}
