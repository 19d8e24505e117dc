//! Team workspaces: shared documents that live only on the remote.
//!
//! Team operations go straight to the [`TeamStore`]. They are never cached
//! locally or queued, so they fail while offline.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::{debug, error, info, warn};

use planner_core::{
    AuthUser, Error, JoinedTeam, NewTeamDoc, Result, Team, TeamDoc, TeamDocPatch, TeamStore,
};

use crate::session::AuthSession;
use crate::subscription::Subscription;

/// Team operations on behalf of the signed-in user.
#[derive(Clone)]
pub struct TeamWorkspace {
    store: Arc<dyn TeamStore>,
    session: AuthSession,
}

impl TeamWorkspace {
    pub fn new(store: Arc<dyn TeamStore>, session: AuthSession) -> Self {
        Self { store, session }
    }

    fn require_user(&self) -> Result<AuthUser> {
        self.session
            .current()
            .ok_or_else(|| Error::Unauthorized("sign-in required".to_string()))
    }

    /// Create a team with the current user as its first member.
    pub async fn create_team(&self, name: &str) -> Result<String> {
        let user = self.require_user()?;
        let team = self.store.create_team(&user.uid, name).await.map_err(|e| {
            error!(subsystem = "teams", op = "create_team", user_id = %user.uid, error = %e, "Team create failed");
            e
        })?;
        info!(subsystem = "teams", op = "create_team", team_id = %team.id, user_id = %user.uid, "Team created");
        Ok(team.id)
    }

    /// Teams the current user belongs to. Empty when signed out or when the
    /// listing fails.
    pub async fn user_teams(&self) -> Vec<Team> {
        let Some(uid) = self.session.uid() else {
            return Vec::new();
        };
        match self.store.teams_for_member(&uid).await {
            Ok(teams) => teams,
            Err(e) => {
                error!(subsystem = "teams", op = "user_teams", user_id = %uid, error = %e, "Get user teams failed");
                Vec::new()
            }
        }
    }

    /// Join a team by id.
    ///
    /// Fails with `NotFound` when the team does not exist and `Conflict` when
    /// the user is already a member.
    pub async fn join_team(&self, team_id: &str) -> Result<JoinedTeam> {
        let user = self.require_user()?;
        let team = self
            .store
            .get_team(&user.uid, team_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("team {team_id}")))?;
        if team.is_member(&user.uid) {
            return Err(Error::Conflict(format!(
                "already a member of team {team_id}"
            )));
        }

        let team = self.store.add_member(&user.uid, team_id).await.map_err(|e| {
            warn!(subsystem = "teams", op = "join_team", team_id, user_id = %user.uid, error = %e, "Team join failed");
            e
        })?;
        info!(subsystem = "teams", op = "join_team", team_id, user_id = %user.uid, "Joined team");
        Ok(JoinedTeam {
            team_id: team.id,
            team_name: team.name,
        })
    }

    /// Live updates of a team record; the callback gets `None` while the team
    /// does not exist.
    pub async fn subscribe_to_team<F>(&self, team_id: &str, callback: F) -> Subscription
    where
        F: Fn(Option<Team>) + Send + 'static,
    {
        let (Some(uid), false) = (self.session.uid(), team_id.is_empty()) else {
            return Subscription::inert();
        };
        match self.store.watch_team(&uid, team_id).await {
            Ok(feed) => Subscription::pump("team", feed, callback),
            Err(e) => {
                error!(subsystem = "teams", op = "subscribe_team", team_id, error = %e, "Team subscription failed");
                Subscription::inert()
            }
        }
    }

    /// Live list of a team's documents, newest `createdAt` first.
    pub async fn subscribe_to_team_docs<F>(&self, team_id: &str, callback: F) -> Subscription
    where
        F: Fn(Vec<TeamDoc>) + Send + 'static,
    {
        let (Some(uid), false) = (self.session.uid(), team_id.is_empty()) else {
            return Subscription::inert();
        };
        match self.store.watch_team_docs(&uid, team_id).await {
            Ok(feed) => Subscription::pump("team_docs", feed, callback),
            Err(e) => {
                error!(subsystem = "teams", op = "subscribe_team_docs", team_id, error = %e, "Team docs subscription failed");
                Subscription::inert()
            }
        }
    }

    /// Create a document authored by the current user, dated today.
    pub async fn create_team_doc(&self, team_id: &str, title: &str) -> Result<String> {
        let user = self.require_user()?;
        let doc = NewTeamDoc {
            title: title.to_string(),
            author: user.author_name(),
            author_id: user.uid.clone(),
            date: Utc::now().date_naive().to_string(),
        };
        let doc_id = self.store.create_team_doc(&user.uid, team_id, &doc).await?;
        debug!(subsystem = "teams", op = "create_doc", team_id, doc_id = %doc_id, "Team document created");
        Ok(doc_id)
    }

    /// Load a team document. `None` for an empty id or a missing document.
    pub async fn load_team_doc(&self, team_id: &str, doc_id: &str) -> Result<Option<TeamDoc>> {
        if team_id.is_empty() || doc_id.is_empty() {
            return Ok(None);
        }
        let user = self.require_user()?;
        self.store.get_team_doc(&user.uid, team_id, doc_id).await
    }

    /// Merge `patch` into a team document, stamping `updatedAt` and
    /// `updatedBy`.
    pub async fn save_team_doc(
        &self,
        team_id: &str,
        doc_id: &str,
        mut patch: TeamDocPatch,
    ) -> Result<()> {
        let user = self.require_user()?;
        patch.insert(
            "updatedAt".to_string(),
            JsonValue::String(Utc::now().to_rfc3339()),
        );
        patch.insert("updatedBy".to_string(), JsonValue::String(user.uid.clone()));

        self.store
            .update_team_doc(&user.uid, team_id, doc_id, &patch)
            .await
            .map_err(|e| {
                error!(subsystem = "teams", op = "save_doc", team_id, doc_id, error = %e, "Save team doc failed");
                e
            })
    }

    pub async fn delete_team_doc(&self, team_id: &str, doc_id: &str) -> Result<()> {
        let user = self.require_user()?;
        self.store
            .delete_team_doc(&user.uid, team_id, doc_id)
            .await
            .map_err(|e| {
                error!(subsystem = "teams", op = "delete_doc", team_id, doc_id, error = %e, "Delete team doc failed");
                e
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use planner_remote::MemoryRemoteStore;
    use serde_json::json;
    use std::sync::Mutex;

    fn workspace(remote: &MemoryRemoteStore, user: Option<AuthUser>) -> TeamWorkspace {
        let session = match user {
            Some(user) => AuthSession::signed_in(user),
            None => AuthSession::new(),
        };
        TeamWorkspace::new(Arc::new(remote.clone()), session)
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_signed_out_is_unauthorized() {
        let remote = MemoryRemoteStore::new();
        let teams = workspace(&remote, None);

        assert!(matches!(
            teams.create_team("Study").await.unwrap_err(),
            Error::Unauthorized(_)
        ));
        assert!(matches!(
            teams.join_team("t1").await.unwrap_err(),
            Error::Unauthorized(_)
        ));
        assert!(teams.user_teams().await.is_empty());
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn test_create_and_join() {
        let remote = MemoryRemoteStore::new();
        let owner = workspace(&remote, Some(AuthUser::new("u1")));
        let team_id = owner.create_team("Study").await.unwrap();

        let member = workspace(&remote, Some(AuthUser::new("u2")));
        let joined = member.join_team(&team_id).await.unwrap();
        assert_eq!(joined.team_name, "Study");
        assert_eq!(joined.team_id, team_id);

        let team = remote.team(&team_id).await.unwrap();
        assert_eq!(team.members, vec!["u1", "u2"]);
        assert!(team.updated_at.is_some());
        assert_eq!(member.user_teams().await.len(), 1);

        assert!(matches!(
            member.join_team(&team_id).await.unwrap_err(),
            Error::Conflict(_)
        ));
        assert!(matches!(
            member.join_team("missing").await.unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_user_teams_swallows_errors() {
        let remote = MemoryRemoteStore::new();
        let teams = workspace(&remote, Some(AuthUser::new("u1")));
        teams.create_team("Study").await.unwrap();
        remote.set_available(false);
        assert!(teams.user_teams().await.is_empty());
    }

    #[tokio::test]
    async fn test_team_doc_lifecycle() {
        let remote = MemoryRemoteStore::new();
        let teams = workspace(
            &remote,
            Some(AuthUser::new("u1").with_email("kim@example.com")),
        );
        let team_id = teams.create_team("Study").await.unwrap();

        let doc_id = teams.create_team_doc(&team_id, "Plan").await.unwrap();
        let doc = teams.load_team_doc(&team_id, &doc_id).await.unwrap().unwrap();
        assert_eq!(doc.author, "kim");
        assert_eq!(doc.author_id, "u1");
        assert_eq!(doc.date, Some(Utc::now().date_naive().to_string()));

        let mut patch = TeamDocPatch::new();
        patch.insert("content".to_string(), json!({"html": "<p>hi</p>"}));
        teams.save_team_doc(&team_id, &doc_id, patch).await.unwrap();

        let doc = teams.load_team_doc(&team_id, &doc_id).await.unwrap().unwrap();
        assert_eq!(doc.title, "Plan");
        assert_eq!(doc.updated_by.as_deref(), Some("u1"));
        assert!(doc.updated_at.is_some());
        assert!(doc.content.is_some());

        teams.delete_team_doc(&team_id, &doc_id).await.unwrap();
        assert!(teams.load_team_doc(&team_id, &doc_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_non_member_is_forbidden() {
        let remote = MemoryRemoteStore::new();
        let owner = workspace(&remote, Some(AuthUser::new("u1")));
        let team_id = owner.create_team("Study").await.unwrap();

        let outsider = workspace(&remote, Some(AuthUser::new("u9")));
        assert!(matches!(
            outsider.create_team_doc(&team_id, "x").await.unwrap_err(),
            Error::Forbidden(_)
        ));
    }

    #[tokio::test]
    async fn test_empty_ids_short_circuit() {
        let remote = MemoryRemoteStore::new();
        let teams = workspace(&remote, Some(AuthUser::new("u1")));

        assert!(!teams.subscribe_to_team("", |_| {}).await.is_active());
        assert!(!teams.subscribe_to_team_docs("", |_| {}).await.is_active());
        assert!(teams.load_team_doc("", "d").await.unwrap().is_none());
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_to_team_docs_delivers_updates() {
        let remote = MemoryRemoteStore::new();
        let teams = workspace(&remote, Some(AuthUser::new("u1")));
        let team_id = teams.create_team("Study").await.unwrap();

        let titles = Arc::new(Mutex::new(Vec::new()));
        let sink = titles.clone();
        let _sub = teams
            .subscribe_to_team_docs(&team_id, move |docs| {
                let names: Vec<String> = docs.into_iter().map(|d| d.title).collect();
                sink.lock().unwrap().push(names);
            })
            .await;

        teams.create_team_doc(&team_id, "First").await.unwrap();
        settle().await;

        let seen = titles.lock().unwrap();
        assert_eq!(seen.first(), Some(&Vec::<String>::new()));
        assert_eq!(seen.last(), Some(&vec!["First".to_string()]));
    }

    #[tokio::test]
    async fn test_subscribe_to_team_sees_new_member() {
        let remote = MemoryRemoteStore::new();
        let owner = workspace(&remote, Some(AuthUser::new("u1")));
        let team_id = owner.create_team("Study").await.unwrap();

        let sizes = Arc::new(Mutex::new(Vec::new()));
        let sink = sizes.clone();
        let _sub = owner
            .subscribe_to_team(&team_id, move |team| {
                sink.lock().unwrap().push(team.map(|t| t.members.len()));
            })
            .await;

        workspace(&remote, Some(AuthUser::new("u2")))
            .join_team(&team_id)
            .await
            .unwrap();
        settle().await;

        assert_eq!(*sizes.lock().unwrap(), vec![Some(1), Some(2)]);
    }
}
