//! JSON-over-HTTP remote document store.
//!
//! Routes:
//! - `/users/{uid}/notes[/{id}]` for per-user notes
//! - `/teams[/{id}[/members|/docs[/{doc}]]]` for team workspaces
//! - `/health`
//!
//! Live feeds poll the matching read endpoint and emit only when the result
//! changes.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use planner_core::defaults::{REMOTE_TIMEOUT_SECS, REMOTE_URL, SUBSCRIPTION_POLL_MS};
use planner_core::{
    Error, NewTeamDoc, NoteDocument, RemoteFeed, RemoteStore, Result, Team, TeamDoc,
    TeamDocPatch, TeamStore,
};

/// Configuration for [`HttpRemoteStore`].
#[derive(Debug, Clone)]
pub struct HttpRemoteConfig {
    /// Base URL, without trailing slash.
    pub base_url: String,
    /// Bearer token identifying the signed-in user.
    pub token: Option<String>,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
    /// Polling interval backing live feeds.
    pub poll_interval: Duration,
}

impl Default for HttpRemoteConfig {
    fn default() -> Self {
        Self {
            base_url: REMOTE_URL.to_string(),
            token: None,
            timeout_seconds: REMOTE_TIMEOUT_SECS,
            poll_interval: Duration::from_millis(SUBSCRIPTION_POLL_MS),
        }
    }
}

impl HttpRemoteConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

#[derive(Deserialize)]
struct CreatedResponse {
    id: String,
}

/// HTTP remote store client.
#[derive(Clone)]
pub struct HttpRemoteStore {
    client: Client,
    config: HttpRemoteConfig,
}

impl HttpRemoteStore {
    pub fn new(config: HttpRemoteConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = "remote",
            component = "http",
            url = %config.base_url,
            timeout_secs = config.timeout_seconds,
            "Initializing HTTP remote store"
        );

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &HttpRemoteConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match self.config.token {
            Some(ref token) => req.bearer_auth(token),
            None => req,
        }
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.authorize(self.client.get(self.url(path)))
    }

    async fn send(&self, req: RequestBuilder, what: &str) -> Result<Response> {
        let response = req
            .send()
            .await
            .map_err(|e| Error::RemoteUnavailable(format!("{what} request failed: {e}")))?;
        debug!(
            subsystem = "remote",
            component = "http",
            op = what,
            status = response.status().as_u16(),
            "Remote response"
        );
        Ok(response)
    }

    /// Send and require a 2xx status.
    async fn send_ok(&self, req: RequestBuilder, what: &str) -> Result<Response> {
        let response = self.send(req, what).await?;
        if !response.status().is_success() {
            return Err(status_error(response, what).await);
        }
        Ok(response)
    }

    /// Send a point read; 404 yields `None`.
    async fn read_optional<T: DeserializeOwned>(
        &self,
        req: RequestBuilder,
        what: &str,
    ) -> Result<Option<T>> {
        let response = self.send(req, what).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(status_error(response, what).await);
        }
        parse(response, what).await.map(Some)
    }

    /// Send a delete; 404 counts as already deleted.
    async fn delete(&self, path: &str, what: &str) -> Result<()> {
        let req = self.authorize(self.client.delete(self.url(path)));
        let response = self.send(req, what).await?;
        if response.status() == StatusCode::NOT_FOUND || response.status().is_success() {
            return Ok(());
        }
        Err(status_error(response, what).await)
    }
}

// =============================================================================
// PATHS
// =============================================================================

// Ids are caller-supplied; each one is a single percent-encoded segment.

fn notes_path(user_id: &str) -> String {
    format!("/users/{}/notes", urlencoding::encode(user_id))
}

fn note_path(user_id: &str, note_id: &str) -> String {
    format!("{}/{}", notes_path(user_id), urlencoding::encode(note_id))
}

fn team_path(team_id: &str) -> String {
    format!("/teams/{}", urlencoding::encode(team_id))
}

fn team_docs_path(team_id: &str) -> String {
    format!("{}/docs", team_path(team_id))
}

fn team_doc_path(team_id: &str, doc_id: &str) -> String {
    format!("{}/{}", team_docs_path(team_id), urlencoding::encode(doc_id))
}

async fn parse<T: DeserializeOwned>(response: Response, what: &str) -> Result<T> {
    response
        .json()
        .await
        .map_err(|e| Error::Internal(format!("Failed to parse {what} response: {e}")))
}

/// Map a non-success response to an error.
async fn status_error(response: Response, what: &str) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = if body.is_empty() {
        format!("{what} returned {status}")
    } else {
        format!("{what} returned {status}: {body}")
    };
    error_for_status(status, message)
}

fn error_for_status(status: StatusCode, message: String) -> Error {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Forbidden(message),
        StatusCode::NOT_FOUND => Error::NotFound(message),
        StatusCode::CONFLICT => Error::Conflict(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            Error::RemoteUnavailable(message)
        }
        s if s.is_server_error() => Error::RemoteUnavailable(message),
        _ => Error::InvalidInput(message),
    }
}

/// Poll `fetch` every `interval`, sending each distinct result.
///
/// An error is sent once per failure streak. The task ends when the receiver
/// is dropped.
fn spawn_poll_feed<T, F, Fut>(interval: Duration, feed: &'static str, fetch: F) -> RemoteFeed<T>
where
    T: PartialEq + Clone + Send + 'static,
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send,
{
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut last: Option<T> = None;
        let mut failing = false;
        loop {
            match fetch().await {
                Ok(value) => {
                    failing = false;
                    if last.as_ref() != Some(&value) {
                        if tx.send(Ok(value.clone())).is_err() {
                            break;
                        }
                        last = Some(value);
                    }
                }
                Err(e) => {
                    if !failing {
                        warn!(
                            subsystem = "remote",
                            component = "http",
                            feed,
                            error = %e,
                            "Feed poll failed"
                        );
                        if tx.send(Err(e)).is_err() {
                            break;
                        }
                        failing = true;
                    }
                }
            }

            tokio::select! {
                _ = tx.closed() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        debug!(subsystem = "remote", component = "http", feed, "Feed closed");
    });
    rx
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn save_note(&self, user_id: &str, note_id: &str, note: &NoteDocument) -> Result<()> {
        let req = self
            .authorize(self.client.put(self.url(&note_path(user_id, note_id))))
            .json(note);
        self.send_ok(req, "save note").await?;
        Ok(())
    }

    async fn delete_note(&self, user_id: &str, note_id: &str) -> Result<()> {
        self.delete(&note_path(user_id, note_id), "delete note")
            .await
    }

    async fn get_note(&self, user_id: &str, note_id: &str) -> Result<Option<NoteDocument>> {
        let req = self.get(&note_path(user_id, note_id));
        let note: Option<NoteDocument> = self.read_optional(req, "get note").await?;
        Ok(note.map(|mut n| {
            if n.id.is_empty() {
                n.id = note_id.to_string();
            }
            n
        }))
    }

    async fn list_recent(&self, user_id: &str, count: usize) -> Result<Vec<NoteDocument>> {
        let limit = count.to_string();
        let req = self.get(&notes_path(user_id)).query(&[
            ("orderBy", "updatedAt"),
            ("direction", "desc"),
            ("limit", limit.as_str()),
        ]);
        let response = self.send_ok(req, "list recent notes").await?;
        parse(response, "list recent notes").await
    }

    async fn watch_note(
        &self,
        user_id: &str,
        note_id: &str,
    ) -> Result<RemoteFeed<Option<NoteDocument>>> {
        let this = self.clone();
        let (uid, id) = (user_id.to_string(), note_id.to_string());
        Ok(spawn_poll_feed(self.config.poll_interval, "note", move || {
            let (this, uid, id) = (this.clone(), uid.clone(), id.clone());
            async move { this.get_note(&uid, &id).await }
        }))
    }

    async fn watch_notes(&self, user_id: &str) -> Result<RemoteFeed<Vec<NoteDocument>>> {
        let this = self.clone();
        let uid = user_id.to_string();
        Ok(spawn_poll_feed(self.config.poll_interval, "notes", move || {
            let (this, uid) = (this.clone(), uid.clone());
            async move {
                let req = this.get(&notes_path(&uid));
                let response = this.send_ok(req, "list notes").await?;
                parse(response, "list notes").await
            }
        }))
    }

    async fn health_check(&self) -> Result<()> {
        let req = self.get("/health").timeout(Duration::from_secs(5));
        self.send_ok(req, "health check").await?;
        Ok(())
    }
}

#[async_trait]
impl TeamStore for HttpRemoteStore {
    async fn create_team(&self, caller: &str, name: &str) -> Result<Team> {
        let req = self
            .authorize(self.client.post(self.url("/teams")))
            .json(&json!({ "name": name, "createdBy": caller }));
        let response = self.send_ok(req, "create team").await?;
        parse(response, "create team").await
    }

    async fn teams_for_member(&self, uid: &str) -> Result<Vec<Team>> {
        let req = self.get("/teams").query(&[("member", uid)]);
        let response = self.send_ok(req, "list teams").await?;
        parse(response, "list teams").await
    }

    async fn get_team(&self, _caller: &str, team_id: &str) -> Result<Option<Team>> {
        let req = self.get(&team_path(team_id));
        self.read_optional(req, "get team").await
    }

    async fn add_member(&self, caller: &str, team_id: &str) -> Result<Team> {
        let req = self
            .authorize(self.client.post(self.url(&format!("{}/members", team_path(team_id)))))
            .json(&json!({ "uid": caller }));
        let response = self.send_ok(req, "join team").await?;
        parse(response, "join team").await
    }

    async fn watch_team(&self, caller: &str, team_id: &str) -> Result<RemoteFeed<Option<Team>>> {
        let this = self.clone();
        let (caller, team_id) = (caller.to_string(), team_id.to_string());
        Ok(spawn_poll_feed(self.config.poll_interval, "team", move || {
            let (this, caller, team_id) = (this.clone(), caller.clone(), team_id.clone());
            async move { this.get_team(&caller, &team_id).await }
        }))
    }

    async fn watch_team_docs(
        &self,
        _caller: &str,
        team_id: &str,
    ) -> Result<RemoteFeed<Vec<TeamDoc>>> {
        let this = self.clone();
        let team_id = team_id.to_string();
        Ok(spawn_poll_feed(self.config.poll_interval, "team_docs", move || {
            let (this, team_id) = (this.clone(), team_id.clone());
            async move {
                let req = this
                    .get(&team_docs_path(&team_id))
                    .query(&[("orderBy", "createdAt"), ("direction", "desc")]);
                let response = this.send_ok(req, "list team docs").await?;
                parse(response, "list team docs").await
            }
        }))
    }

    async fn create_team_doc(
        &self,
        _caller: &str,
        team_id: &str,
        doc: &NewTeamDoc,
    ) -> Result<String> {
        let req = self
            .authorize(self.client.post(self.url(&team_docs_path(team_id))))
            .json(doc);
        let response = self.send_ok(req, "create team doc").await?;
        let created: CreatedResponse = parse(response, "create team doc").await?;
        Ok(created.id)
    }

    async fn get_team_doc(
        &self,
        _caller: &str,
        team_id: &str,
        doc_id: &str,
    ) -> Result<Option<TeamDoc>> {
        let req = self.get(&team_doc_path(team_id, doc_id));
        self.read_optional(req, "get team doc").await
    }

    async fn update_team_doc(
        &self,
        _caller: &str,
        team_id: &str,
        doc_id: &str,
        patch: &TeamDocPatch,
    ) -> Result<()> {
        let req = self
            .authorize(self.client.patch(self.url(&team_doc_path(team_id, doc_id))))
            .json(patch);
        self.send_ok(req, "save team doc").await?;
        Ok(())
    }

    async fn delete_team_doc(&self, _caller: &str, team_id: &str, doc_id: &str) -> Result<()> {
        self.delete(&team_doc_path(team_id, doc_id), "delete team doc")
            .await
    }
}
