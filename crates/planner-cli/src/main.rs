//! planner: command-line driver for the local-first note sync engine.
//!
//! Every command runs against the SQLite local cache and, when reachable, the
//! HTTP remote store. Results are printed as JSON on stdout; logs go to
//! stderr (or `LOG_FILE`).

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use planner_core::defaults::RECENT_NOTES_COUNT;
use planner_core::{
    default_title, extract_title, note_id, AuthUser, NoteDocument, RemoteStore, TeamDocPatch,
};
use planner_remote::{HttpRemoteConfig, HttpRemoteStore};
use planner_store::{LocalCache, SqliteKv};
use planner_sync::{AuthSession, SyncConfig, SyncOrchestrator, TeamWorkspace};

#[derive(Parser)]
#[command(name = "planner")]
#[command(author, version, about = "Local-first study planner notes with offline sync")]
#[command(propagate_version = true)]
struct Cli {
    /// Treat the device as offline; remote writes are queued
    #[arg(long, global = true)]
    offline: bool,

    /// Act as this user (overrides PLANNER_USER_ID)
    #[arg(long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Save a note
    Save {
        /// Note id (default: derived from the date)
        #[arg(long)]
        id: Option<String>,

        /// Calendar day the note belongs to (default: today)
        #[arg(short, long)]
        date: Option<NaiveDate>,

        /// Title (default: first line of the content)
        #[arg(short, long)]
        title: Option<String>,

        /// Content: JSON, or plain text
        #[arg(short, long)]
        content: Option<String>,

        #[arg(long)]
        category: Option<String>,

        #[arg(long)]
        method: Option<String>,

        #[arg(long)]
        template: Option<String>,

        /// Create an additional note for the day instead of the day note
        #[arg(long)]
        timestamped: bool,
    },

    /// Load a note, from the local cache or the remote
    Load { id: String },

    /// Delete a note
    Delete {
        id: String,

        /// Day index to remove the note from (default: the note's date)
        #[arg(short, long)]
        date: Option<String>,
    },

    /// List the notes of a day
    Day { date: Option<NaiveDate> },

    /// List the most recently updated notes
    Recent {
        #[arg(short = 'n', long, default_value_t = RECENT_NOTES_COUNT)]
        count: usize,
    },

    /// Show pending offline operations
    Queue,

    /// Replay the offline queue now
    Drain,

    /// Push every local note to the signed-in account, then drain
    Merge,

    /// Show sync status
    Status,

    /// Print live updates of a note (or of all notes) until interrupted
    Watch { id: Option<String> },

    /// Team workspaces
    Team {
        #[command(subcommand)]
        command: TeamCommands,
    },
}

#[derive(Subcommand)]
enum TeamCommands {
    /// Create a team
    Create { name: String },
    /// List your teams
    List,
    /// Join a team by id
    Join { team_id: String },
    /// Create a team document
    NewDoc { team_id: String, title: String },
    /// Show a team document
    Show { team_id: String, doc_id: String },
    /// Merge JSON fields into a team document
    Edit {
        team_id: String,
        doc_id: String,
        /// JSON object of fields to merge
        fields: String,
    },
    /// Delete a team document
    Remove { team_id: String, doc_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let _file_guard = init_tracing();
    let cli = Cli::parse();

    let mut config = SyncConfig::from_env();
    if let Some(user) = cli.user.clone() {
        config = config.with_user_id(user);
    }

    let kv = SqliteKv::open(&config.db_path)
        .with_context(|| format!("opening local cache {}", config.db_path.display()))?;
    let cache = LocalCache::new(Arc::new(kv));

    let mut remote_config = HttpRemoteConfig::new(config.remote_url.as_str())
        .with_timeout_seconds(config.remote_timeout_secs)
        .with_poll_interval(config.subscription_poll_interval());
    if let Some(token) = &config.remote_token {
        remote_config = remote_config.with_token(token.as_str());
    }
    let remote = Arc::new(HttpRemoteStore::new(remote_config)?);

    let session = match &config.user_id {
        Some(uid) => AuthSession::signed_in(AuthUser::new(uid.as_str())),
        None => AuthSession::new(),
    };

    let online = if cli.offline {
        false
    } else {
        match remote.health_check().await {
            Ok(()) => true,
            Err(e) => {
                warn!(subsystem = "cli", error = %e, "Remote unreachable, working offline");
                false
            }
        }
    };

    let sync = SyncOrchestrator::new(cache, remote.clone(), session.clone(), config, online);
    let teams = TeamWorkspace::new(remote, session);

    run(cli.command, &sync, &teams).await
}

async fn run(
    command: Commands,
    sync: &SyncOrchestrator,
    teams: &TeamWorkspace,
) -> anyhow::Result<()> {
    match command {
        Commands::Save {
            id,
            date,
            title,
            content,
            category,
            method,
            template,
            timestamped,
        } => {
            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            let id = match id {
                Some(id) => id,
                None if timestamped => note_id::timestamped(date, Utc::now()),
                None => note_id::for_day(date),
            };

            let mut note = sync
                .cache()
                .get(&id)?
                .unwrap_or_else(|| NoteDocument::new(id.as_str()).with_date(date.to_string()));
            if let Some(content) = content {
                note.content = parse_content(&content);
            }
            if let Some(title) = title.or_else(|| extract_title(&note.content)) {
                note.title = title;
            }
            if note.title.is_empty() {
                note.title = default_title(note.date.as_deref());
            }
            if let Some(category) = category {
                note.category = Some(category);
            }
            if let Some(method) = method {
                note.method = Some(method);
            }
            if let Some(template) = template {
                note.template = Some(template);
            }
            note.touch();

            sync.save_note(&id, note).await?;
            print_json(&json!({
                "id": id,
                "pending": sync.status().pending,
            }))
        }

        Commands::Load { id } => match sync.load_note(&id).await? {
            Some(note) => print_json(&note),
            None => bail!("note {id} not found"),
        },

        Commands::Delete { id, date } => {
            let date = match date {
                Some(date) => Some(date),
                None => sync
                    .cache()
                    .get(&id)?
                    .and_then(|n| n.date)
                    .or_else(|| note_id::date_of(&id).map(|d| d.to_string())),
            };
            sync.delete_note(&id, date.as_deref()).await?;
            print_json(&json!({
                "id": id,
                "deleted": true,
                "pending": sync.status().pending,
            }))
        }

        Commands::Day { date } => {
            let date = date.unwrap_or_else(|| Utc::now().date_naive()).to_string();
            let mut notes = Vec::new();
            for entry in sync.list_day_notes(&date)? {
                if let Some(note) = sync.cache().get(&entry.id)? {
                    notes.push(note);
                }
            }
            print_json(&notes)
        }

        Commands::Recent { count } => print_json(&sync.list_recent_notes(count).await?),

        Commands::Queue => print_json(&sync.queue().entries()?),

        Commands::Drain => {
            if !sync.is_online() {
                bail!("offline; {} operation(s) stay queued", sync.status().pending);
            }
            match sync.drain_now().await? {
                Some(outcome) => print_json(&outcome),
                None => bail!("sign-in required (set PLANNER_USER_ID or --user)"),
            }
        }

        Commands::Merge => {
            let Some(uid) = sync.session().uid() else {
                bail!("sign-in required (set PLANNER_USER_ID or --user)");
            };
            if !sync.is_online() {
                bail!("offline; merge needs the remote store");
            }
            print_json(&sync.sync_local_to_remote(&uid).await?)
        }

        Commands::Status => print_json(&sync.status()),

        Commands::Watch { id } => watch(sync, id).await,

        Commands::Team { command } => run_team(command, teams).await,
    }
}

async fn run_team(command: TeamCommands, teams: &TeamWorkspace) -> anyhow::Result<()> {
    match command {
        TeamCommands::Create { name } => {
            let team_id = teams.create_team(&name).await?;
            print_json(&json!({ "teamId": team_id, "name": name }))
        }
        TeamCommands::List => print_json(&teams.user_teams().await),
        TeamCommands::Join { team_id } => print_json(&teams.join_team(&team_id).await?),
        TeamCommands::NewDoc { team_id, title } => {
            let doc_id = teams.create_team_doc(&team_id, &title).await?;
            print_json(&json!({ "teamId": team_id, "docId": doc_id }))
        }
        TeamCommands::Show { team_id, doc_id } => {
            match teams.load_team_doc(&team_id, &doc_id).await? {
                Some(doc) => print_json(&doc),
                None => bail!("team document {doc_id} not found"),
            }
        }
        TeamCommands::Edit {
            team_id,
            doc_id,
            fields,
        } => {
            let patch: TeamDocPatch =
                serde_json::from_str(&fields).context("fields must be a JSON object")?;
            teams.save_team_doc(&team_id, &doc_id, patch).await?;
            print_json(&json!({ "teamId": team_id, "docId": doc_id, "saved": true }))
        }
        TeamCommands::Remove { team_id, doc_id } => {
            teams.delete_team_doc(&team_id, &doc_id).await?;
            print_json(&json!({ "teamId": team_id, "docId": doc_id, "deleted": true }))
        }
    }
}

async fn watch(sync: &SyncOrchestrator, id: Option<String>) -> anyhow::Result<()> {
    if !sync.session().is_signed_in() {
        bail!("sign-in required (set PLANNER_USER_ID or --user)");
    }

    sync.start();
    let _subscription = match id {
        Some(id) => {
            sync.subscribe_to_note(&id, |note| {
                if let Err(e) = print_json(&note) {
                    warn!(subsystem = "cli", error = %e, "Failed to print update");
                }
            })
            .await
        }
        None => {
            sync.subscribe_to_user_notes(|notes| {
                if let Err(e) = print_json(&notes) {
                    warn!(subsystem = "cli", error = %e, "Failed to print update");
                }
            })
            .await
        }
    };

    tokio::signal::ctrl_c().await?;
    sync.stop();
    info!(subsystem = "cli", "Watch stopped");
    Ok(())
}

/// JSON content is stored as-is; anything else becomes a text block.
fn parse_content(raw: &str) -> JsonValue {
    serde_json::from_str(raw).unwrap_or_else(|_| json!({ "text": raw }))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Initialize tracing with configurable output.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, enables daily-rotated file logging)
///   LOG_ANSI    - "true"/"false" override ANSI colors
///   RUST_LOG    - standard env filter (default: "planner=info")
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "planner=info".into());
    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(ref path) = log_file {
        let file_dir = Path::new(path).parent().unwrap_or(Path::new("."));
        let file_name = Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("planner.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        // stdout carries command output
        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stderr)"),
        "Logging initialized"
    );
    guard
}
