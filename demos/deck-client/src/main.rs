//! Headless deck client.
//!
//! Run with: cargo run -p deck-client-demo [settings.json]
//!
//! Connects to the deck companion, logs every request it would act on, and
//! reads commands from stdin: `reconnect`, `claim`, `focus`, `blur`,
//! `reload` (re-read settings and environment) and `quit`.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use deckbridge_core::{ConfigTracker, DeckConfig, LogStatus, SessionId};
use deckbridge_session::{HostActions, SessionHandle, SessionManager, WsConnector, bind_host};
use deckbridge_transport::protocol::CreateTerminalMessage;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

const SESSION_ENV: &str = "DECKBRIDGE_SESSION_ID";

/// Host that only logs what the deck asks for.
struct LoggingHost;

impl HostActions for LoggingHost {
    fn create_terminal(&self, request: &CreateTerminalMessage) -> anyhow::Result<()> {
        tracing::info!(
            name = request.name.as_deref().unwrap_or_default(),
            shell = request.shell_path.as_deref().unwrap_or_default(),
            cwd = request.working_directory.as_deref().unwrap_or_default(),
            preserve_focus = request.preserve_focus,
            "create terminal"
        );
        Ok(())
    }

    fn execute_terminal_command(&self, command: &str) -> anyhow::Result<()> {
        tracing::info!(command, "terminal command");
        Ok(())
    }

    fn execute_command(&self, command: &str, arguments: Option<Value>) -> anyhow::Result<()> {
        tracing::info!(command, ?arguments, "execute command");
        Ok(())
    }

    fn change_language(&self, language_id: &str) -> anyhow::Result<()> {
        tracing::info!(language_id, "change language");
        Ok(())
    }

    fn insert_snippet(&self, name: &str) -> anyhow::Result<()> {
        tracing::info!(name, "insert snippet");
        Ok(())
    }

    fn open_folder(&self, path: &str, new_window: bool) -> anyhow::Result<()> {
        tracing::info!(path, new_window, "open folder");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let settings_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = load_config(settings_path.as_ref())?;
    let session_id = std::env::var(SESSION_ENV)
        .ok()
        .filter(|id| !id.is_empty())
        .map_or_else(|| SessionId::new(Uuid::new_v4().to_string()), SessionId::new);

    tracing::info!(%session_id, endpoint = %config.endpoint(), "starting deck client");

    let mut tracker = ConfigTracker::new(config.endpoint());
    let manager = SessionManager::from_config(WsConnector, &config, session_id, Arc::new(LogStatus));
    let (handle, task) = manager.spawn();

    bind_host(&handle, Arc::new(LoggingHost))?;
    handle.activate()?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => {}
            "quit" => break,
            "reload" => match load_config(settings_path.as_ref()) {
                Ok(config) => {
                    if let Some(endpoint) = tracker.observe(&config) {
                        handle.configuration_changed(endpoint)?;
                    }
                }
                Err(e) => tracing::error!(error = %e, "failed to reload configuration"),
            },
            command => run_command(&handle, command)?,
        }
    }

    handle.deactivate().await?;
    task.await?;
    Ok(())
}

fn run_command(handle: &SessionHandle, command: &str) -> anyhow::Result<()> {
    match command {
        "reconnect" => handle.reconnect()?,
        "claim" => handle.claim_active_session()?,
        "focus" => handle.window_focus_changed(true)?,
        "blur" => handle.window_focus_changed(false)?,
        other => tracing::warn!(command = other, "unknown command"),
    }
    Ok(())
}

fn load_config(settings_path: Option<&PathBuf>) -> anyhow::Result<DeckConfig> {
    let Some(path) = settings_path else {
        return Ok(DeckConfig::from_env()?);
    };
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let settings: Value =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    Ok(DeckConfig::from_settings(&settings)?.overlay(|key| std::env::var(key).ok())?)
}
