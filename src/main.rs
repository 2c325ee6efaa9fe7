//! # vigil
//!
//! Conversation gateway binary: loads settings, opens both databases and
//! serves the WebSocket and REST endpoints until interrupted.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use vigil_relay::HttpAgentClient;
use vigil_server::{JwtVerifier, ServerConfig, ServerDeps, SessionConfig};
use vigil_settings::VigilSettings;
use vigil_store::{ConversationStore, Database, SqliteCheckpointStore};
use vigil_telemetry::TelemetryConfig;

/// Real-time conversation gateway for the fraud-analysis agent.
#[derive(Parser, Debug)]
#[command(name = "vigil", about = "Conversation gateway for the fraud-analysis agent")]
struct Cli {
    /// Settings file (defaults to `~/.vigil/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port to bind; overrides settings and environment.
    #[arg(long)]
    port: Option<u16>,
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

fn server_config(settings: &VigilSettings) -> ServerConfig {
    ServerConfig {
        host: settings.server.host.clone(),
        port: settings.server.port,
        session: SessionConfig {
            heartbeat_interval: settings.server.heartbeat_interval(),
            max_send_queue: settings.server.max_send_queue,
            initializing_indicator: settings.upstream.initializing_indicator,
        },
        turn_timeout: settings.upstream.turn_timeout(),
        reconcile_interval: settings.storage.reconcile_interval(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings_file = cli.config.unwrap_or_else(vigil_settings::settings_path);
    let loaded = vigil_settings::load_settings_from_path(&settings_file)
        .with_context(|| format!("Failed to load settings from {}", settings_file.display()))?;

    vigil_telemetry::init_telemetry(&TelemetryConfig::from_settings(&loaded.settings.logging));
    loaded.log_rejected();

    let mut settings = loaded.settings;
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    settings.validate().context("Invalid settings")?;

    let secret = settings
        .auth
        .secret()
        .context("No JWT secret configured (set SECRET_KEY or auth.jwtSecret)")?;

    let db_path = vigil_settings::resolve_data_path(&settings.storage.database_path);
    ensure_parent_dir(&db_path)?;
    let db = Database::open(&db_path)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "database opened");

    let checkpoint_path =
        vigil_settings::resolve_data_path(&settings.storage.checkpoint_database_path);
    ensure_parent_dir(&checkpoint_path)?;
    let checkpoints = SqliteCheckpointStore::open(&checkpoint_path).with_context(|| {
        format!("Failed to open checkpoint database {}", checkpoint_path.display())
    })?;

    let upstream = HttpAgentClient::new(
        &settings.upstream.base_url,
        settings.upstream.connect_timeout(),
        settings.upstream.idle_timeout(),
    )
    .context("Failed to build agent service client")?;
    tracing::info!(endpoint = upstream.endpoint(), "agent service configured");

    let deps = ServerDeps {
        store: ConversationStore::new(db),
        checkpoints: Arc::new(checkpoints),
        upstream: Arc::new(upstream),
        verifier: Arc::new(JwtVerifier::new(&secret, settings.auth.leeway_secs)),
    };

    let handle = vigil_server::start(server_config(&settings), deps)
        .await
        .context("Failed to start server")?;
    tracing::info!(port = handle.port, "vigil ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}
