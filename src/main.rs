use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use switchboard_core::collaborators::ApprovalNotifier;
use switchboard_engine::{EngineConfig, Orchestrator};
use switchboard_server::{AppState, BroadcastSink, ServerConfig};
use switchboard_settings::SwitchboardSettings;
use switchboard_store::{ChannelSessionRepo, Database};
use switchboard_telemetry::{init_telemetry, TelemetryConfig};

#[derive(Debug, Parser)]
#[command(name = "switchboard", version, about = "Drive agent sessions from chat channels")]
struct Cli {
    /// Settings file (defaults to ~/.switchboard/settings.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long)]
    port: Option<u16>,

    /// Directory channel folders are resolved against.
    #[arg(long)]
    base_dir: Option<String>,

    #[arg(long)]
    log_level: Option<String>,

    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the merged settings as JSON and exit.
    CheckConfig,
}

impl Cli {
    fn settings(&self) -> anyhow::Result<SwitchboardSettings> {
        let mut settings = match &self.config {
            Some(path) => switchboard_settings::load_settings_from_path(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => switchboard_settings::load_settings().context("loading settings")?,
        };
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(dir) = &self.base_dir {
            settings.agent.base_dir = dir.clone();
        }
        if let Some(level) = &self.log_level {
            settings.logging.level = level.clone();
        }
        if self.json_logs {
            settings.logging.json = true;
        }
        settings.validate().context("invalid settings")?;
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = cli.settings()?;

    if let Some(Command::CheckConfig) = cli.command {
        println!("{}", serde_json::to_string_pretty(&settings)?);
        return Ok(());
    }

    let _telemetry = init_telemetry(TelemetryConfig {
        log_filter: settings.logging.level.clone(),
        json: settings.logging.json,
        log_to_sqlite: settings.logging.persist,
        log_db_path: switchboard_settings::resolve_data_path(&settings.logging.db_path),
    });

    let db_path = switchboard_settings::resolve_data_path(&settings.storage.db_path);
    let db = Database::open(&db_path)
        .with_context(|| format!("opening session database {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "session database opened");

    let sink = BroadcastSink::new(settings.server.broadcast_capacity);
    let orchestrator = Orchestrator::new(
        EngineConfig::from_settings(&settings),
        Arc::new(ChannelSessionRepo::new(db)),
        None,
        Some(Arc::new(sink.clone()) as Arc<dyn ApprovalNotifier>),
    );

    let server_config = ServerConfig::from_settings(&settings.server);
    let handle = switchboard_server::start(
        &server_config,
        AppState {
            orchestrator: orchestrator.clone(),
            sink,
        },
    )
    .await
    .with_context(|| format!("binding {}:{}", server_config.host, server_config.port))?;

    tracing::info!(port = handle.port, agent = %settings.agent.program, "switchboard ready");

    tokio::signal::ctrl_c()
        .await
        .context("listening for ctrl-c")?;

    tracing::info!("shutting down");
    let stopped = orchestrator.shutdown().await;
    tracing::info!(stopped, "agent runs stopped");
    handle.shutdown().await;
    Ok(())
}
