use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use loom_domain::config::{Config, ConfigSeverity};
use loom_gateway::api;
use loom_gateway::state::AppState;
use loom_modules::ModuleClient;

#[derive(Debug, Parser)]
#[command(name = "storyloom", about = "Turn-orchestrating router for narrative engines")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the router (default).
    Serve,
    /// Print the version and exit.
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let config = Config::from_env().context("loading configuration")?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Version) => {
            println!("storyloom {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Initialize structured JSON tracing (only for the `serve` command).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,loom_gateway=debug")),
        )
        .json()
        .init();
}

/// Start the router with the given configuration.
async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("StoryLoom starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Module client ────────────────────────────────────────────────
    let modules = ModuleClient::new(config.modules.request_timeout_ms)
        .context("initializing module client")?;
    tracing::info!(
        timeout_ms = config.modules.request_timeout_ms,
        "module client ready"
    );

    // ── State + router ───────────────────────────────────────────────
    tracing::info!(
        root = %config.game_projects.root.display(),
        default_project = %config.game_projects.default_project,
        "game projects root configured"
    );
    let state = AppState::new(config.clone(), modules);
    let app = api::router().with_state(state);

    // ── Listener ─────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(addr = %addr, "StoryLoom listening");

    axum::serve(listener, app).await.context("serving")?;
    Ok(())
}
