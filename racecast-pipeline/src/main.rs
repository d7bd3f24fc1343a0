//! racecast-pipeline - race-day prediction service
//!
//! `serve` exposes the HTTP API (manual triggers, prediction reads, event
//! stream); `run` executes one trigger and prints the delivery summary.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use racecast_common::config::{load_config, resolve_root_folder, CONFIG_ENV_VAR, ROOT_ENV_VAR};
use racecast_common::time::parse_race_date;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use racecast_pipeline::models::{TriggerEvent, TriggerSource};
use racecast_pipeline::AppState;

/// Command-line arguments for racecast-pipeline
#[derive(Parser, Debug)]
#[command(name = "racecast-pipeline")]
#[command(about = "Race-day prediction pipeline")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    /// Root folder holding the database
    #[arg(short, long, global = true, env = ROOT_ENV_VAR)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API
    Serve {
        /// Port to listen on (overrides the config file)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run one trigger and print its summary
    Run {
        /// Race date (YYYY-MM-DD); defaults to today in the race calendar's offset
        #[arg(short, long)]
        date: Option<String>,

        /// Recompute races that already have a stored prediction
        #[arg(short, long)]
        force: bool,

        /// Print the full batch report as JSON instead of the summary
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(args.config.as_deref()).context("Failed to load configuration")?;

    // RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting racecast-pipeline {}", env!("CARGO_PKG_VERSION"));

    let root_folder = resolve_root_folder(args.root.as_deref(), &config);
    info!("Root folder: {}", root_folder.display());

    match args.command {
        Command::Serve { port } => serve(config, root_folder, port).await,
        Command::Run { date, force, json } => run_once(config, root_folder, date, force, json).await,
    }
}

async fn serve(
    config: racecast_common::config::PipelineConfig,
    root_folder: PathBuf,
    port: Option<u16>,
) -> Result<()> {
    let host = config.server.host.clone();
    let port = port.unwrap_or(config.server.port);

    let state = AppState::from_config(config, &root_folder).await?;
    let app = racecast_pipeline::build_router(state);

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", host, port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

async fn run_once(
    config: racecast_common::config::PipelineConfig,
    root_folder: PathBuf,
    date: Option<String>,
    force: bool,
    json: bool,
) -> Result<()> {
    let issued_at = Utc::now();
    let mut trigger = match date.as_deref() {
        Some(date) => TriggerEvent::new(parse_race_date(date)?, issued_at, TriggerSource::Manual),
        None => TriggerEvent::scheduled_today(issued_at, config.orchestrator.utc_offset_hours)?,
    };
    if force {
        trigger = trigger.forced();
    }

    let state = AppState::from_config(config, &root_folder).await?;
    let report = state.orchestrator.run_trigger(&trigger).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.render_summary());
    }

    if let Some(failure) = &report.discovery_failure {
        anyhow::bail!("race discovery failed: {}", failure);
    }
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
