//! Idasen Server
//!
//! Standing desk control service with a REST API and height event stream.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use idasen::config::{AppConfig, DEFAULT_CONFIG_PATH};
use idasen::desk_runtime::DeskRegistry;
use idasen::logging;
use idasen::server::{AppState, create_router, generate_token};
use idasen::simulator::SimulatedConnector;

/// Idasen Desk Server
#[derive(Parser, Debug)]
#[command(name = "idasen")]
#[command(about = "Idasen standing desk control server", long_about = None)]
struct Args {
    /// Path to the config file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Server host address, overrides the config file
    #[arg(long)]
    host: Option<String>,

    /// Server port, overrides the config file
    #[arg(long)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a new API token for `server.auth_tokens`
    Keygen,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(Command::Keygen) = args.command {
        println!("{}", generate_token());
        return Ok(());
    }

    let mut config = AppConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    logging::init(&config.logging);

    info!("Starting Idasen server v{}", env!("CARGO_PKG_VERSION"));
    if !args.config.exists() {
        info!(path = %args.config.display(), "Config file does not exist, using defaults");
    }
    if config.server.auth_tokens.is_empty() {
        warn!("No auth tokens configured, the desk API is open to anyone");
    }

    let connector = Arc::new(SimulatedConnector::new(config.simulator.clone()));
    let registry = Arc::new(DeskRegistry::with_options(connector, config.desk.to_options()));

    let state = AppState::new(Arc::clone(&registry), config.server.auth_tokens.clone());
    let stop_streams = state.shutdown_token().clone();
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Event streams never finish on their own
            stop_streams.cancel();
        })
        .await?;

    info!("Closing desk connections...");
    if let Err(e) = registry.close_all().await {
        error!("Some desks did not close cleanly: {}", e);
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        },
    }
}
