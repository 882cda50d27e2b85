use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use floodgate::config::FloodgateConfig;
use floodgate::http::{self, HttpServer};
use floodgate::ratelimit::{Clock, SystemClock};

/// Adaptive multi-tier admission control service.
#[derive(Debug, Parser)]
#[command(name = "floodgate", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "FLOODGATE_CONFIG")]
    config: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing, RUST_LOG overrides the default level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Starting Floodgate Admission Control Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = FloodgateConfig::load(args.config.as_deref())?;
    info!(http_addr = %config.server.http_addr, "Configuration loaded");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let engine = Arc::new(config.build_engine(Arc::clone(&clock))?);
    info!("Admission engine initialized");

    let sweeper = Arc::clone(engine.store())
        .spawn_sweeper(config.rate_limiting.sweep_interval(), clock);

    let server = HttpServer::new(config.server.http_addr, http::router(engine));
    let result = server.serve_with_shutdown(shutdown_signal()).await;

    sweeper.abort();
    result?;

    info!("Floodgate Admission Control Service stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
