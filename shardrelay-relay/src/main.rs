//! ShardRelay relay daemon
//!
//! Provides:
//! - Register / Login / Rekey / Invite transactions over HTTP
//! - Local session processing or fan-out to backend nodes
//! - Prometheus metrics at /metrics

use clap::Parser;
use shardrelay_relay::config::{parse_endpoints, RelayConfig};
use shardrelay_relay::{api, metrics, RelayState};
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "shardrelay-relay")]
#[command(about = "ShardRelay session relay")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP bind address (overrides config file)
    #[arg(long)]
    bind_address: Option<String>,

    /// HTTP listen port (overrides config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Number of storage nodes (overrides config file)
    #[arg(short, long)]
    node_count: Option<usize>,

    /// Comma-separated backend node URLs; enables forward mode
    #[arg(long)]
    nodes: Option<String>,

    /// Emit logs as JSON
    #[arg(long, default_value = "false")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }

    // Priority: CLI args > environment > config file > defaults
    let base = match &cli.config {
        Some(path) => RelayConfig::from_file(path)?,
        None => RelayConfig::default(),
    };
    let config = base.with_env_overrides().with_overrides(
        cli.bind_address,
        cli.port,
        cli.node_count,
        cli.nodes.as_deref().map(parse_endpoints),
    );
    config.validate()?;

    let http_addr = config.server.http_addr()?;
    info!(
        http = %http_addr,
        nodes = config.session.node_count,
        forwarding = config.is_forwarding(),
        "Starting ShardRelay relay"
    );

    let state = RelayState::from_config(&config)?;
    let handle = metrics::init_metrics()?;
    let app = api::router(state).merge(metrics::routes(handle));

    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    info!("HTTP server listening on {}", http_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Relay shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
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
                error!(error = %e, "Failed to install signal handler");
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
