use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::signal;
use tracing::info;

use ratewall::config::{RatewallConfig, StoreBackend};
use ratewall::logging;
use ratewall::server::{build_gate, HttpServer};

/// Request admission gate with per-identifier rate limiting.
#[derive(Debug, Parser)]
#[command(name = "ratewall", version, about)]
struct Cli {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long, env = "RATEWALL_CONFIG")]
    config: Option<PathBuf>,

    /// Override the HTTP listen address
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Override the counting store backend (redis or memory)
    #[arg(long)]
    store: Option<StoreBackend>,

    /// Print the effective configuration as YAML and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = tracing::subscriber::with_default(logging::bootstrap(), || {
        RatewallConfig::load(cli.config.as_deref())
    })?;
    if let Some(listen) = cli.listen {
        config.server.listen_addr = listen;
    }
    if let Some(store) = cli.store {
        config.store.backend = store;
    }

    if cli.print_config {
        print!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    logging::init(&config.logging);

    info!("Starting Ratewall");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        listen_addr = %config.server.listen_addr,
        store = ?config.store.backend,
        "Configuration loaded"
    );

    let gate = build_gate(&config).await?;
    let server = HttpServer::new(config.server.listen_addr, gate);
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Ratewall stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
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
