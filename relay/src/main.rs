//! VOTEMESH Relay Binary

use clap::Parser;
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use votemesh_core::{load_json_config, RelayConfig};
use votemesh_relay::RelayServer;

#[derive(Parser)]
#[command(name = "votemesh-relay")]
#[command(about = "VOTEMESH Relay - forwards messages between vote nodes")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the config file
    #[arg(short, long)]
    listen: Option<String>,

    /// Room for join requests that name none
    #[arg(long)]
    default_room: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_json_config::<RelayConfig>(path)?,
        None => RelayConfig::default(),
    };
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }
    if let Some(room) = cli.default_room {
        config.default_room = room;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let server = RelayServer::bind(&config).await?;
    info!("VOTEMESH relay running on ws://{}", server.local_addr()?);

    server
        .serve(async {
            match signal::ctrl_c().await {
                Ok(()) => info!("Received shutdown signal"),
                Err(e) => error!("Failed to listen for shutdown signal: {}", e),
            }
        })
        .await?;

    info!("Relay stopped");
    Ok(())
}
