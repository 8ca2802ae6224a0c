//! VOTEMESH Node Binary

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;
use votemesh_core::{load_json_config, NodeConfig, StoreBackend};
use votemesh_crypto::keys::{DeviceKeyFile, KeyPair, SecretKey};
use votemesh_node::NodeBuilder;

const DEVICE_KEY_FILE: &str = "device_key.json";

#[derive(Parser)]
#[command(name = "votemesh-node")]
#[command(about = "VOTEMESH Node - peer-synchronized vote ledger")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the node
    Run {
        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// API listen address
        #[arg(long)]
        api_addr: Option<String>,

        /// Relay WebSocket URL
        #[arg(long)]
        relay_url: Option<String>,

        /// Data directory
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Keep the ledger in memory only
        #[arg(long)]
        memory: bool,
    },

    /// Generate a new device key
    Keygen {
        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            api_addr,
            relay_url,
            data_dir,
            memory,
        } => {
            let mut config = match config {
                Some(path) => load_json_config::<NodeConfig>(&path)?,
                None => NodeConfig::default(),
            };
            if let Some(addr) = api_addr {
                config.api.listen_addr = addr;
            }
            if let Some(url) = relay_url {
                config.transport.relay_url = url;
            }
            if let Some(dir) = data_dir {
                config.data_dir = dir;
            }
            if memory {
                config.store.backend = StoreBackend::Memory;
            }

            init_logging(&config.log_level);
            info!("Starting VOTEMESH node {}...", config.name);

            let keypair = load_or_create_keypair(&config.data_dir)?;
            let node = NodeBuilder::new().config(config).keypair(keypair).build().await?;

            node.start().await?;
        }

        Commands::Keygen { output } => {
            let keypair = KeyPair::generate();
            let json = serde_json::to_string_pretty(&DeviceKeyFile::from(&keypair))?;

            match output {
                Some(path) => {
                    std::fs::write(&path, &json)?;
                    println!("Device key saved to: {}", path.display());
                }
                None => {
                    println!("{}", json);
                }
            }
        }
    }

    Ok(())
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_or_create_keypair(data_dir: &Path) -> anyhow::Result<KeyPair> {
    let key_path = data_dir.join(DEVICE_KEY_FILE);

    if key_path.exists() {
        let content = std::fs::read_to_string(&key_path)?;
        let file: DeviceKeyFile = serde_json::from_str(&content)?;
        let keypair = SecretKey::from_hex(&file.secret_key)?.to_keypair();
        info!("Loaded device key {} from {}", keypair.device_id(), key_path.display());
        return Ok(keypair);
    }

    std::fs::create_dir_all(data_dir)?;

    let keypair = KeyPair::generate();
    let json = serde_json::to_string_pretty(&DeviceKeyFile::from(&keypair))?;
    std::fs::write(&key_path, json)?;
    info!("Generated new device key, saved to {}", key_path.display());

    Ok(keypair)
}
