//! Full node implementation

use crate::api::start_api_server;
use crate::runtime::NodeRuntime;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use votemesh_core::{NodeConfig, StoreBackend, VotemeshResult};
use votemesh_crypto::keys::KeyPair;

/// Full VOTEMESH node
pub struct VoteNode {
    runtime: Arc<NodeRuntime>,
}

impl VoteNode {
    /// Create a new node on the configured store
    pub async fn new(config: NodeConfig, keypair: KeyPair) -> VotemeshResult<Self> {
        let runtime = Arc::new(NodeRuntime::new(config, keypair).await?);
        Ok(Self { runtime })
    }

    /// Start the node and run until interrupted
    pub async fn start(&self) -> anyhow::Result<()> {
        info!("Starting VOTEMESH node...");

        let sync_handle = self.runtime.start()?;

        let api_handle = if self.runtime.config().api.enabled {
            let api_runtime = self.runtime.clone();
            let api_addr = self.runtime.config().api.listen_addr.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = start_api_server(api_runtime, &api_addr).await {
                    error!("API server error: {}", e);
                }
            }))
        } else {
            None
        };

        info!("Node started successfully");
        info!("Peer ID: {}", self.runtime.peer_id());
        info!("Device ID: {}", self.runtime.device_id());
        info!("Chain length: {}", self.runtime.ledger().len());

        // Wait for shutdown signal
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received, stopping node...");
            }
            Err(e) => {
                error!("Error waiting for shutdown signal: {}", e);
            }
        }

        // Cleanup
        self.runtime.shutdown();
        if let Some(handle) = api_handle {
            handle.abort();
        }
        sync_handle.abort();

        info!("Node stopped");

        Ok(())
    }

    /// Get runtime reference
    pub fn runtime(&self) -> &Arc<NodeRuntime> {
        &self.runtime
    }
}

/// Node builder for easier configuration
pub struct NodeBuilder {
    config: NodeConfig,
    keypair: Option<KeyPair>,
}

impl NodeBuilder {
    pub fn new() -> Self {
        Self {
            config: NodeConfig::default(),
            keypair: None,
        }
    }

    pub fn config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn keypair(mut self, keypair: KeyPair) -> Self {
        self.keypair = Some(keypair);
        self
    }

    pub fn api_addr(mut self, addr: &str) -> Self {
        self.config.api.listen_addr = addr.to_string();
        self
    }

    pub fn relay_url(mut self, url: &str) -> Self {
        self.config.transport.relay_url = url.to_string();
        self
    }

    pub fn data_dir(mut self, dir: PathBuf) -> Self {
        self.config.data_dir = dir;
        self
    }

    /// Keep everything in memory; nothing survives a restart
    pub fn in_memory(mut self) -> Self {
        self.config.store.backend = StoreBackend::Memory;
        self
    }

    pub async fn build(self) -> VotemeshResult<VoteNode> {
        let keypair = self.keypair.unwrap_or_else(KeyPair::generate);
        VoteNode::new(self.config, keypair).await
    }
}

impl Default for NodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_builder_applies_overrides() {
        let node = NodeBuilder::new()
            .in_memory()
            .api_addr("127.0.0.1:0")
            .relay_url("ws://127.0.0.1:9")
            .build()
            .await
            .unwrap();

        let config = node.runtime().config();
        assert_eq!(config.api.listen_addr, "127.0.0.1:0");
        assert_eq!(config.transport.relay_url, "ws://127.0.0.1:9");
        assert_eq!(node.runtime().ledger().len(), 1);
    }

    #[tokio::test]
    async fn test_sled_store_lives_in_data_dir() {
        let tmp = TempDir::new().unwrap();
        let node = NodeBuilder::new()
            .data_dir(tmp.path().to_path_buf())
            .build()
            .await
            .unwrap();

        let receipt = node.runtime().submit_vote("poll", "yes").await.unwrap();
        assert_eq!(receipt.block_index, 1);
        assert_eq!(node.runtime().receipts().await.unwrap(), vec![receipt]);
        assert!(tmp.path().join("db").exists());
    }
}
