//! Configuration types for VOTEMESH

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::VotemeshError;
use crate::traits::VotemeshResult;
use crate::types::DEFAULT_ROOM;

/// Read a JSON config file, falling back to defaults for missing fields
pub fn load_json_config<T>(path: &Path) -> VotemeshResult<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content = std::fs::read_to_string(path)
        .map_err(|e| VotemeshError::ConfigError(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&content)
        .map_err(|e| VotemeshError::ConfigError(format!("{}: {}", path.display(), e)))
}

/// Main node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node name for logging
    pub name: String,

    /// Data directory (device key, sled database)
    pub data_dir: PathBuf,

    /// Relay transport configuration
    pub transport: TransportConfig,

    /// Record store configuration
    pub store: StoreConfig,

    /// API configuration
    pub api: ApiConfig,

    /// Optional audit backend
    pub audit: AuditConfig,

    /// Period of the local chain self-audit in milliseconds; 0 disables it
    pub audit_interval_ms: u64,

    /// Logging level
    pub log_level: String,
}

impl NodeConfig {
    pub fn audit_interval(&self) -> Option<Duration> {
        (self.audit_interval_ms > 0).then(|| Duration::from_millis(self.audit_interval_ms))
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "votemesh-node".to_string(),
            data_dir: PathBuf::from("./data"),
            transport: TransportConfig::default(),
            store: StoreConfig::default(),
            api: ApiConfig::default(),
            audit: AuditConfig::default(),
            audit_interval_ms: 60_000,
            log_level: "info".to_string(),
        }
    }
}

/// Relay client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// WebSocket URL of the relay
    pub relay_url: String,

    /// Room joined after registration
    pub room_id: String,

    /// Reconnect attempts before falling back to local-only mode
    pub max_reconnect_attempts: u32,

    /// Fixed delay between reconnect attempts in milliseconds
    pub reconnect_delay_ms: u64,

    /// Delay between connecting and asking peers for their history
    pub sync_request_delay_ms: u64,

    /// Graph-service peers advertised in the peer address record
    pub gun_peers: Vec<String>,
}

impl TransportConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn sync_request_delay(&self) -> Duration {
        Duration::from_millis(self.sync_request_delay_ms)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://localhost:8080".to_string(),
            room_id: DEFAULT_ROOM.to_string(),
            max_reconnect_attempts: 10,
            reconnect_delay_ms: 3000,
            sync_request_delay_ms: 1000,
            gun_peers: vec!["http://localhost:8765/gun".to_string()],
        }
    }
}

/// Record store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Sled,
}

/// Record store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Upper bound for one-shot reads at startup
    pub read_timeout_ms: u64,
}

impl StoreConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sled,
            read_timeout_ms: 5000,
        }
    }
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Enable HTTP API
    pub enabled: bool,

    /// API listen address
    pub listen_addr: String,

    /// Enable CORS
    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "127.0.0.1:3000".to_string(),
            enable_cors: true,
        }
    }
}

/// Audit backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Base URL of the audit API; `None` disables authorization checks
    pub api_base: Option<String>,

    /// Request timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            api_base: None,
            timeout_ms: 5000,
        }
    }
}

/// Relay server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// WebSocket listen address
    pub listen_addr: String,

    /// Room used when a join-room frame names none
    pub default_room: String,

    /// Logging level
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            default_room: DEFAULT_ROOM.to_string(),
            log_level: "info".to_string(),
        }
    }
}
