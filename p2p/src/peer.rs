//! Peer identity and address directory

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use votemesh_core::{PeerId, Timestamp};

/// Generate a random peer id for this process
pub fn generate_peer_id() -> PeerId {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Location info a peer advertises after connecting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerAddressRecord {
    pub peer_id: PeerId,
    pub relay_url: String,
    #[serde(default)]
    pub gun_peers: Vec<String>,
    pub joined_at: Timestamp,
}

impl PeerAddressRecord {
    pub fn new(peer_id: PeerId, relay_url: String, gun_peers: Vec<String>) -> Self {
        Self {
            peer_id,
            relay_url,
            gun_peers,
            joined_at: Timestamp::now(),
        }
    }
}

/// Directory of address records heard from other peers
#[derive(Default)]
pub struct PeerDirectory {
    peers: RwLock<HashMap<PeerId, PeerAddressRecord>>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or refresh a record. Returns true if the peer was not known.
    pub fn upsert(&self, record: PeerAddressRecord) -> bool {
        self.peers
            .write()
            .insert(record.peer_id.clone(), record)
            .is_none()
    }

    pub fn remove(&self, peer_id: &str) -> Option<PeerAddressRecord> {
        self.peers.write().remove(peer_id)
    }

    pub fn get(&self, peer_id: &str) -> Option<PeerAddressRecord> {
        self.peers.read().get(peer_id).cloned()
    }

    /// All records, oldest first
    pub fn all(&self) -> Vec<PeerAddressRecord> {
        let mut records: Vec<_> = self.peers.read().values().cloned().collect();
        records.sort_by_key(|r| r.joined_at);
        records
    }

    pub fn clear(&self) {
        self.peers.write().clear();
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }
}

/// Shared peer directory
pub type SharedPeerDirectory = Arc<PeerDirectory>;

/// Create a shared peer directory
pub fn create_peer_directory() -> SharedPeerDirectory {
    Arc::new(PeerDirectory::new())
}
