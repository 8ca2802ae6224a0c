//! Connection registry for the relay
//!
//! Three tables live behind one lock: every open connection, the registered
//! peer ids and the rooms. Outbound frames go through per-connection
//! unbounded channels, so sending never blocks while the lock is held.

use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use votemesh_core::{PeerId, RoomId, DEFAULT_ROOM};
use votemesh_p2p::RelayEvent;

/// Identifies one accepted socket
pub type ConnectionId = u64;

/// Frame handed to a connection's writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayFrame {
    Text(String),
    Close,
}

/// Write half of an accepted connection
#[derive(Debug, Clone)]
pub struct PeerConnection {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<RelayFrame>,
}

impl PeerConnection {
    pub fn new(id: ConnectionId, tx: mpsc::UnboundedSender<RelayFrame>) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Queue a text frame. A connection that is already gone is skipped.
    pub fn send_text(&self, text: &str) -> bool {
        self.is_open() && self.tx.send(RelayFrame::Text(text.to_string())).is_ok()
    }

    fn close(&self) -> bool {
        self.tx.send(RelayFrame::Close).is_ok()
    }
}

#[derive(Default)]
struct Tables {
    connections: HashMap<ConnectionId, PeerConnection>,
    peers: HashMap<PeerId, PeerConnection>,
    rooms: HashMap<RoomId, BTreeSet<PeerId>>,
}

/// Who is connected and which rooms they joined
pub struct RelayRegistry {
    tables: RwLock<Tables>,
    default_room: RoomId,
    next_connection: AtomicU64,
}

impl RelayRegistry {
    pub fn new(default_room: impl Into<RoomId>) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            default_room: default_room.into(),
            next_connection: AtomicU64::new(1),
        }
    }

    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_connection.fetch_add(1, Ordering::SeqCst)
    }

    /// Track a freshly accepted connection
    pub fn attach(&self, connection: PeerConnection) {
        self.tables.write().connections.insert(connection.id, connection);
    }

    /// Forget a connection once its socket is gone
    pub fn detach(&self, id: ConnectionId) {
        self.tables.write().connections.remove(&id);
    }

    /// Bind a peer id to a connection and tell everyone the new peer list.
    ///
    /// A later registration under the same id replaces the earlier one.
    pub fn register(&self, peer_id: PeerId, connection: PeerConnection) {
        {
            let mut tables = self.tables.write();
            if let Some(previous) = tables.peers.insert(peer_id.clone(), connection) {
                debug!("Peer {} re-registered, replacing connection {}", peer_id, previous.id);
            }
        }
        info!("Peer registered: {}", peer_id);
        self.broadcast_event(&RelayEvent::PeerList {
            peers: self.peer_ids(),
        });
    }

    /// Add a peer to a room, creating the room on first use
    pub fn join(&self, peer_id: &str, room_id: Option<RoomId>) -> RoomId {
        let room = room_id
            .filter(|room| !room.is_empty())
            .unwrap_or_else(|| self.default_room.clone());
        self.tables
            .write()
            .rooms
            .entry(room.clone())
            .or_default()
            .insert(peer_id.to_string());
        info!("Peer {} joined room {}", peer_id, room);
        room
    }

    /// Send to every registered peer
    pub fn broadcast(&self, text: &str) -> usize {
        let tables = self.tables.read();
        tables.peers.values().filter(|conn| conn.send_text(text)).count()
    }

    /// Send to every registered peer except the sender
    pub fn broadcast_excluding(&self, sender: &str, text: &str) -> usize {
        let tables = self.tables.read();
        tables
            .peers
            .iter()
            .filter(|(peer_id, _)| peer_id.as_str() != sender)
            .filter(|(_, conn)| conn.send_text(text))
            .count()
    }

    /// Send to one registered peer. Unknown or closed targets are skipped.
    pub fn direct(&self, target: &str, text: &str) -> bool {
        let delivered = self
            .tables
            .read()
            .peers
            .get(target)
            .map_or(false, |conn| conn.send_text(text));
        if !delivered {
            debug!("Direct message to {} dropped", target);
        }
        delivered
    }

    pub fn broadcast_event(&self, event: &RelayEvent) -> usize {
        match event.to_text() {
            Ok(text) => self.broadcast(&text),
            Err(e) => {
                warn!("Failed to encode relay event: {}", e);
                0
            }
        }
    }

    /// Clean up after a connection closes.
    ///
    /// If the peer id has since been registered from another connection the
    /// newer registration is left alone. Returns true if the peer was removed.
    pub fn disconnect(&self, peer_id: &str, connection: ConnectionId) -> bool {
        let removed = {
            let mut tables = self.tables.write();
            let owner = tables.peers.get(peer_id).map(|conn| conn.id);
            if owner.map_or(false, |id| id != connection) {
                debug!("Peer {} already re-registered, keeping it", peer_id);
                return false;
            }

            let removed = tables.peers.remove(peer_id).is_some();
            tables.rooms.retain(|room, members| {
                members.remove(peer_id);
                if members.is_empty() {
                    debug!("Room {} is empty, removing", room);
                }
                !members.is_empty()
            });
            removed
        };

        if removed {
            info!("Peer disconnected: {}", peer_id);
            self.broadcast_event(&RelayEvent::PeerLeft {
                peer_id: peer_id.to_string(),
            });
        }
        removed
    }

    /// Ask every open connection to close. Returns how many were asked.
    pub fn close_all(&self) -> usize {
        let tables = self.tables.read();
        tables.connections.values().filter(|conn| conn.close()).count()
    }

    /// Registered peer ids, sorted
    pub fn peer_ids(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.tables.read().peers.keys().cloned().collect();
        peers.sort();
        peers
    }

    pub fn peer_count(&self) -> usize {
        self.tables.read().peers.len()
    }

    pub fn connection_count(&self) -> usize {
        self.tables.read().connections.len()
    }

    pub fn rooms(&self) -> Vec<RoomId> {
        let mut rooms: Vec<RoomId> = self.tables.read().rooms.keys().cloned().collect();
        rooms.sort();
        rooms
    }

    pub fn room_members(&self, room: &str) -> Vec<PeerId> {
        self.tables
            .read()
            .rooms
            .get(room)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for RelayRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_ROOM)
    }
}

/// Shared registry handle
pub type SharedRelayRegistry = Arc<RelayRegistry>;

pub fn create_relay_registry(default_room: impl Into<RoomId>) -> SharedRelayRegistry {
    Arc::new(RelayRegistry::new(default_room))
}
