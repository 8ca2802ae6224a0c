//! Per-connection relay session

use serde_json::Value;
use tracing::{debug, warn};
use votemesh_core::PeerId;
use votemesh_p2p::{ClientFrame, RelayEvent, RelayRequest};

use crate::registry::{PeerConnection, SharedRelayRegistry};

/// State for one accepted socket: its connection handle and, once it
/// registers, its peer id
pub struct RelaySession {
    registry: SharedRelayRegistry,
    connection: PeerConnection,
    peer_id: Option<PeerId>,
}

impl RelaySession {
    pub fn new(registry: SharedRelayRegistry, connection: PeerConnection) -> Self {
        registry.attach(connection.clone());
        Self {
            registry,
            connection,
            peer_id: None,
        }
    }

    pub fn peer_id(&self) -> Option<&str> {
        self.peer_id.as_deref()
    }

    /// Greet the new connection
    pub fn welcome(&self) {
        match RelayEvent::welcome().to_text() {
            Ok(text) => {
                self.connection.send_text(&text);
            }
            Err(e) => warn!("Failed to encode welcome: {}", e),
        }
    }

    /// Peer id used for routing. Unregistered connections route as "".
    fn routing_id(&self) -> &str {
        self.peer_id.as_deref().unwrap_or_default()
    }

    pub fn handle_text(&mut self, text: &str) {
        let frame = match ClientFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping malformed frame: {}", e);
                return;
            }
        };

        match frame {
            ClientFrame::Request(RelayRequest::Register { peer_id }) => {
                if let Some(previous) = self.peer_id.replace(peer_id.clone()) {
                    if previous != peer_id {
                        self.registry.disconnect(&previous, self.connection.id());
                    }
                }
                self.registry.register(peer_id, self.connection.clone());
            }
            ClientFrame::Request(RelayRequest::JoinRoom { room_id }) => {
                self.registry.join(self.routing_id(), room_id);
            }
            ClientFrame::Request(RelayRequest::Broadcast { data }) => {
                debug!("Relaying {} from {}", frame_kind(&data), self.routing_id());
                self.registry
                    .broadcast_excluding(self.routing_id(), &data.to_string());
            }
            ClientFrame::Request(RelayRequest::Direct { target_peer, data }) => {
                self.registry.direct(&target_peer, &data.to_string());
            }
            ClientFrame::Application(kind, message) => {
                debug!("Relaying bare {} from {}", kind, self.routing_id());
                self.registry
                    .broadcast_excluding(self.routing_id(), &message.to_string());
            }
            ClientFrame::Unknown(kind) => {
                debug!("Unknown message type: {}", kind);
            }
        }
    }

    /// Release the connection and, if it still owns its peer id, the peer
    pub fn close(self) {
        self.registry.disconnect(self.routing_id(), self.connection.id());
        self.registry.detach(self.connection.id());
    }
}

fn frame_kind(data: &Value) -> &str {
    data.get("type").and_then(Value::as_str).unwrap_or("message")
}
