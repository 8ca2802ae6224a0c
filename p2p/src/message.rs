//! Wire messages for VOTEMESH
//!
//! Every frame is a JSON text frame with a `type` field. Relay control
//! frames carry their fields inline; application messages carry their
//! payload under `data`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use votemesh_core::{PeerId, RoomId, Timestamp, VotemeshError, VotemeshResult};

/// Application message types, opaque to the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    NewPoll,
    NewBlock,
    RequestSync,
    SyncResponse,
    PeerAddresses,
}

impl MessageKind {
    pub const ALL: [MessageKind; 5] = [
        MessageKind::NewPoll,
        MessageKind::NewBlock,
        MessageKind::RequestSync,
        MessageKind::SyncResponse,
        MessageKind::PeerAddresses,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::NewPoll => "new-poll",
            MessageKind::NewBlock => "new-block",
            MessageKind::RequestSync => "request-sync",
            MessageKind::SyncResponse => "sync-response",
            MessageKind::PeerAddresses => "peer-addresses",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application message as published on either transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub timestamp: Timestamp,
}

impl Envelope {
    pub fn new(kind: MessageKind, data: Value) -> Self {
        Self {
            kind,
            data,
            timestamp: Timestamp::now(),
        }
    }
}

/// Client to relay control frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RelayRequest {
    Register {
        #[serde(rename = "peerId", default)]
        peer_id: PeerId,
    },
    JoinRoom {
        #[serde(rename = "roomId", default, skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
    },
    Broadcast {
        #[serde(default)]
        data: Value,
    },
    Direct {
        #[serde(rename = "targetPeer")]
        target_peer: PeerId,
        #[serde(default)]
        data: Value,
    },
}

impl RelayRequest {
    pub fn broadcast(envelope: &Envelope) -> VotemeshResult<Self> {
        Ok(RelayRequest::Broadcast {
            data: serde_json::to_value(envelope)?,
        })
    }

    pub fn direct(target_peer: PeerId, envelope: &Envelope) -> VotemeshResult<Self> {
        Ok(RelayRequest::Direct {
            target_peer,
            data: serde_json::to_value(envelope)?,
        })
    }

    pub fn to_text(&self) -> VotemeshResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Relay to client control frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RelayEvent {
    Welcome {
        message: String,
        timestamp: Timestamp,
    },
    PeerList {
        peers: Vec<PeerId>,
    },
    PeerLeft {
        #[serde(rename = "peerId")]
        peer_id: PeerId,
    },
}

impl RelayEvent {
    pub fn welcome() -> Self {
        RelayEvent::Welcome {
            message: "Connected to VOTEMESH relay".to_string(),
            timestamp: Timestamp::now(),
        }
    }

    pub fn to_text(&self) -> VotemeshResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

const RELAY_REQUEST_TYPES: [&str; 4] = ["register", "join-room", "broadcast", "direct"];
const RELAY_EVENT_TYPES: [&str; 3] = ["welcome", "peer-list", "peer-left"];

fn frame_type(value: &Value) -> VotemeshResult<String> {
    value
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| VotemeshError::DeserializationError("frame has no type".to_string()))
}

fn parse_value(text: &str) -> VotemeshResult<Value> {
    serde_json::from_str(text).map_err(|e| VotemeshError::DeserializationError(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> VotemeshResult<T> {
    serde_json::from_value(value).map_err(|e| VotemeshError::DeserializationError(e.to_string()))
}

/// A frame as seen by the relay
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    Request(RelayRequest),
    /// Application message sent without a `broadcast` wrapper
    Application(MessageKind, Value),
    Unknown(String),
}

impl ClientFrame {
    pub fn parse(text: &str) -> VotemeshResult<Self> {
        let value = parse_value(text)?;
        let kind = frame_type(&value)?;

        if RELAY_REQUEST_TYPES.contains(&kind.as_str()) {
            return Ok(ClientFrame::Request(decode(value)?));
        }
        match MessageKind::parse(&kind) {
            Some(message_kind) => Ok(ClientFrame::Application(message_kind, value)),
            None => Ok(ClientFrame::Unknown(kind)),
        }
    }
}

/// A frame as seen by a relay client
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    Event(RelayEvent),
    /// Application message with its payload already unwrapped
    Application(MessageKind, Value),
    Unknown(String),
}

impl ServerFrame {
    pub fn parse(text: &str) -> VotemeshResult<Self> {
        let mut value = parse_value(text)?;
        let kind = frame_type(&value)?;

        if RELAY_EVENT_TYPES.contains(&kind.as_str()) {
            return Ok(ServerFrame::Event(decode(value)?));
        }
        match MessageKind::parse(&kind) {
            Some(message_kind) => {
                // Frames without a payload hand the whole message to the handler
                let payload = match value.get_mut("data").map(Value::take) {
                    Some(data) if !data.is_null() => data,
                    _ => value,
                };
                Ok(ServerFrame::Application(message_kind, payload))
            }
            None => Ok(ServerFrame::Unknown(kind)),
        }
    }
}
