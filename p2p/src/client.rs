//! Relay client
//!
//! Keeps one logical connection to the relay: registers, joins the room,
//! replays messages queued while offline and reconnects a bounded number of
//! times with a fixed delay. After the last attempt the client stays in
//! [`LinkState::GaveUp`] and the node carries on local-only.

use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use votemesh_core::{PeerId, TransportConfig, VotemeshError, VotemeshResult};

use crate::message::{Envelope, MessageKind, RelayEvent, RelayRequest, ServerFrame};
use crate::peer::{create_peer_directory, PeerAddressRecord, SharedPeerDirectory};
use crate::transport::{HandlerTable, MessageHandler, PubSubTransport};

type RelayStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Lifecycle of the relay link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    GaveUp,
    Closed,
}

/// Snapshot handed to status listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    #[serde(rename = "peerCount")]
    pub peer_count: usize,
}

/// Callback receiving connection status snapshots
pub type StatusListener = Arc<dyn Fn(ConnectionStatus) + Send + Sync>;

#[derive(Default)]
struct Outbound {
    sender: Option<mpsc::UnboundedSender<Message>>,
    queue: VecDeque<Envelope>,
}

struct Shared {
    peer_id: PeerId,
    config: TransportConfig,
    handlers: HandlerTable,
    outbound: Mutex<Outbound>,
    state: RwLock<LinkState>,
    attempts: AtomicU32,
    known_peers: RwLock<HashSet<PeerId>>,
    listeners: RwLock<Vec<StatusListener>>,
    directory: SharedPeerDirectory,
}

impl Shared {
    fn state(&self) -> LinkState {
        *self.state.read()
    }

    fn set_state(&self, state: LinkState) {
        *self.state.write() = state;
    }

    fn status(&self) -> ConnectionStatus {
        let peer_count = self
            .known_peers
            .read()
            .iter()
            .filter(|peer| **peer != self.peer_id)
            .count();
        ConnectionStatus {
            connected: self.state() == LinkState::Connected,
            peer_count,
        }
    }

    fn notify(&self) {
        let listeners = self.listeners.read().clone();
        let status = self.status();
        for listener in listeners {
            listener(status);
        }
    }

    /// Send now if connected, otherwise queue for the next connect
    fn send_envelope(&self, envelope: Envelope) -> VotemeshResult<()> {
        let text = RelayRequest::broadcast(&envelope)?.to_text()?;
        let mut outbound = self.outbound.lock();

        let delivered = match &outbound.sender {
            Some(tx) => tx.send(Message::Text(text)).is_ok(),
            None => false,
        };
        if !delivered {
            outbound.sender = None;
            debug!("Relay not connected, queuing {}", envelope.kind);
            outbound.queue.push_back(envelope);
        }
        Ok(())
    }

    /// Register, join the room and replay the queue ahead of any new message
    fn attach(&self, tx: mpsc::UnboundedSender<Message>) -> VotemeshResult<()> {
        let register = RelayRequest::Register {
            peer_id: self.peer_id.clone(),
        }
        .to_text()?;
        let join = RelayRequest::JoinRoom {
            room_id: Some(self.config.room_id.clone()),
        }
        .to_text()?;

        let mut outbound = self.outbound.lock();
        let _ = tx.send(Message::Text(register));
        let _ = tx.send(Message::Text(join));

        let queued = outbound.queue.len();
        while let Some(envelope) = outbound.queue.pop_front() {
            let text = RelayRequest::broadcast(&envelope)?.to_text()?;
            let _ = tx.send(Message::Text(text));
        }
        outbound.sender = Some(tx);
        drop(outbound);

        self.set_state(LinkState::Connected);
        if queued > 0 {
            info!("Flushed {} queued messages to relay", queued);
        }
        Ok(())
    }

    fn detach(&self) {
        self.outbound.lock().sender = None;
        self.known_peers.write().clear();
    }

    fn advertise(&self) -> VotemeshResult<()> {
        let record = PeerAddressRecord::new(
            self.peer_id.clone(),
            self.config.relay_url.clone(),
            self.config.gun_peers.clone(),
        );
        let envelope = Envelope::new(MessageKind::PeerAddresses, serde_json::to_value(record)?);
        self.send_envelope(envelope)
    }

    fn handle_text(&self, text: &str) {
        match ServerFrame::parse(text) {
            Ok(ServerFrame::Event(RelayEvent::Welcome { message, .. })) => {
                debug!("Relay: {}", message);
            }
            Ok(ServerFrame::Event(RelayEvent::PeerList { peers })) => {
                debug!("Relay reports {} active peers", peers.len());
                *self.known_peers.write() = peers.into_iter().collect();
                self.notify();
            }
            Ok(ServerFrame::Event(RelayEvent::PeerLeft { peer_id })) => {
                debug!("Peer left: {}", peer_id);
                self.known_peers.write().remove(&peer_id);
                self.directory.remove(&peer_id);
                self.notify();
            }
            Ok(ServerFrame::Application(kind, payload)) => {
                if kind == MessageKind::PeerAddresses {
                    self.record_address(&payload);
                }
                if !self.handlers.dispatch(kind, payload) {
                    debug!("No handler for {} from relay", kind);
                }
            }
            Ok(ServerFrame::Unknown(kind)) => {
                debug!("Ignoring relay frame of type {}", kind);
            }
            Err(e) => {
                warn!("Dropping malformed relay frame: {}", e);
            }
        }
    }

    fn record_address(&self, payload: &Value) {
        match serde_json::from_value::<PeerAddressRecord>(payload.clone()) {
            Ok(record) if record.peer_id != self.peer_id => {
                if self.directory.upsert(record) {
                    debug!("Learned a new peer address");
                }
            }
            Ok(_) => {}
            Err(e) => debug!("Ignoring bad peer address record: {}", e),
        }
    }
}

/// WebSocket client for the relay
pub struct RelayClient {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RelayClient {
    pub fn new(peer_id: PeerId, config: TransportConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                peer_id,
                config,
                handlers: HandlerTable::new(),
                outbound: Mutex::new(Outbound::default()),
                state: RwLock::new(LinkState::Idle),
                attempts: AtomicU32::new(0),
                known_peers: RwLock::new(HashSet::new()),
                listeners: RwLock::new(Vec::new()),
                directory: create_peer_directory(),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.shared.peer_id
    }

    pub fn relay_url(&self) -> &str {
        &self.shared.config.relay_url
    }

    /// Start the connection task. Does nothing if it is already running.
    pub fn connect(&self) {
        let mut task = self.task.lock();
        if task.as_ref().map_or(false, |t| !t.is_finished()) {
            return;
        }
        self.shared.attempts.store(0, Ordering::SeqCst);
        self.shared.set_state(LinkState::Connecting);
        *task = Some(tokio::spawn(supervise(self.shared.clone())));
    }

    pub fn state(&self) -> LinkState {
        self.shared.state()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.status()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// Reconnect attempts since the last successful connection
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Messages waiting for a connection
    pub fn queued(&self) -> usize {
        self.shared.outbound.lock().queue.len()
    }

    pub fn directory(&self) -> SharedPeerDirectory {
        self.shared.directory.clone()
    }

    /// Add a status listener. It receives the current snapshot right away.
    pub fn on_status(&self, listener: StatusListener) {
        self.shared.listeners.write().push(listener.clone());
        listener(self.shared.status());
    }

    /// Send one message to a single peer through the relay.
    ///
    /// The relay does not buffer, so this fails while disconnected.
    pub fn send_direct(&self, target: PeerId, kind: MessageKind, payload: Value) -> VotemeshResult<()> {
        let text = RelayRequest::direct(target, &Envelope::new(kind, payload))?.to_text()?;
        let outbound = self.shared.outbound.lock();
        match &outbound.sender {
            Some(tx) => tx
                .send(Message::Text(text))
                .map_err(|_| VotemeshError::NetworkError("relay writer stopped".to_string())),
            None => Err(VotemeshError::NetworkError("not connected to relay".to_string())),
        }
    }

    /// Cancel the connection task and forget queued messages and handlers
    pub fn close(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.shared.set_state(LinkState::Closed);
        {
            let mut outbound = self.shared.outbound.lock();
            outbound.sender = None;
            outbound.queue.clear();
        }
        self.shared.known_peers.write().clear();
        self.shared.handlers.clear();
        self.shared.notify();
        self.shared.listeners.write().clear();
        info!("Relay client {} closed", self.shared.peer_id);
    }
}

impl PubSubTransport for RelayClient {
    fn name(&self) -> &str {
        "relay"
    }

    fn subscribe(&self, kind: MessageKind, handler: MessageHandler) {
        self.shared.handlers.set(kind, handler);
    }

    fn broadcast(&self, kind: MessageKind, payload: Value) -> VotemeshResult<()> {
        if self.state() == LinkState::Closed {
            return Err(VotemeshError::TransportClosed);
        }
        self.shared.send_envelope(Envelope::new(kind, payload))
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

async fn supervise(shared: Arc<Shared>) {
    let url = shared.config.relay_url.clone();
    let max_attempts = shared.config.max_reconnect_attempts;

    loop {
        match connect_async(url.as_str()).await {
            Ok((stream, _)) => {
                info!("Connected to relay {} as {}", url, shared.peer_id);
                shared.attempts.store(0, Ordering::SeqCst);
                run_session(&shared, stream).await;
                info!("Disconnected from relay {}", url);
            }
            Err(e) => {
                warn!("Failed to connect to relay {}: {}", url, e);
            }
        }

        let attempt = shared.attempts.load(Ordering::SeqCst);
        if attempt >= max_attempts {
            error!(
                "Giving up on relay after {} reconnect attempts, continuing local-only",
                max_attempts
            );
            shared.set_state(LinkState::GaveUp);
            return;
        }

        shared.attempts.store(attempt + 1, Ordering::SeqCst);
        shared.set_state(LinkState::Reconnecting);
        info!("Reconnecting to relay (attempt {}/{})", attempt + 1, max_attempts);
        tokio::time::sleep(shared.config.reconnect_delay()).await;
    }
}

async fn run_session(shared: &Arc<Shared>, stream: RelayStream) {
    let (mut sink, mut source) = stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    if let Err(e) = shared.attach(tx) {
        warn!("Failed to attach to relay: {}", e);
    }
    shared.notify();
    if let Err(e) = shared.advertise() {
        warn!("Failed to advertise peer address: {}", e);
    }

    while let Some(frame) = source.next().await {
        match frame {
            Ok(Message::Text(text)) => shared.handle_text(&text),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("Relay connection error: {}", e);
                break;
            }
        }
    }

    shared.detach();
    shared.set_state(LinkState::Reconnecting);
    shared.notify();
    writer.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn offline_config() -> TransportConfig {
        TransportConfig {
            relay_url: "ws://127.0.0.1:9".to_string(),
            ..TransportConfig::default()
        }
    }

    #[test]
    fn test_queues_while_disconnected() {
        let client = RelayClient::new("me".into(), offline_config());

        client.broadcast(MessageKind::NewPoll, json!({"id": "p1"})).unwrap();
        client.broadcast(MessageKind::NewBlock, json!({"index": 1})).unwrap();

        assert_eq!(client.state(), LinkState::Idle);
        assert_eq!(client.queued(), 2);
        let kinds: Vec<_> = client.shared.outbound.lock().queue.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![MessageKind::NewPoll, MessageKind::NewBlock]);
    }

    #[test]
    fn test_status_excludes_self() {
        let client = RelayClient::new("me".into(), offline_config());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        client.on_status(Arc::new(move |status| sink.lock().push(status)));

        client
            .shared
            .handle_text(r#"{"type":"peer-list","peers":["me","a","b"]}"#);
        client.shared.handle_text(r#"{"type":"peer-left","peerId":"a"}"#);

        let counts: Vec<_> = seen.lock().iter().map(|s| s.peer_count).collect();
        assert_eq!(counts, vec![0, 2, 1]);
        assert!(seen.lock().iter().all(|s| !s.connected));
    }

    #[test]
    fn test_dispatches_application_frames() {
        let client = RelayClient::new("me".into(), offline_config());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        client.subscribe(
            MessageKind::NewBlock,
            Arc::new(move |payload| sink.lock().push(payload)),
        );

        client
            .shared
            .handle_text(r#"{"type":"new-block","data":{"index":4},"timestamp":1}"#);
        client.shared.handle_text("garbage");

        assert_eq!(*seen.lock(), vec![json!({"index": 4})]);
    }

    #[test]
    fn test_peer_addresses_fill_directory() {
        let client = RelayClient::new("me".into(), offline_config());
        client.shared.handle_text(
            r#"{"type":"peer-addresses","data":{"peerId":"a","relayUrl":"ws://r","gunPeers":[],"joinedAt":1}}"#,
        );
        client.shared.handle_text(
            r#"{"type":"peer-addresses","data":{"peerId":"me","relayUrl":"ws://r","gunPeers":[],"joinedAt":1}}"#,
        );
        assert_eq!(client.directory().len(), 1);

        client.shared.handle_text(r#"{"type":"peer-left","peerId":"a"}"#);
        assert!(client.directory().is_empty());
    }

    #[test]
    fn test_close_clears_everything() {
        let client = RelayClient::new("me".into(), offline_config());
        client.subscribe(MessageKind::NewPoll, Arc::new(|_| {}));
        client.broadcast(MessageKind::NewPoll, json!({})).unwrap();

        client.close();

        assert_eq!(client.state(), LinkState::Closed);
        assert_eq!(client.queued(), 0);
        assert!(client.shared.handlers.is_empty());
        assert!(matches!(
            client.broadcast(MessageKind::NewPoll, json!({})),
            Err(VotemeshError::TransportClosed)
        ));
        assert!(client.send_direct("x".into(), MessageKind::NewPoll, json!({})).is_err());
    }
}
