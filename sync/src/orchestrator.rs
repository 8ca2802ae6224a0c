//! Sync orchestrator
//!
//! Every attached transport feeds one inbound queue that a single task
//! drains in order, so the ledger only ever has one remote writer. The same
//! block arriving on two transports is admitted once and ignored the second
//! time.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use votemesh_core::{PeerId, VotemeshError, VotemeshResult};
use votemesh_ledger::{Admission, Block, ChainLedger, Poll, PollBook, Receipt, ReceiptBook, Vote};
use votemesh_p2p::{MessageKind, SharedTransport};

use crate::events::{Source, SyncEvent, SyncEventReceiver, SyncEventSender, EVENT_CAPACITY};

/// Source tag for changes made on this node
pub const LOCAL_SOURCE: &str = "local";

/// Message kinds the orchestrator listens for
const SUBSCRIBED: [MessageKind; 4] = [
    MessageKind::NewBlock,
    MessageKind::NewPoll,
    MessageKind::RequestSync,
    MessageKind::SyncResponse,
];

/// Body of a `sync-response`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPayload {
    #[serde(default)]
    pub blocks: Vec<Value>,
    #[serde(default)]
    pub polls: Vec<Value>,
    #[serde(default)]
    pub peer_id: Option<PeerId>,
}

#[derive(Debug)]
struct Inbound {
    source: Source,
    kind: MessageKind,
    payload: Value,
}

/// Connects the ledger to its transports
pub struct SyncOrchestrator {
    peer_id: PeerId,
    ledger: Arc<ChainLedger>,
    polls: PollBook,
    receipts: ReceiptBook,
    transports: RwLock<Vec<SharedTransport>>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Inbound>>>,
    events: SyncEventSender,
}

impl SyncOrchestrator {
    pub fn new(peer_id: PeerId, ledger: Arc<ChainLedger>) -> Arc<Self> {
        let store = ledger.store().clone();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Arc::new(Self {
            peer_id,
            ledger,
            polls: PollBook::new(store.clone()),
            receipts: ReceiptBook::new(store),
            transports: RwLock::new(Vec::new()),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            events,
        })
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn ledger(&self) -> &Arc<ChainLedger> {
        &self.ledger
    }

    pub fn polls(&self) -> &PollBook {
        &self.polls
    }

    pub fn receipts(&self) -> &ReceiptBook {
        &self.receipts
    }

    pub fn subscribe_events(&self) -> SyncEventReceiver {
        self.events.subscribe()
    }

    /// Register the sync handlers on a transport
    pub fn attach(&self, transport: SharedTransport) {
        let source: Source = transport.name().to_string();
        for kind in SUBSCRIBED {
            let tx = self.inbound_tx.clone();
            let source = source.clone();
            transport.subscribe(
                kind,
                Arc::new(move |payload| {
                    let _ = tx.send(Inbound {
                        source: source.clone(),
                        kind,
                        payload,
                    });
                }),
            );
        }
        self.transports.write().push(transport);
        info!("Sync attached to {} transport", source);
    }

    /// Spawn the task that processes inbound messages
    pub fn start(self: &Arc<Self>) -> VotemeshResult<JoinHandle<()>> {
        let mut rx = self
            .inbound_rx
            .lock()
            .take()
            .ok_or_else(|| VotemeshError::Internal("sync orchestrator already started".into()))?;

        let this = self.clone();
        Ok(tokio::spawn(async move {
            while let Some(inbound) = rx.recv().await {
                let kind = inbound.kind;
                if let Err(e) = this.handle(inbound).await {
                    warn!("Failed to handle {}: {}", kind, e);
                }
            }
        }))
    }

    async fn handle(&self, inbound: Inbound) -> VotemeshResult<()> {
        let Inbound { source, kind, payload } = inbound;
        debug!("Received {} via {}", kind, source);
        match kind {
            MessageKind::NewBlock => self.handle_new_block(payload, source).await,
            MessageKind::NewPoll => self.handle_new_poll(payload, source).await,
            MessageKind::RequestSync => self.handle_sync_request(payload, source).await,
            MessageKind::SyncResponse => self.handle_sync_response(payload, source).await,
            MessageKind::PeerAddresses => Ok(()),
        }
    }

    /// Commit a local vote, store its receipt and announce the block
    pub async fn submit_vote(&self, vote: Vote) -> VotemeshResult<Receipt> {
        let block = self.ledger.append_vote(&vote).await?;

        let receipt = Receipt::issue(&block, &vote);
        if let Err(e) = self.receipts.save(&receipt).await {
            warn!("Failed to store receipt for block {}: {}", block.index, e);
        }

        self.publish(MessageKind::NewBlock, serde_json::to_value(&block)?);
        self.emit(SyncEvent::BlockAppended {
            index: block.index,
            source: LOCAL_SOURCE.to_string(),
        });
        Ok(receipt)
    }

    /// Store a new poll and announce it
    pub async fn create_poll(&self, poll: Poll) -> VotemeshResult<Poll> {
        if poll.options.is_empty() {
            return Err(VotemeshError::InvalidVote("poll has no options".into()));
        }
        if self.polls.save_if_new(&poll).await? {
            self.emit(SyncEvent::PollSaved {
                id: poll.id.clone(),
                source: LOCAL_SOURCE.to_string(),
            });
        }
        self.publish(MessageKind::NewPoll, serde_json::to_value(&poll)?);
        Ok(poll)
    }

    /// Ask every reachable peer for its full state
    pub fn request_sync(&self) {
        self.publish(MessageKind::RequestSync, self.sync_request());
    }

    /// Ask for state on one transport only, e.g. after it reconnects
    pub fn request_sync_via(&self, transport_name: &str) {
        let transport = self
            .transports
            .read()
            .iter()
            .find(|t| t.name() == transport_name)
            .cloned();
        match transport {
            Some(transport) => {
                if let Err(e) = transport.broadcast(MessageKind::RequestSync, self.sync_request()) {
                    warn!("Failed to request sync via {}: {}", transport_name, e);
                }
            }
            None => warn!("No transport named {}", transport_name),
        }
    }

    fn sync_request(&self) -> Value {
        json!({ "peerId": self.peer_id })
    }

    async fn handle_new_block(&self, payload: Value, source: Source) -> VotemeshResult<()> {
        let block: Block = match serde_json::from_value(payload) {
            Ok(block) => block,
            Err(e) => {
                debug!("Ignoring malformed block from {}: {}", source, e);
                return Ok(());
            }
        };

        match self.ledger.admit(block).await? {
            Admission::Appended(index) => {
                info!("Block {} added via {}", index, source);
                self.emit(SyncEvent::BlockAppended { index, source });
            }
            Admission::Duplicate(index) => {
                debug!("Block {} already held", index);
            }
            Admission::Conflict(conflict) => {
                warn!(
                    "Peer block {} via {} conflicts with ours ({} vs {})",
                    conflict.index, source, conflict.remote_hash, conflict.local_hash
                );
                self.emit(SyncEvent::Conflict { conflict, source });
            }
            Admission::Rejected(reason) => {
                debug!("Discarded block from {}: {}", source, reason);
            }
        }
        Ok(())
    }

    async fn handle_new_poll(&self, payload: Value, source: Source) -> VotemeshResult<()> {
        let poll: Poll = match serde_json::from_value(payload) {
            Ok(poll) => poll,
            Err(e) => {
                debug!("Ignoring malformed poll from {}: {}", source, e);
                return Ok(());
            }
        };
        self.save_poll(poll, source).await
    }

    async fn save_poll(&self, poll: Poll, source: Source) -> VotemeshResult<()> {
        if self.polls.save_if_new(&poll).await? {
            info!("Saved poll {} via {}", poll.id, source);
            self.emit(SyncEvent::PollSaved { id: poll.id, source });
        }
        Ok(())
    }

    async fn handle_sync_request(&self, payload: Value, source: Source) -> VotemeshResult<()> {
        let requester = payload.get("peerId").and_then(Value::as_str).unwrap_or("unknown");
        if requester == self.peer_id {
            return Ok(());
        }
        debug!("Sync requested by {} via {}", requester, source);

        let response = SyncPayload {
            blocks: to_values(&self.ledger.snapshot())?,
            polls: to_values(&self.polls.all().await?)?,
            peer_id: Some(self.peer_id.clone()),
        };
        self.publish(MessageKind::SyncResponse, serde_json::to_value(&response)?);
        Ok(())
    }

    async fn handle_sync_response(&self, payload: Value, source: Source) -> VotemeshResult<()> {
        let payload: SyncPayload = match serde_json::from_value(payload) {
            Ok(payload) => payload,
            Err(e) => {
                debug!("Ignoring malformed sync response from {}: {}", source, e);
                return Ok(());
            }
        };
        if payload.peer_id.as_deref() == Some(self.peer_id.as_str()) {
            return Ok(());
        }

        let blocks: Vec<Block> = payload
            .blocks
            .into_iter()
            .filter_map(|value| serde_json::from_value(value).ok())
            .collect();
        if !blocks.is_empty() {
            let report = self.ledger.merge(blocks).await?;
            for conflict in report.conflicts.iter().copied() {
                self.emit(SyncEvent::Conflict {
                    conflict,
                    source: source.clone(),
                });
            }
            if report.changed() {
                info!("Added {} blocks from sync via {}", report.appended, source);
                self.emit(SyncEvent::SyncMerged {
                    appended: report.appended,
                    source: source.clone(),
                });
            }
        }

        for value in payload.polls {
            match serde_json::from_value::<Poll>(value) {
                Ok(poll) => self.save_poll(poll, source.clone()).await?,
                Err(e) => debug!("Skipping malformed poll in sync response: {}", e),
            }
        }
        Ok(())
    }

    /// Re-walk the local chain. A fault is logged and emitted, never repaired.
    pub fn self_audit(&self) -> bool {
        match self.ledger.audit() {
            Ok(()) => {
                debug!("Self-audit passed for {} blocks", self.ledger.len());
                true
            }
            Err(fault) => {
                warn!("Self-audit failed at {}", fault);
                self.emit(SyncEvent::AuditFailed {
                    index: fault.index,
                    reason: fault.reason.to_string(),
                });
                false
            }
        }
    }

    /// Publish on every attached transport. Failures stay local to that transport.
    fn publish(&self, kind: MessageKind, payload: Value) {
        let transports = self.transports.read().clone();
        for transport in transports {
            if let Err(e) = transport.broadcast(kind, payload.clone()) {
                warn!("Failed to publish {} via {}: {}", kind, transport.name(), e);
            }
        }
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

fn to_values<T: Serialize>(items: &[T]) -> VotemeshResult<Vec<Value>> {
    items
        .iter()
        .map(|item| serde_json::to_value(item).map_err(VotemeshError::from))
        .collect()
}
