//! Node runtime combining all components

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use votemesh_core::{NodeConfig, PeerId, StoreBackend, VotemeshError, VotemeshResult};
use votemesh_crypto::keys::KeyPair;
use votemesh_ledger::{ChainLedger, Poll, PollResults, Receipt, Vote};
use votemesh_p2p::{
    create_local_bus, generate_peer_id, ConnectionStatus, LinkState, LocalChannel,
    PubSubTransport, RelayClient, SharedLocalBus,
};
use votemesh_state::{create_memory_store, create_persistent_store, SharedRecordStore};
use votemesh_sync::{SyncEventReceiver, SyncOrchestrator};

use crate::audit::{AuditClient, VOTE_RECEIPT};

/// Node runtime managing all components
pub struct NodeRuntime {
    config: NodeConfig,
    peer_id: PeerId,
    device_id: String,
    orchestrator: Arc<SyncOrchestrator>,
    local: Arc<LocalChannel>,
    relay: Arc<RelayClient>,
    audit: AuditClient,
    started: AtomicBool,
}

impl NodeRuntime {
    /// Open the configured store and build the runtime on a private bus
    pub async fn new(config: NodeConfig, keypair: KeyPair) -> VotemeshResult<Self> {
        let store: SharedRecordStore = match config.store.backend {
            StoreBackend::Memory => create_memory_store(),
            StoreBackend::Sled => create_persistent_store(config.data_dir.join("db"))?,
        };
        Self::with_store(config, keypair, store, create_local_bus()).await
    }

    /// Build the runtime on a given store and local bus
    pub async fn with_store(
        config: NodeConfig,
        keypair: KeyPair,
        store: SharedRecordStore,
        bus: SharedLocalBus,
    ) -> VotemeshResult<Self> {
        let read_timeout = config.store.read_timeout();
        let ledger = match tokio::time::timeout(
            read_timeout,
            ChainLedger::open(store.clone(), keypair.clone()),
        )
        .await
        {
            Ok(opened) => opened?,
            Err(_) => {
                // Stored blocks stay authoritative: appends at their indexes are refused
                warn!(
                    "Loading blocks took longer than {:?}, starting from an empty chain",
                    read_timeout
                );
                ChainLedger::with_blocks(store, keypair.clone(), Vec::new())
            }
        };
        ledger.initialize_genesis().await?;

        let peer_id = generate_peer_id();
        let device_id = keypair.device_id();
        let orchestrator = SyncOrchestrator::new(peer_id.clone(), Arc::new(ledger));
        let relay = Arc::new(RelayClient::new(peer_id.clone(), config.transport.clone()));
        let audit = AuditClient::new(&config.audit)?;

        Ok(Self {
            config,
            peer_id,
            device_id,
            orchestrator,
            local: Arc::new(bus.join()),
            relay,
            audit,
            started: AtomicBool::new(false),
        })
    }

    /// Attach both transports and start syncing
    pub fn start(&self) -> VotemeshResult<JoinHandle<()>> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(VotemeshError::Internal("node runtime already started".into()));
        }

        self.orchestrator.attach(self.local.clone());
        self.orchestrator.attach(self.relay.clone());
        self.install_sync_on_connect();
        if let Some(period) = self.config.audit_interval() {
            self.spawn_self_audit(period);
        }
        let handle = self.orchestrator.start()?;

        self.orchestrator.request_sync_via(self.local.name());
        self.relay.connect();
        info!("Node {} syncing via local bus and {}", self.peer_id, self.relay.relay_url());
        Ok(handle)
    }

    /// Ask relay peers for history every time the relay link comes up
    fn install_sync_on_connect(&self) {
        let orchestrator = Arc::downgrade(&self.orchestrator);
        let delay = self.config.transport.sync_request_delay();
        let relay_name = self.relay.name().to_string();
        let was_connected = AtomicBool::new(false);

        self.relay.on_status(Arc::new(move |status: ConnectionStatus| {
            let previously = was_connected.swap(status.connected, Ordering::SeqCst);
            if !status.connected || previously {
                return;
            }
            let orchestrator = orchestrator.clone();
            let relay_name = relay_name.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(orchestrator) = orchestrator.upgrade() {
                    debug!("Requesting sync after relay connect");
                    orchestrator.request_sync_via(&relay_name);
                }
            });
        }));
    }

    /// Re-validate the chain every `period`, starting now
    fn spawn_self_audit(&self, period: Duration) {
        let orchestrator = Arc::downgrade(&self.orchestrator);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                match orchestrator.upgrade() {
                    Some(orchestrator) => {
                        orchestrator.self_audit();
                    }
                    None => break,
                }
            }
        });
    }

    /// Authorize, commit and announce a vote from this device
    pub async fn submit_vote(&self, poll_id: &str, choice: &str) -> VotemeshResult<Receipt> {
        if let Some(poll) = self.orchestrator.polls().get(poll_id).await? {
            if !poll.has_option(choice) {
                return Err(VotemeshError::InvalidVote(format!(
                    "{} is not an option of poll {}",
                    choice, poll_id
                )));
            }
        }
        if !self.audit.authorize_vote(poll_id, &self.device_id).await {
            return Err(VotemeshError::VoteNotAuthorized(poll_id.to_string()));
        }

        let vote = Vote::new(poll_id, choice, self.device_id.clone());
        let receipt = self.orchestrator.submit_vote(vote).await?;
        info!("Vote on {} committed as block {}", poll_id, receipt.block_index);

        self.audit.log_receipt(VOTE_RECEIPT, &receipt).await;
        Ok(receipt)
    }

    pub async fn create_poll(&self, poll: Poll) -> VotemeshResult<Poll> {
        self.orchestrator.create_poll(poll).await
    }

    pub async fn polls(&self) -> VotemeshResult<Vec<Poll>> {
        self.orchestrator.polls().all().await
    }

    pub async fn poll_results(&self, poll_id: &str) -> VotemeshResult<PollResults> {
        self.orchestrator.polls().results(poll_id).await
    }

    pub async fn receipts(&self) -> VotemeshResult<Vec<Receipt>> {
        self.orchestrator.receipts().all().await
    }

    pub fn ledger(&self) -> &Arc<ChainLedger> {
        self.orchestrator.ledger()
    }

    pub fn subscribe_events(&self) -> SyncEventReceiver {
        self.orchestrator.subscribe_events()
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn relay_status(&self) -> ConnectionStatus {
        self.relay.status()
    }

    pub fn relay_state(&self) -> LinkState {
        self.relay.state()
    }

    pub fn queued_messages(&self) -> usize {
        self.relay.queued()
    }

    pub fn known_peer_addresses(&self) -> usize {
        self.relay.directory().len()
    }

    /// Close both transports
    pub fn shutdown(&self) {
        self.relay.close();
        self.local.close();
        info!("Node {} transports closed", self.peer_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use votemesh_core::TransportConfig;
    use votemesh_ledger::Block;
    use votemesh_state::{
        index_key, MemoryRecordStore, RecordKind, RecordStore, RecordStoreExt,
    };
    use votemesh_sync::SyncEvent;

    /// Store whose full scans outlast the startup read timeout
    struct SlowStore {
        inner: MemoryRecordStore,
        delay: Duration,
    }

    #[async_trait]
    impl RecordStore for SlowStore {
        async fn save(&self, kind: RecordKind, id: &str, record: Vec<u8>) -> VotemeshResult<()> {
            self.inner.save(kind, id, record).await
        }

        async fn get(&self, kind: RecordKind, id: &str) -> VotemeshResult<Option<Vec<u8>>> {
            self.inner.get(kind, id).await
        }

        async fn get_all(&self, kind: RecordKind) -> VotemeshResult<Vec<Vec<u8>>> {
            tokio::time::sleep(self.delay).await;
            self.inner.get_all(kind).await
        }
    }

    fn offline_config() -> NodeConfig {
        let mut config = NodeConfig::default();
        config.transport = TransportConfig {
            relay_url: "ws://127.0.0.1:9".to_string(),
            max_reconnect_attempts: 0,
            reconnect_delay_ms: 10,
            ..TransportConfig::default()
        };
        config.store.backend = StoreBackend::Memory;
        config
    }

    async fn runtime_on(bus: &SharedLocalBus) -> NodeRuntime {
        NodeRuntime::with_store(
            offline_config(),
            KeyPair::generate(),
            Arc::new(MemoryRecordStore::new()),
            bus.clone(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_new_runtime_has_genesis() {
        let runtime = NodeRuntime::new(offline_config(), KeyPair::generate())
            .await
            .unwrap();
        assert_eq!(runtime.ledger().len(), 1);
        assert!(runtime.ledger().validate_chain());
        assert_eq!(runtime.relay_state(), LinkState::Idle);
    }

    #[tokio::test]
    async fn test_runtimes_share_votes_over_local_bus() {
        let bus = create_local_bus();
        let a = runtime_on(&bus).await;
        let b = runtime_on(&bus).await;
        a.start().unwrap();
        b.start().unwrap();
        assert!(a.start().is_err());

        let poll = a
            .create_poll(Poll::new("Lunch", "", vec!["pizza".into(), "sushi".into()]))
            .await
            .unwrap();
        let receipt = a.submit_vote(&poll.id, "pizza").await.unwrap();
        assert_eq!(receipt.block_index, 1);
        assert!(matches!(
            a.submit_vote(&poll.id, "tacos").await,
            Err(VotemeshError::InvalidVote(_))
        ));

        tokio::time::timeout(Duration::from_secs(5), async {
            while b.ledger().len() < 2 || b.polls().await.unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(b.ledger().snapshot(), a.ledger().snapshot());
        assert_eq!(a.receipts().await.unwrap(), vec![receipt]);
        assert_eq!(a.poll_results(&poll.id).await.unwrap().total_votes, 1);

        // The relay is unreachable and gives up without touching the ledger
        tokio::time::timeout(Duration::from_secs(5), async {
            while a.relay_state() != LinkState::GaveUp {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
        a.shutdown();
        assert_eq!(a.relay_state(), LinkState::Closed);
    }

    #[tokio::test]
    async fn test_slow_store_never_loses_persisted_blocks() {
        let store: SharedRecordStore = Arc::new(SlowStore {
            inner: MemoryRecordStore::new(),
            delay: Duration::from_millis(300),
        });
        let seeded = ChainLedger::with_blocks(store.clone(), KeyPair::generate(), Vec::new());
        seeded.initialize_genesis().await.unwrap();
        let kept = seeded.append_vote(&Vote::new("p", "yes", "d")).await.unwrap();

        let mut config = offline_config();
        config.store.read_timeout_ms = 50;
        let runtime = NodeRuntime::with_store(config, KeyPair::generate(), store.clone(), create_local_bus())
            .await
            .unwrap();
        assert_eq!(runtime.ledger().len(), 1);

        assert!(matches!(
            runtime.submit_vote("p", "no").await,
            Err(VotemeshError::ChainCorruption(_))
        ));
        let stored: Block = store
            .get_record(RecordKind::Blocks, &index_key(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.current_hash, kept.current_hash);
        assert_eq!(runtime.ledger().len(), 1);
    }

    #[tokio::test]
    async fn test_periodic_self_audit_flags_tampered_store() {
        let store: SharedRecordStore = Arc::new(MemoryRecordStore::new());
        let seeded = ChainLedger::with_blocks(store.clone(), KeyPair::generate(), Vec::new());
        seeded.initialize_genesis().await.unwrap();
        let mut block = seeded.append_vote(&Vote::new("p", "yes", "d")).await.unwrap();
        block.nonce += 1;
        store
            .save_record(RecordKind::Blocks, &index_key(1), &block)
            .await
            .unwrap();

        let mut config = offline_config();
        config.audit_interval_ms = 20;
        let runtime = NodeRuntime::with_store(config, KeyPair::generate(), store, create_local_bus())
            .await
            .unwrap();
        let mut events = runtime.subscribe_events();
        runtime.start().unwrap();

        let index = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let SyncEvent::AuditFailed { index, .. } = events.recv().await.unwrap() {
                    return index;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(index, 1);
        assert_eq!(runtime.ledger().len(), 2);
        runtime.shutdown();
    }

    #[tokio::test]
    async fn test_late_joiner_catches_up_on_start() {
        let bus = create_local_bus();
        let a = runtime_on(&bus).await;
        a.start().unwrap();
        a.submit_vote("poll", "yes").await.unwrap();
        a.submit_vote("poll", "no").await.unwrap();

        let late = runtime_on(&bus).await;
        late.start().unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while late.ledger().len() < 3 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
        assert!(late.ledger().validate_chain());
    }
}
