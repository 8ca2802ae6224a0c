//! The local chain
//!
//! Writes go through one async lock so that persisting a block and
//! extending the in-memory view happen as one step. Readers take cloned
//! snapshots and never wait on I/O.

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use votemesh_core::{Hash, Hashable, PublicKey, VotemeshError, VotemeshResult};
use votemesh_crypto::KeyPair;
use votemesh_state::{index_key, RecordKind, RecordStoreExt, SharedRecordStore};

use crate::block::{audit_chain, check_block, Block, BlockRejection, ChainFault, GENESIS_PREVIOUS_HASH};
use crate::vote::Vote;

/// Two different blocks claiming the same index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub index: u64,
    pub local_hash: Hash,
    pub remote_hash: Hash,
}

/// Outcome of offering a remote block to the chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Appended(u64),
    /// Same block already held
    Duplicate(u64),
    /// A different block already holds this index
    Conflict(Conflict),
    Rejected(BlockRejection),
}

/// Summary of merging a batch of remote blocks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub appended: usize,
    pub duplicates: usize,
    pub rejected: usize,
    pub conflicts: Vec<Conflict>,
}

impl MergeReport {
    pub fn changed(&self) -> bool {
        self.appended > 0
    }
}

/// Owner of the local chain
pub struct ChainLedger {
    store: SharedRecordStore,
    keypair: KeyPair,
    blocks: RwLock<Vec<Block>>,
    write_lock: Mutex<()>,
}

impl ChainLedger {
    /// Load persisted blocks, ordered by index
    pub async fn open(store: SharedRecordStore, keypair: KeyPair) -> VotemeshResult<Self> {
        let mut blocks: Vec<Block> = store.get_all_records(RecordKind::Blocks).await?;
        blocks.sort_by_key(|b| b.index);
        info!("Loaded {} blocks from the local store", blocks.len());
        if let Err(fault) = audit_chain(&blocks) {
            error!("Stored chain fails validation at {}", fault);
        }
        Ok(Self::with_blocks(store, keypair, blocks))
    }

    /// Start from an already loaded block list
    pub fn with_blocks(store: SharedRecordStore, keypair: KeyPair, blocks: Vec<Block>) -> Self {
        Self {
            store,
            keypair,
            blocks: RwLock::new(blocks),
            write_lock: Mutex::new(()),
        }
    }

    /// Install the genesis block if the chain is empty
    pub async fn initialize_genesis(&self) -> VotemeshResult<Option<Block>> {
        let _guard = self.write_lock.lock().await;
        if !self.blocks.read().is_empty() {
            return Ok(None);
        }

        let genesis = Block::genesis();
        self.persist(&genesis).await?;
        self.blocks.write().push(genesis.clone());
        info!("Created genesis block {}", genesis.current_hash);
        Ok(Some(genesis))
    }

    /// Commit a vote as the next block.
    ///
    /// The block is durable before it becomes visible. If it cannot be
    /// saved the chain is left untouched and the error is returned.
    pub async fn append_vote(&self, vote: &Vote) -> VotemeshResult<Block> {
        let _guard = self.write_lock.lock().await;

        let (index, previous_hash) = {
            let blocks = self.blocks.read();
            let previous_hash = blocks
                .last()
                .map(|b| b.current_hash)
                .unwrap_or(GENESIS_PREVIOUS_HASH);
            (blocks.len() as u64, previous_hash)
        };

        let block = Block::seal(index, previous_hash, vote.hash(), &self.keypair);
        self.persist(&block).await?;
        if let Err(e) = self
            .store
            .save_record(RecordKind::Votes, &index_key(index), vote)
            .await
        {
            // The block is already committed; the vote copy only feeds tallies
            warn!("Failed to save vote for block {}: {}", index, e);
        }

        self.blocks.write().push(block.clone());
        info!("Appended block {} for poll {}", index, vote.poll_id);
        Ok(block)
    }

    /// Offer a block heard from another peer.
    ///
    /// Only the genesis of an empty chain or the direct successor of the
    /// head is appended. Everything else is reported back, never applied.
    pub async fn admit(&self, block: Block) -> VotemeshResult<Admission> {
        let _guard = self.write_lock.lock().await;

        let verdict = {
            let blocks = self.blocks.read();
            match blocks.get(block.index as usize) {
                Some(existing) if existing.current_hash == block.current_hash => {
                    return Ok(Admission::Duplicate(block.index));
                }
                Some(existing) => {
                    return Ok(Admission::Conflict(Conflict {
                        index: block.index,
                        local_hash: existing.current_hash,
                        remote_hash: block.current_hash,
                    }));
                }
                None => match blocks.last() {
                    None => block.check_genesis(),
                    Some(head) => check_block(&block, head),
                },
            }
        };

        if let Err(reason) = verdict {
            debug!("Rejected block {}: {}", block.index, reason);
            return Ok(Admission::Rejected(reason));
        }

        let index = block.index;
        self.persist(&block).await?;
        self.blocks.write().push(block);
        debug!("Admitted block {}", index);
        Ok(Admission::Appended(index))
    }

    /// Admit a batch of blocks in index order. Replaying a batch is a no-op.
    pub async fn merge(&self, mut blocks: Vec<Block>) -> VotemeshResult<MergeReport> {
        blocks.sort_by_key(|b| b.index);

        let mut report = MergeReport::default();
        for block in blocks {
            match self.admit(block).await? {
                Admission::Appended(_) => report.appended += 1,
                Admission::Duplicate(_) => report.duplicates += 1,
                Admission::Conflict(conflict) => report.conflicts.push(conflict),
                Admission::Rejected(_) => report.rejected += 1,
            }
        }
        Ok(report)
    }

    /// Check a candidate against a given predecessor
    pub fn validate_block(&self, candidate: &Block, previous: &Block) -> bool {
        check_block(candidate, previous).is_ok()
    }

    /// Walk the local chain from genesis
    pub fn audit(&self) -> Result<(), ChainFault> {
        audit_chain(&self.blocks.read())
    }

    /// True if the local chain is intact. An empty chain is valid.
    pub fn validate_chain(&self) -> bool {
        match self.audit() {
            Ok(()) => true,
            Err(fault) => {
                warn!("Chain validation failed at {}", fault);
                false
            }
        }
    }

    /// True if we hold a different block at `remote_index` than the one
    /// the remote claims. Indexes we do not hold yet are not a downgrade.
    pub fn detect_downgrade(&self, remote_head_hash: &Hash, remote_index: u64) -> bool {
        self.blocks
            .read()
            .get(remote_index as usize)
            .map_or(false, |local| local.current_hash != *remote_head_hash)
    }

    pub fn snapshot(&self) -> Vec<Block> {
        self.blocks.read().clone()
    }

    pub fn head(&self) -> Option<Block> {
        self.blocks.read().last().cloned()
    }

    pub fn block_at(&self, index: u64) -> Option<Block> {
        self.blocks.read().get(index as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }

    /// Key that signs blocks appended here
    pub fn signer(&self) -> PublicKey {
        self.keypair.public_key()
    }

    pub fn store(&self) -> &SharedRecordStore {
        &self.store
    }

    /// Save a block under its index. A different block already stored at
    /// that index is never replaced.
    async fn persist(&self, block: &Block) -> VotemeshResult<()> {
        let key = index_key(block.index);
        if let Some(stored) = self
            .store
            .get_record::<Block>(RecordKind::Blocks, &key)
            .await?
        {
            if stored.current_hash != block.current_hash {
                return Err(VotemeshError::ChainCorruption(format!(
                    "block {} is already stored as {}",
                    block.index, stored.current_hash
                )));
            }
        }
        self.store.save_record(RecordKind::Blocks, &key, block).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;
    use votemesh_core::Timestamp;
    use votemesh_state::{MemoryRecordStore, RecordStore};

    struct FailingStore;

    #[async_trait]
    impl RecordStore for FailingStore {
        async fn save(&self, _: RecordKind, _: &str, _: Vec<u8>) -> VotemeshResult<()> {
            Err(VotemeshError::StorageError("disk full".into()))
        }

        async fn get(&self, _: RecordKind, _: &str) -> VotemeshResult<Option<Vec<u8>>> {
            Ok(None)
        }

        async fn get_all(&self, _: RecordKind) -> VotemeshResult<Vec<Vec<u8>>> {
            Ok(Vec::new())
        }
    }

    async fn ledger() -> ChainLedger {
        let store: SharedRecordStore = Arc::new(MemoryRecordStore::new());
        let ledger = ChainLedger::open(store, KeyPair::generate()).await.unwrap();
        ledger.initialize_genesis().await.unwrap();
        ledger
    }

    fn vote(choice: &str) -> Vote {
        Vote::new("poll", choice, "device")
    }

    #[tokio::test]
    async fn test_appended_block_validates_against_head() {
        let ledger = ledger().await;
        for choice in ["a", "b", "c"] {
            let head = ledger.head().unwrap();
            let block = ledger.append_vote(&vote(choice)).await.unwrap();
            assert!(ledger.validate_block(&block, &head));
        }
        assert_eq!(ledger.len(), 4);
        assert!(ledger.validate_chain());
    }

    #[tokio::test]
    async fn test_any_mutation_breaks_chain() {
        let ledger = ledger().await;
        for choice in ["a", "b", "c"] {
            ledger.append_vote(&vote(choice)).await.unwrap();
        }
        let original = ledger.snapshot();

        let mutations: [fn(&mut Block); 8] = [
            |b: &mut Block| b.index += 7,
            |b: &mut Block| b.timestamp = Timestamp::from_millis(b.timestamp.as_millis() + 1),
            |b: &mut Block| b.previous_hash = Hash::from_bytes([9u8; 32]),
            |b: &mut Block| b.vote_hash = Hash::from_bytes([8u8; 32]),
            |b: &mut Block| b.signature.0[0] ^= 1,
            |b: &mut Block| b.current_hash = Hash::from_bytes([7u8; 32]),
            |b: &mut Block| b.nonce += 1,
            |b: &mut Block| b.event_id = Some("evt".into()),
        ];

        for position in 0..original.len() {
            for mutate in &mutations {
                let mut blocks = original.clone();
                mutate(&mut blocks[position]);
                let tampered = ChainLedger::with_blocks(
                    Arc::new(MemoryRecordStore::new()),
                    KeyPair::generate(),
                    blocks,
                );
                assert!(!tampered.validate_chain(), "mutation at {} went unnoticed", position);
            }
        }
    }

    #[tokio::test]
    async fn test_persistence_failure_leaves_chain_unchanged() {
        let store: SharedRecordStore = Arc::new(FailingStore);
        let ledger = ChainLedger::with_blocks(store, KeyPair::generate(), vec![Block::genesis()]);

        assert!(ledger.append_vote(&vote("a")).await.is_err());
        assert_eq!(ledger.len(), 1);
        assert!(ledger.initialize_genesis().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stored_block_is_never_replaced() {
        let store: SharedRecordStore = Arc::new(MemoryRecordStore::new());
        let original = ChainLedger::open(store.clone(), KeyPair::generate()).await.unwrap();
        original.initialize_genesis().await.unwrap();
        let kept = original.append_vote(&vote("a")).await.unwrap();

        // A view that never saw block 1
        let blind = ChainLedger::with_blocks(store.clone(), KeyPair::generate(), vec![Block::genesis()]);
        assert!(matches!(
            blind.append_vote(&vote("b")).await,
            Err(VotemeshError::ChainCorruption(_))
        ));
        assert_eq!(blind.len(), 1);

        let stored: Block = store
            .get_record(RecordKind::Blocks, &index_key(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.current_hash, kept.current_hash);

        // The same block may be saved again
        assert_eq!(blind.admit(kept).await.unwrap(), Admission::Appended(1));
    }

    #[tokio::test]
    async fn test_open_keeps_tampered_blocks_for_audit() {
        let store: SharedRecordStore = Arc::new(MemoryRecordStore::new());
        let ledger = ChainLedger::open(store.clone(), KeyPair::generate()).await.unwrap();
        ledger.initialize_genesis().await.unwrap();
        let mut block = ledger.append_vote(&vote("a")).await.unwrap();
        block.vote_hash = Hash::from_bytes([3u8; 32]);
        store
            .save_record(RecordKind::Blocks, &index_key(1), &block)
            .await
            .unwrap();

        let reopened = ChainLedger::open(store, KeyPair::generate()).await.unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.audit().unwrap_err().index, 1);
        assert!(!reopened.validate_chain());
    }

    #[tokio::test]
    async fn test_reopen_restores_order() {
        let store: SharedRecordStore = Arc::new(MemoryRecordStore::new());
        let keypair = KeyPair::generate();
        {
            let ledger = ChainLedger::open(store.clone(), keypair.clone()).await.unwrap();
            ledger.initialize_genesis().await.unwrap();
            for choice in ["a", "b", "c", "d", "e", "f", "g", "h", "i", "j", "k"] {
                ledger.append_vote(&vote(choice)).await.unwrap();
            }
        }

        let reopened = ChainLedger::open(store, keypair).await.unwrap();
        assert_eq!(reopened.len(), 12);
        assert!(reopened.validate_chain());
    }

    #[tokio::test]
    async fn test_detect_downgrade() {
        let ledger = ledger().await;
        for choice in ["a", "b", "c", "d", "e"] {
            ledger.append_vote(&vote(choice)).await.unwrap();
        }
        let h5 = ledger.block_at(5).unwrap().current_hash;

        assert!(!ledger.detect_downgrade(&h5, 5));
        assert!(ledger.detect_downgrade(&Hash::from_bytes([1u8; 32]), 5));
        assert!(!ledger.detect_downgrade(&Hash::from_bytes([1u8; 32]), 6));
    }

    #[tokio::test]
    async fn test_admission_rules() {
        let source = ledger().await;
        let first = source.append_vote(&vote("a")).await.unwrap();
        let second = source.append_vote(&vote("b")).await.unwrap();

        let store: SharedRecordStore = Arc::new(MemoryRecordStore::new());
        let target = ChainLedger::open(store, KeyPair::generate()).await.unwrap();

        // Empty chain only takes a genesis
        assert!(matches!(
            target.admit(first.clone()).await.unwrap(),
            Admission::Rejected(BlockRejection::NotGenesis)
        ));
        assert_eq!(target.admit(Block::genesis()).await.unwrap(), Admission::Appended(0));

        // Out of order
        assert!(matches!(
            target.admit(second.clone()).await.unwrap(),
            Admission::Rejected(BlockRejection::IndexMismatch { expected: 1, actual: 2 })
        ));
        assert_eq!(target.admit(first.clone()).await.unwrap(), Admission::Appended(1));
        assert_eq!(target.admit(first).await.unwrap(), Admission::Duplicate(1));
        assert_eq!(target.admit(second).await.unwrap(), Admission::Appended(2));

        // A different block for an occupied index
        let rival = ledger().await.append_vote(&vote("z")).await.unwrap();
        assert!(matches!(
            target.admit(rival).await.unwrap(),
            Admission::Conflict(Conflict { index: 1, .. })
        ));
        assert_eq!(target.len(), 3);
    }

    #[tokio::test]
    async fn test_merge_is_idempotent() {
        let source = ledger().await;
        for choice in ["a", "b", "c"] {
            source.append_vote(&vote(choice)).await.unwrap();
        }
        let mut payload = source.snapshot();
        payload.reverse();

        let store: SharedRecordStore = Arc::new(MemoryRecordStore::new());
        let target = ChainLedger::open(store, KeyPair::generate()).await.unwrap();

        let first = target.merge(payload.clone()).await.unwrap();
        assert_eq!(first.appended, 4);
        let after_first = target.snapshot();

        let second = target.merge(payload).await.unwrap();
        assert!(!second.changed());
        assert_eq!(second.duplicates, 4);
        assert_eq!(target.snapshot(), after_first);
        assert!(target.validate_chain());
    }
}
