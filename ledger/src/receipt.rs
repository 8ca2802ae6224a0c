//! Vote receipts
//!
//! A receipt binds a vote to the block that committed it and to the chain
//! head at that moment. The mnemonic lets a voter check it by hand.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use votemesh_core::{Hash, Timestamp, VotemeshResult};
use votemesh_crypto::{mnemonic_matches, receipt_mnemonic};
use votemesh_state::{index_key, RecordKind, RecordStoreExt, SharedRecordStore};

use crate::block::Block;
use crate::vote::Vote;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub block_index: u64,
    pub vote_hash: Hash,
    pub chain_head_hash: Hash,
    pub mnemonic: String,
    pub timestamp: Timestamp,
    pub poll_id: String,
}

impl Receipt {
    /// Receipt for a vote just appended as `block`
    pub fn issue(block: &Block, vote: &Vote) -> Self {
        Self {
            block_index: block.index,
            vote_hash: block.vote_hash,
            chain_head_hash: block.current_hash,
            mnemonic: receipt_mnemonic(&block.current_hash),
            timestamp: block.timestamp,
            poll_id: vote.poll_id.clone(),
        }
    }

    /// Check the receipt against a chain snapshot
    pub fn verify(&self, chain: &[Block]) -> Result<(), ReceiptError> {
        let block = chain
            .get(self.block_index as usize)
            .ok_or(ReceiptError::UnknownBlock(self.block_index))?;

        if block.vote_hash != self.vote_hash {
            return Err(ReceiptError::VoteMismatch);
        }
        if block.current_hash != self.chain_head_hash {
            return Err(ReceiptError::HeadMismatch);
        }
        if !mnemonic_matches(&self.mnemonic, &self.chain_head_hash) {
            return Err(ReceiptError::BadMnemonic);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReceiptError {
    #[error("no block at index {0}")]
    UnknownBlock(u64),

    #[error("block commits a different vote")]
    VoteMismatch,

    #[error("block hash differs from the receipt head")]
    HeadMismatch,

    #[error("mnemonic does not match the head hash")]
    BadMnemonic,
}

/// Stored receipts, keyed by block index
pub struct ReceiptBook {
    store: SharedRecordStore,
}

impl ReceiptBook {
    pub fn new(store: SharedRecordStore) -> Self {
        Self { store }
    }

    pub async fn save(&self, receipt: &Receipt) -> VotemeshResult<()> {
        self.store
            .save_record(RecordKind::Receipts, &index_key(receipt.block_index), receipt)
            .await
    }

    /// All receipts, ordered by block index
    pub async fn all(&self) -> VotemeshResult<Vec<Receipt>> {
        let mut receipts: Vec<Receipt> = self.store.get_all_records(RecordKind::Receipts).await?;
        receipts.sort_by_key(|r| r.block_index);
        Ok(receipts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainLedger;
    use std::sync::Arc;
    use votemesh_crypto::KeyPair;
    use votemesh_state::MemoryRecordStore;

    #[tokio::test]
    async fn test_receipt_verifies_against_issuing_chain() {
        let store: SharedRecordStore = Arc::new(MemoryRecordStore::new());
        let ledger = ChainLedger::open(store.clone(), KeyPair::generate()).await.unwrap();
        ledger.initialize_genesis().await.unwrap();

        let vote = Vote::new("poll", "yes", "device");
        let block = ledger.append_vote(&vote).await.unwrap();
        let receipt = Receipt::issue(&block, &vote);

        // Later blocks do not invalidate an earlier receipt
        ledger.append_vote(&Vote::new("poll", "no", "device")).await.unwrap();
        assert_eq!(receipt.verify(&ledger.snapshot()), Ok(()));
        assert_eq!(receipt.mnemonic.split(' ').count(), 8);

        let mut forged = receipt.clone();
        forged.chain_head_hash = Hash::from_bytes([3u8; 32]);
        assert_eq!(forged.verify(&ledger.snapshot()), Err(ReceiptError::HeadMismatch));

        let mut misspelled = receipt.clone();
        misspelled.mnemonic = "baar baar baar baar baar baar baar baar".into();
        assert_eq!(misspelled.verify(&ledger.snapshot()), Err(ReceiptError::BadMnemonic));

        let mut far = receipt.clone();
        far.block_index = 99;
        assert_eq!(far.verify(&ledger.snapshot()), Err(ReceiptError::UnknownBlock(99)));

        let book = ReceiptBook::new(store);
        book.save(&receipt).await.unwrap();
        assert_eq!(book.all().await.unwrap(), vec![receipt]);
    }
}
