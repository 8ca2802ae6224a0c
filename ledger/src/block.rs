//! Blocks and the rules that link them

use serde::{Deserialize, Serialize};
use thiserror::Error;
use votemesh_core::{Hash, Hashable, PublicKey, Signable, Signature, Timestamp, Verifiable};
use votemesh_crypto::{hash, sign, verify_record, IncrementalHasher, KeyPair};

/// Seed of the genesis vote hash
pub const GENESIS_SEED: &[u8] = b"votemesh-genesis";

/// Previous hash carried by the genesis block
pub const GENESIS_PREVIOUS_HASH: Hash = Hash::ZERO;

const BLOCK_DOMAIN: &[u8] = b"votemesh-block-v1";

/// One immutable, hash-linked record committing a single vote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub index: u64,
    pub timestamp: Timestamp,
    pub previous_hash: Hash,
    pub vote_hash: Hash,
    pub signature: Signature,
    pub current_hash: Hash,
    pub nonce: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pubkey: Option<PublicKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

impl Block {
    /// The genesis block. Identical on every peer.
    pub fn genesis() -> Self {
        let mut block = Self {
            index: 0,
            timestamp: Timestamp::from_millis(0),
            previous_hash: GENESIS_PREVIOUS_HASH,
            vote_hash: hash(GENESIS_SEED),
            signature: Signature::EMPTY,
            current_hash: Hash::ZERO,
            nonce: 0,
            pubkey: None,
            event_id: None,
        };
        block.current_hash = block.compute_hash();
        block
    }

    /// Build and sign the block committing `vote_hash` after `previous_hash`
    pub fn seal(index: u64, previous_hash: Hash, vote_hash: Hash, keypair: &KeyPair) -> Self {
        let mut block = Self {
            index,
            timestamp: Timestamp::now(),
            previous_hash,
            vote_hash,
            signature: Signature::EMPTY,
            current_hash: Hash::ZERO,
            nonce: rand::random::<u32>() as u64,
            pubkey: Some(keypair.public_key()),
            event_id: None,
        };
        block.signature = sign(keypair, &block.signing_bytes());
        block.current_hash = block.compute_hash();
        block
    }

    /// Recompute the block hash from its fields
    pub fn compute_hash(&self) -> Hash {
        let mut hasher = IncrementalHasher::new();
        hasher.update_prefixed(&self.signing_bytes());
        hasher.update(self.signature.as_bytes());
        hasher.finalize()
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    /// Check the fields that do not depend on a predecessor
    pub fn check_integrity(&self) -> Result<(), BlockRejection> {
        let computed = self.compute_hash();
        if computed != self.current_hash {
            return Err(BlockRejection::HashMismatch {
                stored: self.current_hash,
                computed,
            });
        }
        verify_record(self).map_err(|_| BlockRejection::BadSignature)
    }

    /// Check a block offered as the first block of an empty chain
    pub fn check_genesis(&self) -> Result<(), BlockRejection> {
        if self.index != 0 || self.previous_hash != GENESIS_PREVIOUS_HASH {
            return Err(BlockRejection::NotGenesis);
        }
        self.check_integrity()
    }
}

impl Signable for Block {
    fn signing_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(160);
        bytes.extend_from_slice(BLOCK_DOMAIN);
        bytes.extend_from_slice(&self.index.to_le_bytes());
        bytes.extend_from_slice(&self.timestamp.as_millis().to_le_bytes());
        bytes.extend_from_slice(self.previous_hash.as_bytes());
        bytes.extend_from_slice(self.vote_hash.as_bytes());
        bytes.extend_from_slice(&self.nonce.to_le_bytes());
        match &self.pubkey {
            Some(key) => {
                bytes.push(1);
                bytes.extend_from_slice(key.as_bytes());
            }
            None => bytes.push(0),
        }
        match &self.event_id {
            Some(event_id) => {
                bytes.push(1);
                bytes.extend_from_slice(&(event_id.len() as u64).to_le_bytes());
                bytes.extend_from_slice(event_id.as_bytes());
            }
            None => bytes.push(0),
        }
        bytes
    }
}

impl Verifiable for Block {
    fn signer(&self) -> Option<&PublicKey> {
        self.pubkey.as_ref()
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }
}

impl Hashable for Block {
    fn hash(&self) -> Hash {
        self.compute_hash()
    }
}

/// Why a block was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockRejection {
    #[error("expected index {expected}, got {actual}")]
    IndexMismatch { expected: u64, actual: u64 },

    #[error("previous hash does not link to {expected}")]
    BrokenLink { expected: Hash },

    #[error("stored hash {stored} does not match computed {computed}")]
    HashMismatch { stored: Hash, computed: Hash },

    #[error("signature does not verify")]
    BadSignature,

    #[error("not a genesis block")]
    NotGenesis,
}

/// Check that `candidate` is a valid successor of `previous`
pub fn check_block(candidate: &Block, previous: &Block) -> Result<(), BlockRejection> {
    let expected = previous.index + 1;
    if candidate.index != expected {
        return Err(BlockRejection::IndexMismatch {
            expected,
            actual: candidate.index,
        });
    }
    if candidate.previous_hash != previous.current_hash {
        return Err(BlockRejection::BrokenLink {
            expected: previous.current_hash,
        });
    }
    candidate.check_integrity()
}

/// Boolean form of [`check_block`]
pub fn validate_block(candidate: &Block, previous: &Block) -> bool {
    check_block(candidate, previous).is_ok()
}

/// First violation found while walking a chain
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("block {index}: {reason}")]
pub struct ChainFault {
    pub index: u64,
    pub reason: BlockRejection,
}

/// Walk a chain from genesis and report the first violation
pub fn audit_chain(blocks: &[Block]) -> Result<(), ChainFault> {
    let Some(first) = blocks.first() else {
        return Ok(());
    };
    first.check_genesis().map_err(|reason| ChainFault {
        index: first.index,
        reason,
    })?;

    for pair in blocks.windows(2) {
        check_block(&pair[1], &pair[0]).map_err(|reason| ChainFault {
            index: pair[1].index,
            reason,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn next(previous: &Block, keypair: &KeyPair) -> Block {
        Block::seal(previous.index + 1, previous.current_hash, hash(b"vote"), keypair)
    }

    #[test]
    fn test_genesis_is_deterministic() {
        let a = Block::genesis();
        let b = Block::genesis();
        assert_eq!(a, b);
        assert!(a.check_genesis().is_ok());
        assert_eq!(a.previous_hash, Hash::ZERO);
    }

    #[test]
    fn test_sealed_block_validates() {
        let keypair = KeyPair::generate();
        let genesis = Block::genesis();
        let block = next(&genesis, &keypair);

        assert!(validate_block(&block, &genesis));
        assert_eq!(block.pubkey, Some(keypair.public_key()));
    }

    #[test]
    fn test_rejections() {
        let keypair = KeyPair::generate();
        let genesis = Block::genesis();
        let block = next(&genesis, &keypair);

        let mut wrong_index = block.clone();
        wrong_index.index = 2;
        assert!(matches!(
            check_block(&wrong_index, &genesis),
            Err(BlockRejection::IndexMismatch { expected: 1, actual: 2 })
        ));

        let mut unlinked = block.clone();
        unlinked.previous_hash = hash(b"elsewhere");
        assert!(matches!(
            check_block(&unlinked, &genesis),
            Err(BlockRejection::BrokenLink { .. })
        ));

        let mut tampered = block.clone();
        tampered.vote_hash = hash(b"other vote");
        assert!(matches!(
            check_block(&tampered, &genesis),
            Err(BlockRejection::HashMismatch { .. })
        ));

        // Rehashing after tampering does not get past the signature
        tampered.current_hash = tampered.compute_hash();
        assert_eq!(check_block(&tampered, &genesis), Err(BlockRejection::BadSignature));
    }

    #[test]
    fn test_unsigned_block_skips_signature() {
        let genesis = Block::genesis();
        let mut block = Block::seal(1, genesis.current_hash, hash(b"v"), &KeyPair::generate());
        block.pubkey = None;
        block.signature = Signature::EMPTY;
        block.current_hash = block.compute_hash();

        assert!(validate_block(&block, &genesis));
    }

    #[test]
    fn test_optional_fields_change_hash() {
        let mut block = Block::genesis();
        let plain = block.compute_hash();
        block.event_id = Some("evt".into());
        assert_ne!(block.compute_hash(), plain);
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_value(Block::genesis()).unwrap();
        assert!(json.get("previousHash").is_some());
        assert!(json.get("currentHash").is_some());
        assert!(json.get("pubkey").is_none());

        let back: Block = serde_json::from_value(json).unwrap();
        assert_eq!(back, Block::genesis());
    }

    #[test]
    fn test_audit_chain() {
        let keypair = KeyPair::generate();
        let genesis = Block::genesis();
        let b1 = next(&genesis, &keypair);
        let b2 = next(&b1, &keypair);
        let mut chain = vec![genesis, b1, b2];

        assert!(audit_chain(&[]).is_ok());
        assert!(audit_chain(&chain).is_ok());

        chain[1].timestamp = Timestamp::from_millis(1);
        let fault = audit_chain(&chain).unwrap_err();
        assert_eq!(fault.index, 1);
    }
}
