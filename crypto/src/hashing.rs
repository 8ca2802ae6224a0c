//! Hashing functions using BLAKE3 (SHA-256 for fingerprints)

use sha2::{Digest, Sha256};
use votemesh_core::Hash;

/// Compute BLAKE3 hash of data
pub fn blake3_hash(data: &[u8]) -> Hash {
    let hash = blake3::hash(data);
    Hash::from_bytes(*hash.as_bytes())
}

/// Compute SHA-256 hash of data
pub fn sha256_hash(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&result);
    Hash::from_bytes(bytes)
}

/// Default hash function (BLAKE3)
pub fn hash(data: &[u8]) -> Hash {
    blake3_hash(data)
}

/// Incremental hasher for structured records.
///
/// Variable-length fields go through [`IncrementalHasher::update_prefixed`]
/// so that adjacent fields can never be re-split into a colliding encoding.
pub struct IncrementalHasher {
    hasher: blake3::Hasher,
}

impl IncrementalHasher {
    pub fn new() -> Self {
        Self {
            hasher: blake3::Hasher::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Feed a length-prefixed field
    pub fn update_prefixed(&mut self, data: &[u8]) {
        self.hasher.update(&(data.len() as u64).to_le_bytes());
        self.hasher.update(data);
    }

    pub fn finalize(self) -> Hash {
        let hash = self.hasher.finalize();
        Hash::from_bytes(*hash.as_bytes())
    }
}

impl Default for IncrementalHasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blake3_hash() {
        let data = b"Hello, VOTEMESH!";
        let hash1 = blake3_hash(data);
        let hash2 = blake3_hash(data);

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, Hash::ZERO);
    }

    #[test]
    fn test_different_hashes() {
        let data = b"Hello, VOTEMESH!";
        assert_ne!(blake3_hash(data), sha256_hash(data));
    }

    #[test]
    fn test_incremental_hasher() {
        let mut hasher = IncrementalHasher::new();
        hasher.update(b"Hello, ");
        hasher.update(b"VOTEMESH!");
        let hash1 = hasher.finalize();

        let hash2 = hash(b"Hello, VOTEMESH!");

        assert_eq!(hash1, hash2);
    }

    #[test]
    fn test_prefixed_fields_do_not_collide() {
        let mut a = IncrementalHasher::new();
        a.update_prefixed(b"ab");
        a.update_prefixed(b"c");

        let mut b = IncrementalHasher::new();
        b.update_prefixed(b"a");
        b.update_prefixed(b"bc");

        assert_ne!(a.finalize(), b.finalize());
    }
}
