//! Core traits shared across VOTEMESH crates

use crate::types::*;

/// Result type for VOTEMESH operations
pub type VotemeshResult<T> = Result<T, crate::error::VotemeshError>;

/// Trait for types with a deterministic content digest
pub trait Hashable {
    /// Compute the hash of this object
    fn hash(&self) -> Hash;
}

/// Trait for signable types
pub trait Signable {
    /// Get the bytes to be signed
    fn signing_bytes(&self) -> Vec<u8>;
}

/// Trait for records that carry their own signer and signature
pub trait Verifiable: Signable {
    /// Get the signer's public key, if the record is signed at all
    fn signer(&self) -> Option<&PublicKey>;

    /// Get the signature
    fn signature(&self) -> &Signature;
}
