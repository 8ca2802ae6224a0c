//! VOTEMESH Cryptography Module
//! 
//! Provides cryptographic primitives using standard, audited algorithms:
//! - Ed25519 for block signatures
//! - BLAKE3 for block and vote hashing (SHA-256 for device fingerprints)
//! - A reversible word encoding for vote receipts

pub mod keys;
pub mod signing;
pub mod hashing;
pub mod mnemonic;

pub use keys::*;
pub use signing::*;
pub use hashing::*;
pub use mnemonic::*;
