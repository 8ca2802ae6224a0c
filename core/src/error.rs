//! Error types for VOTEMESH

use thiserror::Error;

/// Main error type for VOTEMESH
#[derive(Error, Debug)]
pub enum VotemeshError {
    // ============ Cryptography Errors ============
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Invalid private key")]
    InvalidPrivateKey,

    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    // ============ Ledger Errors ============
    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Invalid vote: {0}")]
    InvalidVote(String),

    #[error("Vote not authorized: {0}")]
    VoteNotAuthorized(String),

    #[error("Poll not found: {0}")]
    PollNotFound(String),

    #[error("Chain corruption detected: {0}")]
    ChainCorruption(String),

    // ============ Storage Errors ============
    #[error("Record not found")]
    RecordNotFound,

    #[error("Storage error: {0}")]
    StorageError(String),

    // ============ Network Errors ============
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Transport closed")]
    TransportClosed,

    #[error("Message serialization failed: {0}")]
    SerializationError(String),

    #[error("Message deserialization failed: {0}")]
    DeserializationError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    // ============ Configuration Errors ============
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // ============ General Errors ============
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<std::io::Error> for VotemeshError {
    fn from(err: std::io::Error) -> Self {
        VotemeshError::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for VotemeshError {
    fn from(err: serde_json::Error) -> Self {
        VotemeshError::SerializationError(err.to_string())
    }
}
