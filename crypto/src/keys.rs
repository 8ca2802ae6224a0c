//! Device key management for VOTEMESH
//!
//! Every device signs the blocks it appends with its own Ed25519 key.

use ed25519_dalek::{
    SigningKey as Ed25519SigningKey,
    VerifyingKey as Ed25519VerifyingKey,
    SECRET_KEY_LENGTH,
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use votemesh_core::{PublicKey, VotemeshError, VotemeshResult};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::hashing::sha256_hash;

/// A keypair for signing and verification
#[derive(Clone)]
pub struct KeyPair {
    signing_key: Ed25519SigningKey,
}

impl KeyPair {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        let signing_key = Ed25519SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Create keypair from seed bytes
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = Ed25519SigningKey::from_bytes(seed);
        Self { signing_key }
    }

    /// Create keypair from secret key bytes
    pub fn from_secret_bytes(bytes: &[u8]) -> VotemeshResult<Self> {
        if bytes.len() != SECRET_KEY_LENGTH {
            return Err(VotemeshError::InvalidPrivateKey);
        }
        let mut seed = SecretKey::new([0u8; 32]);
        seed.bytes.copy_from_slice(bytes);
        Ok(seed.to_keypair())
    }

    /// Get the public key
    pub fn public_key(&self) -> PublicKey {
        let verifying_key = self.signing_key.verifying_key();
        PublicKey::from_bytes(verifying_key.to_bytes())
    }

    /// Short, stable identifier for the device holding this key
    pub fn device_id(&self) -> String {
        device_fingerprint(&self.public_key())
    }

    /// Get the secret key bytes (BE CAREFUL with this!)
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Get the internal signing key for signing operations
    pub(crate) fn signing_key(&self) -> &Ed25519SigningKey {
        &self.signing_key
    }
}

/// Derive the device fingerprint attached to votes from a public key
pub fn device_fingerprint(public_key: &PublicKey) -> String {
    let digest = sha256_hash(public_key.as_bytes());
    digest.to_hex()[..16].to_string()
}

/// Convert our PublicKey type to Ed25519 verifying key
pub fn public_key_to_ed25519(key: &PublicKey) -> VotemeshResult<Ed25519VerifyingKey> {
    Ed25519VerifyingKey::from_bytes(key.as_bytes())
        .map_err(|_| VotemeshError::InvalidPublicKey)
}

/// Secure secret key storage (zeroizes on drop)
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretKey {
    bytes: [u8; 32],
}

impl SecretKey {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Parse a hex-encoded secret, as written to the device key file
    pub fn from_hex(s: &str) -> VotemeshResult<Self> {
        let mut decoded = hex::decode(s.trim()).map_err(|_| VotemeshError::InvalidPrivateKey)?;
        if decoded.len() != SECRET_KEY_LENGTH {
            decoded.zeroize();
            return Err(VotemeshError::InvalidPrivateKey);
        }
        let mut key = Self::new([0u8; 32]);
        key.bytes.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(key)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    pub fn to_keypair(&self) -> KeyPair {
        KeyPair::from_seed(&self.bytes)
    }
}

/// Serializable device key file contents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceKeyFile {
    pub public_key: String,
    pub device_id: String,
    pub secret_key: String,
}

impl From<&KeyPair> for DeviceKeyFile {
    fn from(keypair: &KeyPair) -> Self {
        Self {
            public_key: keypair.public_key().to_hex(),
            device_id: keypair.device_id(),
            secret_key: hex::encode(keypair.secret_bytes()),
        }
    }
}
