//! Digital signature operations using Ed25519

use ed25519_dalek::{Signer, Verifier};
use votemesh_core::{PublicKey, Signature, Verifiable, VotemeshError, VotemeshResult};

use crate::keys::{public_key_to_ed25519, KeyPair};

/// Sign a message using Ed25519
pub fn sign(keypair: &KeyPair, message: &[u8]) -> Signature {
    let signature = keypair.signing_key().sign(message);
    Signature::from_bytes(signature.to_bytes())
}

/// Verify a signature using Ed25519
pub fn verify(public_key: &PublicKey, message: &[u8], signature: &Signature) -> VotemeshResult<()> {
    let verifying_key = public_key_to_ed25519(public_key)?;
    let sig = ed25519_dalek::Signature::from_bytes(signature.as_bytes());

    verifying_key
        .verify(message, &sig)
        .map_err(|_| VotemeshError::InvalidSignature)
}

/// Check if a signature is valid (returns bool instead of Result)
pub fn is_valid_signature(public_key: &PublicKey, message: &[u8], signature: &Signature) -> bool {
    verify(public_key, message, signature).is_ok()
}

/// Verify a self-describing record.
///
/// Records without a signer are accepted: the signature is only enforced
/// when a public key is attached.
pub fn verify_record<T: Verifiable>(record: &T) -> VotemeshResult<()> {
    match record.signer() {
        Some(public_key) => verify(public_key, &record.signing_bytes(), record.signature()),
        None => Ok(()),
    }
}
