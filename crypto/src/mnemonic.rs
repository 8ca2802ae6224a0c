//! Human-readable receipt words
//!
//! Each byte becomes one four-letter word: a leading syllable picked by the
//! high nibble and a trailing syllable picked by the low nibble. The encoding
//! is reversible, so a receipt read aloud or written down can be checked
//! against a chain head later.

use votemesh_core::{Hash, VotemeshError, VotemeshResult};

const LEADS: [&str; 16] = [
    "ba", "de", "fi", "go", "ku", "la", "me", "ni",
    "po", "ru", "sa", "te", "vi", "wo", "yu", "zo",
];

const TAILS: [&str; 16] = [
    "ar", "el", "in", "on", "us", "ax", "em", "ip",
    "ol", "ut", "ad", "ek", "is", "om", "uz", "ev",
];

/// Number of hash bytes carried by a receipt mnemonic
pub const RECEIPT_WORDS: usize = 8;

/// Encode bytes as space separated words
pub fn encode_words(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{}{}", LEADS[(b >> 4) as usize], TAILS[(b & 0x0f) as usize]))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Decode words produced by [`encode_words`]
pub fn decode_words(phrase: &str) -> VotemeshResult<Vec<u8>> {
    phrase
        .split_whitespace()
        .map(|word| {
            let word = word.to_ascii_lowercase();
            if word.len() != 4 || !word.is_ascii() {
                return Err(VotemeshError::InvalidMnemonic(word));
            }
            let hi = LEADS.iter().position(|s| *s == &word[..2]);
            let lo = TAILS.iter().position(|s| *s == &word[2..]);
            match (hi, lo) {
                (Some(hi), Some(lo)) => Ok(((hi as u8) << 4) | lo as u8),
                _ => Err(VotemeshError::InvalidMnemonic(word)),
            }
        })
        .collect()
}

/// Mnemonic printed on a vote receipt for the given chain head
pub fn receipt_mnemonic(head: &Hash) -> String {
    encode_words(&head.as_bytes()[..RECEIPT_WORDS])
}

/// Check a receipt mnemonic against a chain head hash
pub fn mnemonic_matches(phrase: &str, head: &Hash) -> bool {
    match decode_words(phrase) {
        Ok(bytes) => bytes.as_slice() == &head.as_bytes()[..RECEIPT_WORDS],
        Err(_) => false,
    }
}
