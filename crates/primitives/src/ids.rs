//! Identifiers for rounds and participants.

use std::fmt;

use bitcoin::hashes::{sha256, Hash, HashEngine};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

/// Incrementally hashes labelled fields under a domain separator.
///
/// Every field is prefixed with its label and length so that different field splits can never
/// produce the same digest.
#[derive(Clone)]
pub struct TranscriptHasher {
    engine: sha256::HashEngine,
}

impl fmt::Debug for TranscriptHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranscriptHasher").finish_non_exhaustive()
    }
}

impl TranscriptHasher {
    /// Starts a transcript for `domain`.
    pub fn new(domain: &str) -> Self {
        let mut hasher = Self {
            engine: sha256::Hash::engine(),
        };
        hasher.append("domain", domain.as_bytes());
        hasher
    }

    /// Appends a labelled field.
    pub fn append(&mut self, label: &str, data: &[u8]) -> &mut Self {
        self.engine.input(&(label.len() as u64).to_le_bytes());
        self.engine.input(label.as_bytes());
        self.engine.input(&(data.len() as u64).to_le_bytes());
        self.engine.input(data);
        self
    }

    /// Appends a labelled integer.
    pub fn append_u64(&mut self, label: &str, value: u64) -> &mut Self {
        self.append(label, &value.to_le_bytes())
    }

    /// Finishes the transcript.
    pub fn finish(&self) -> sha256::Hash {
        sha256::Hash::from_engine(self.engine.clone())
    }
}

/// Identifier of a round. Derived from the round's immutable parameters so that clients can detect
/// a coordinator changing them behind their back.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoundId(sha256::Hash);

impl RoundId {
    /// Wraps a digest.
    pub const fn from_hash(hash: sha256::Hash) -> Self {
        Self(hash)
    }

    /// Returns the raw bytes.
    pub fn to_byte_array(self) -> [u8; 32] {
        self.0.to_byte_array()
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RoundId({})", self.0)
    }
}

/// Identifier handed to a participant when one of its inputs is registered.
///
/// Random, so that knowing an input does not let anyone act on behalf of its Alice.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AliceId(#[serde(with = "hex::serde")] [u8; 32]);

impl AliceId {
    /// Draws a fresh identifier.
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }
}

impl From<[u8; 32]> for AliceId {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for AliceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for AliceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AliceId({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_is_sensitive_to_field_boundaries() {
        let a = TranscriptHasher::new("test")
            .append("a", b"xy")
            .append("b", b"z")
            .finish();
        let b = TranscriptHasher::new("test")
            .append("a", b"x")
            .append("b", b"yz")
            .finish();

        assert_ne!(a, b);
    }

    #[test]
    fn transcript_is_deterministic() {
        let hash = || {
            TranscriptHasher::new("test")
                .append_u64("value", 42)
                .finish()
        };

        assert_eq!(hash(), hash());
    }

    #[test]
    fn ids_serialize_as_hex() {
        let id = AliceId::from([0x11; 32]);
        let json = serde_json::to_string(&id).expect("serialize");

        assert_eq!(json, format!("\"{}\"", "11".repeat(32)));
    }
}
