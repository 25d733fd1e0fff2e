//! Proofs that a participant controls the coin it registers.
//!
//! A proof is an ECDSA signature over a digest committing to the coin's script, the coordinator
//! identifier and the round id, so it cannot be replayed against another coordinator or round.

use bitcoin::{hashes::Hash, CompressedPublicKey, Script, ScriptBuf};
use secp256k1::{ecdsa::Signature, Message, PublicKey, SecretKey, SECP256K1};
use serde::{Deserialize, Serialize};

use crate::ids::{RoundId, TranscriptHasher};

const OWNERSHIP_PROOF_DOMAIN: &str = "wabisabi/ownership-proof";

/// What an ownership proof is bound to besides the script it proves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitmentData<'a> {
    /// The coordinator's identifier string.
    pub coordinator_identifier: &'a str,

    /// The round the coin is registered in.
    pub round_id: RoundId,
}

impl CommitmentData<'_> {
    fn digest(&self, script: &Script) -> Message {
        let hash = TranscriptHasher::new(OWNERSHIP_PROOF_DOMAIN)
            .append("script", script.as_bytes())
            .append("coordinator", self.coordinator_identifier.as_bytes())
            .append("round", &self.round_id.to_byte_array())
            .finish();
        Message::from_digest(hash.to_byte_array())
    }
}

/// A signature proving control over a P2WPKH script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipProof {
    /// The key the script commits to.
    pub public_key: PublicKey,

    /// Signature over the commitment digest.
    pub signature: Signature,
}

impl OwnershipProof {
    /// Proves ownership of the P2WPKH script of `secret_key`.
    pub fn generate(secret_key: &SecretKey, commitment: &CommitmentData<'_>) -> Self {
        let public_key = secret_key.public_key(SECP256K1);
        let script = p2wpkh_script(&public_key);
        let signature = SECP256K1.sign_ecdsa(&commitment.digest(&script), secret_key);

        Self {
            public_key,
            signature,
        }
    }

    /// Returns `true` if this proof shows control of `script` for `commitment`.
    pub fn verify(&self, script: &Script, commitment: &CommitmentData<'_>) -> bool {
        if p2wpkh_script(&self.public_key).as_script() != script {
            return false;
        }

        SECP256K1
            .verify_ecdsa(&commitment.digest(script), &self.signature, &self.public_key)
            .is_ok()
    }
}

/// The P2WPKH script paying to `public_key`.
pub fn p2wpkh_script(public_key: &PublicKey) -> ScriptBuf {
    ScriptBuf::new_p2wpkh(&CompressedPublicKey(*public_key).wpubkey_hash())
}

#[cfg(test)]
mod tests {
    use bitcoin::{hashes::sha256, secp256k1::rand::thread_rng};

    use super::*;

    fn round(byte: u8) -> RoundId {
        RoundId::from_hash(sha256::Hash::from_byte_array([byte; 32]))
    }

    #[test]
    fn proof_verifies_for_its_commitment_only() {
        let secret_key = SecretKey::new(&mut thread_rng());
        let script = p2wpkh_script(&secret_key.public_key(SECP256K1));
        let commitment = CommitmentData {
            coordinator_identifier: "coordinator",
            round_id: round(1),
        };

        let proof = OwnershipProof::generate(&secret_key, &commitment);
        assert!(proof.verify(&script, &commitment));

        let other_round = CommitmentData {
            round_id: round(2),
            ..commitment.clone()
        };
        assert!(!proof.verify(&script, &other_round));

        let other_coordinator = CommitmentData {
            coordinator_identifier: "someone else",
            ..commitment
        };
        assert!(!proof.verify(&script, &other_coordinator));
    }

    #[test]
    fn proof_for_another_script_is_rejected() {
        let secret_key = SecretKey::new(&mut thread_rng());
        let other_key = SecretKey::new(&mut thread_rng());
        let commitment = CommitmentData {
            coordinator_identifier: "coordinator",
            round_id: round(1),
        };

        let proof = OwnershipProof::generate(&secret_key, &commitment);
        let other_script = p2wpkh_script(&other_key.public_key(SECP256K1));
        assert!(!proof.verify(&other_script, &commitment));
    }
}
