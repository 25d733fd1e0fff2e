//! Creation and verification of P2WPKH witnesses.

use bitcoin::{ecdsa, hashes::Hash, sighash::SighashCache, EcdsaSighashType, Transaction, Witness};
use secp256k1::{Message, PublicKey, SecretKey, SECP256K1};
use thiserror::Error;

use crate::{coin::Coin, ownership::p2wpkh_script};

/// Why a witness does not unlock an input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WitnessError {
    /// The witness does not have the `[signature, pubkey]` shape.
    #[error("witness is not a p2wpkh witness")]
    Malformed,

    /// The signature does not commit to the whole transaction.
    #[error("signature must use SIGHASH_ALL")]
    WrongSighashType,

    /// The public key does not hash to the coin's script.
    #[error("public key does not match the spent script")]
    KeyMismatch,

    /// The sighash could not be computed for this input.
    #[error("cannot compute sighash: {0}")]
    Sighash(String),

    /// The signature does not verify.
    #[error("invalid signature")]
    InvalidSignature,
}

fn sighash_message(
    tx: &Transaction,
    input_index: usize,
    coin: &Coin,
) -> Result<Message, WitnessError> {
    let sighash = SighashCache::new(tx)
        .p2wpkh_signature_hash(
            input_index,
            coin.script_pubkey(),
            coin.amount(),
            EcdsaSighashType::All,
        )
        .map_err(|e| WitnessError::Sighash(e.to_string()))?;

    Ok(Message::from_digest(sighash.to_byte_array()))
}

/// Signs input `input_index` of `tx`, which spends `coin`, with `secret_key`.
pub fn sign_p2wpkh_input(
    tx: &Transaction,
    input_index: usize,
    coin: &Coin,
    secret_key: &SecretKey,
) -> Result<Witness, WitnessError> {
    let public_key = secret_key.public_key(SECP256K1);
    if p2wpkh_script(&public_key) != *coin.script_pubkey() {
        return Err(WitnessError::KeyMismatch);
    }

    let message = sighash_message(tx, input_index, coin)?;
    let signature = ecdsa::Signature {
        signature: SECP256K1.sign_ecdsa(&message, secret_key),
        sighash_type: EcdsaSighashType::All,
    };

    Ok(Witness::p2wpkh(&signature, &public_key))
}

/// Checks that `witness` unlocks input `input_index` of `tx`, which spends `coin`.
pub fn verify_p2wpkh_witness(
    tx: &Transaction,
    input_index: usize,
    coin: &Coin,
    witness: &Witness,
) -> Result<(), WitnessError> {
    if witness.len() != 2 {
        return Err(WitnessError::Malformed);
    }
    let (Some(signature), Some(public_key)) = (witness.nth(0), witness.nth(1)) else {
        return Err(WitnessError::Malformed);
    };

    let signature = ecdsa::Signature::from_slice(signature).map_err(|_| WitnessError::Malformed)?;
    if signature.sighash_type != EcdsaSighashType::All {
        return Err(WitnessError::WrongSighashType);
    }

    if public_key.len() != 33 {
        return Err(WitnessError::Malformed);
    }
    let public_key = PublicKey::from_slice(public_key).map_err(|_| WitnessError::Malformed)?;
    if p2wpkh_script(&public_key) != *coin.script_pubkey() {
        return Err(WitnessError::KeyMismatch);
    }

    let message = sighash_message(tx, input_index, coin)?;
    SECP256K1
        .verify_ecdsa(&message, &signature.signature, &public_key)
        .map_err(|_| WitnessError::InvalidSignature)
}
