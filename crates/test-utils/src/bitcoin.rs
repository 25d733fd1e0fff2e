//! Module to generate arbitrary keys, scripts and coins for testing.

use bitcoin::{
    hashes::Hash,
    key::rand::{rngs::OsRng, Rng},
    Amount, OutPoint, ScriptBuf, TxOut, Txid, WPubkeyHash, XOnlyPublicKey,
};
use secp256k1::{Keypair, SecretKey, SECP256K1};
use wabisabi_primitives::{coin::Coin, ownership::p2wpkh_script};

/// Generates a random secret key.
pub fn generate_secret_key() -> SecretKey {
    SecretKey::new(&mut OsRng)
}

/// Generates a random transaction ID.
pub fn generate_txid() -> Txid {
    let mut txid = [0u8; 32];
    OsRng.fill(&mut txid);

    Txid::from_byte_array(txid)
}

/// Generates a random outpoint.
pub fn generate_outpoint() -> OutPoint {
    OutPoint {
        txid: generate_txid(),
        vout: OsRng.gen_range(0..16),
    }
}

/// The P2WPKH script of `secret_key`.
pub fn p2wpkh_script_of(secret_key: &SecretKey) -> ScriptBuf {
    p2wpkh_script(&secret_key.public_key(SECP256K1))
}

/// Generates a P2WPKH script nobody knows the key for.
pub fn generate_p2wpkh_script() -> ScriptBuf {
    let mut hash = [0u8; 20];
    OsRng.fill(&mut hash);

    ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array(hash))
}

/// Generates a key-path-only P2TR script.
pub fn generate_p2tr_script() -> ScriptBuf {
    let keypair = Keypair::new(SECP256K1, &mut OsRng);
    let (x_only, _) = XOnlyPublicKey::from_keypair(&keypair);

    ScriptBuf::new_p2tr(SECP256K1, x_only, None)
}

/// A P2WPKH coin of `amount` at a random outpoint, spendable with `secret_key`.
pub fn p2wpkh_coin(secret_key: &SecretKey, amount: Amount) -> Coin {
    Coin::new(
        generate_outpoint(),
        TxOut {
            value: amount,
            script_pubkey: p2wpkh_script_of(secret_key),
        },
    )
}

/// Generates one P2WPKH coin per amount, each with its own key.
pub fn generate_p2wpkh_coins(amounts: &[Amount]) -> Vec<(Coin, SecretKey)> {
    amounts
        .iter()
        .map(|amount| {
            let secret_key = generate_secret_key();
            (p2wpkh_coin(&secret_key, *amount), secret_key)
        })
        .collect()
}
