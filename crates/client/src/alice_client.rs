//! One registered input.

use std::time::Duration;

use bitcoin::{secp256k1::SecretKey, Transaction};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use wabisabi_primitives::{
    coin::Coin,
    ids::{AliceId, RoundId},
    messages::InputWitnessPair,
    ownership::{CommitmentData, OwnershipProof},
    round_state::RoundState,
    witness::sign_p2wpkh_input,
};

use crate::{arena_client::ArenaClient, errors::CoinJoinClientError};

/// A coin and the key that spends it.
#[derive(Debug, Clone)]
pub struct SigningCoin {
    /// The coin.
    pub coin: Coin,

    /// Key of the coin's P2WPKH script.
    pub secret_key: SecretKey,
}

impl SigningCoin {
    /// Pairs `coin` with its key.
    pub const fn new(coin: Coin, secret_key: SecretKey) -> Self {
        Self { coin, secret_key }
    }
}

/// A coin registered as an input of a round.
#[derive(Debug)]
pub struct AliceClient {
    alice_id: AliceId,
    round_id: RoundId,
    coordinator_identifier: String,
    amount_entitlement: u64,
    vsize_entitlement: u64,
    confirmation_interval: Duration,
    coin: SigningCoin,
    arena: ArenaClient,
}

impl AliceClient {
    /// Registers `coin` in `round`.
    ///
    /// Fails without contacting the coordinator if the coin cannot pay for its own input.
    pub async fn register(
        arena: ArenaClient,
        round: &RoundState,
        coin: SigningCoin,
        cancel: &CancellationToken,
    ) -> Result<Self, CoinJoinClientError> {
        let amount_entitlement = coin
            .coin
            .effective_value(round.fee_rate)
            .ok_or(CoinJoinClientError::NotEnoughValue(coin.coin.amount()))?
            .to_sat();
        let input_vsize = coin
            .coin
            .input_vsize()
            .ok_or(CoinJoinClientError::NotEnoughValue(coin.coin.amount()))?;
        let vsize_entitlement = round
            .max_vsize_allocation_per_alice
            .checked_sub(input_vsize)
            .ok_or(CoinJoinClientError::NotEnoughVsize {
                available: round.max_vsize_allocation_per_alice,
                needed: input_vsize,
            })?;

        let commitment = CommitmentData {
            coordinator_identifier: &round.coordinator_identifier,
            round_id: round.id,
        };
        let proof = OwnershipProof::generate(&coin.secret_key, &commitment);
        let alice_id = arena
            .register_input(round.id, coin.coin.outpoint, proof, cancel)
            .await?;

        info!(round_id = %round.id, %alice_id, outpoint = %coin.coin.outpoint, "input registered");
        Ok(Self {
            alice_id,
            round_id: round.id,
            coordinator_identifier: round.coordinator_identifier.clone(),
            amount_entitlement,
            vsize_entitlement,
            confirmation_interval: round.connection_confirmation_timeout / 2,
            coin,
            arena,
        })
    }

    /// The id the coordinator assigned.
    pub const fn alice_id(&self) -> AliceId {
        self.alice_id
    }

    /// The registered coin.
    pub const fn coin(&self) -> &SigningCoin {
        &self.coin
    }

    /// Value of the amount credentials confirmation yields.
    pub const fn amount_entitlement(&self) -> u64 {
        self.amount_entitlement
    }

    /// Value of the vsize credentials confirmation yields.
    pub const fn vsize_entitlement(&self) -> u64 {
        self.vsize_entitlement
    }

    fn ownership_proof(&self) -> OwnershipProof {
        let commitment = CommitmentData {
            coordinator_identifier: &self.coordinator_identifier,
            round_id: self.round_id,
        };
        OwnershipProof::generate(&self.coin.secret_key, &commitment)
    }

    /// Confirms the connection until the coordinator issues the real credentials.
    ///
    /// During input registration every confirmation only extends the input's deadline, so this
    /// keeps confirming at half the confirmation timeout.
    pub async fn confirm_connection(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(), CoinJoinClientError> {
        loop {
            let confirmed = self
                .arena
                .confirm_connection(
                    self.round_id,
                    self.alice_id,
                    self.amount_entitlement,
                    self.vsize_entitlement,
                    cancel,
                )
                .await?;
            if confirmed {
                info!(
                    round_id = %self.round_id,
                    alice_id = %self.alice_id,
                    "connection confirmed"
                );
                return Ok(());
            }

            debug!(alice_id = %self.alice_id, "round still registering inputs");
            tokio::select! {
                _ = cancel.cancelled() => return Err(CoinJoinClientError::Cancelled),
                _ = sleep(self.confirmation_interval) => {}
            }
        }
    }

    /// Tells the coordinator this input has nothing more to register.
    pub async fn ready_to_sign(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(), CoinJoinClientError> {
        self.arena
            .ready_to_sign(self.round_id, self.alice_id, self.ownership_proof(), cancel)
            .await
    }

    /// Signs this input of `tx` and submits the witness.
    pub async fn sign(
        &self,
        tx: &Transaction,
        cancel: &CancellationToken,
    ) -> Result<(), CoinJoinClientError> {
        let outpoint = self.coin.coin.outpoint;
        let index = tx
            .input
            .iter()
            .position(|input| input.previous_output == outpoint)
            .ok_or(CoinJoinClientError::InputMissing(outpoint))?;
        let witness = sign_p2wpkh_input(tx, index, &self.coin.coin, &self.coin.secret_key)?;

        let input_index =
            u32::try_from(index).map_err(|_| CoinJoinClientError::InputMissing(outpoint))?;
        self.arena
            .sign_transaction(
                self.round_id,
                vec![InputWitnessPair {
                    input_index,
                    witness,
                }],
                cancel,
            )
            .await?;

        debug!(round_id = %self.round_id, %outpoint, input_index, "input signed");
        Ok(())
    }

    /// Unregisters this input.
    pub async fn remove(&self, cancel: &CancellationToken) -> Result<(), CoinJoinClientError> {
        self.arena
            .remove_input(self.round_id, self.alice_id, cancel)
            .await
    }
}
