//! Output registration.

use bitcoin::{Amount, FeeRate, ScriptBuf, TxOut};
use tokio_util::sync::CancellationToken;
use tracing::info;
use wabisabi_primitives::{
    credentials::Credential,
    fees::{fee_for_vsize, output_vsize},
    ids::RoundId,
    round_state::RoundState,
};

use crate::{arena_client::ArenaClient, errors::CoinJoinClientError};

/// Registers outputs in one round.
#[derive(Debug, Clone)]
pub struct BobClient {
    round_id: RoundId,
    fee_rate: FeeRate,
    arena: ArenaClient,
}

impl BobClient {
    /// Creates a client registering outputs in `round`.
    pub fn new(round: &RoundState, arena: ArenaClient) -> Self {
        Self {
            round_id: round.id,
            fee_rate: round.fee_rate,
            arena,
        }
    }

    /// The output `amount` worth of credentials buys for `script`, after its own fee.
    pub fn output(&self, script: ScriptBuf, amount: u64) -> TxOut {
        let fee = fee_for_vsize(self.fee_rate, output_vsize(&script));
        TxOut {
            value: Amount::from_sat(amount).checked_sub(fee).unwrap_or(Amount::ZERO),
            script_pubkey: script,
        }
    }

    /// Registers `script`, paid for by `amount_credential` and `vsize_credential`.
    ///
    /// `vsize_credential` must be worth exactly the output's vsize.
    pub async fn register_output(
        &self,
        script: ScriptBuf,
        amount_credential: Credential,
        vsize_credential: Credential,
        cancel: &CancellationToken,
    ) -> Result<TxOut, CoinJoinClientError> {
        let output = self.output(script.clone(), amount_credential.value);
        self.arena
            .register_output(
                self.round_id,
                script,
                amount_credential,
                vsize_credential,
                cancel,
            )
            .await?;

        info!(round_id = %self.round_id, value = %output.value, "output registered");
        Ok(output)
    }
}
