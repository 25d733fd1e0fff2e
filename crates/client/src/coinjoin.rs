//! One participant's walk through a round, from input registration to the broadcast.

use std::{ops::Range, sync::Arc, time::Duration};

use bitcoin::{Amount, Transaction, TxOut};
use futures::future::try_join_all;
use rand::{thread_rng, Rng};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wabisabi_primitives::{
    api::WabiSabiApi,
    credentials::Credential,
    fees::output_vsize,
    ids::RoundId,
    phase::{EndRoundState, Phase},
    round_state::RoundState,
};

use crate::{
    alice_client::{AliceClient, SigningCoin},
    arena_client::ArenaClient,
    bob_client::BobClient,
    decomposition::{decompose, DecompositionLimits, MAX_OUTPUTS},
    destination::DestinationProvider,
    errors::CoinJoinClientError,
    round_state_updater::RoundStateUpdater,
};

/// Delay before each input registration, in milliseconds.
const REGISTRATION_DELAY_MS: Range<u64> = 0..1_000;

/// Delay before the first connection confirmation of each input, in milliseconds.
const CONFIRMATION_DELAY_MS: Range<u64> = 1_000..5_000;

/// Delay before each output registration, in milliseconds.
const OUTPUT_DELAY_MS: Range<u64> = 0..1_000;

/// How a round ended for this participant.
#[derive(Debug, Clone)]
pub struct CoinJoinResult {
    /// The round.
    pub round_id: RoundId,

    /// Why the round ended.
    pub end_round_state: EndRoundState,

    /// Whether the coinjoin reached the network.
    pub was_broadcast: bool,

    /// The transaction that was signed.
    pub transaction: Transaction,

    /// Outputs registered by this participant.
    pub outputs: Vec<TxOut>,
}

/// Takes a set of coins through one round.
pub struct CoinJoinClient {
    api: Arc<dyn WabiSabiApi>,
    updater: Arc<RoundStateUpdater>,
    destinations: Arc<dyn DestinationProvider>,
}

impl std::fmt::Debug for CoinJoinClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoinJoinClient")
            .field("updater", &self.updater)
            .finish_non_exhaustive()
    }
}

impl CoinJoinClient {
    /// Creates a client. `updater` must be kept running by the caller.
    pub fn new(
        api: Arc<dyn WabiSabiApi>,
        updater: Arc<RoundStateUpdater>,
        destinations: Arc<dyn DestinationProvider>,
    ) -> Self {
        Self {
            api,
            updater,
            destinations,
        }
    }

    /// Registers `coins` in `round` and follows the round until it ends.
    ///
    /// Any failure abandons the attempt. Inputs are only unregistered when registration itself
    /// fails; later the coordinator's timeouts take care of them.
    pub async fn start_coinjoin(
        &self,
        round: RoundState,
        coins: Vec<SigningCoin>,
        cancel: &CancellationToken,
    ) -> Result<CoinJoinResult, CoinJoinClientError> {
        if coins.is_empty() {
            return Err(CoinJoinClientError::NoCoins);
        }
        ensure_registrable(&round, &coins)?;

        let round_id = round.id;
        let arena = ArenaClient::new(self.api.clone(), &round);
        let alices = self.register_coins(&arena, &round, coins, cancel).await?;

        let result = self.proceed(&arena, round_id, &alices, cancel).await;
        match &result {
            Ok(result) => info!(
                %round_id,
                end_round_state = %result.end_round_state,
                was_broadcast = result.was_broadcast,
                "coinjoin finished"
            ),
            Err(err) => warn!(%round_id, %err, "coinjoin abandoned"),
        }
        result
    }

    async fn register_coins(
        &self,
        arena: &ArenaClient,
        round: &RoundState,
        coins: Vec<SigningCoin>,
        cancel: &CancellationToken,
    ) -> Result<Vec<AliceClient>, CoinJoinClientError> {
        let mut alices = Vec::with_capacity(coins.len());
        for coin in coins {
            let registered = match delay(REGISTRATION_DELAY_MS, cancel).await {
                Ok(()) => AliceClient::register(arena.clone(), round, coin, cancel).await,
                Err(err) => Err(err),
            };

            match registered {
                Ok(alice) => alices.push(alice),
                Err(err) => {
                    unregister(&alices).await;
                    return Err(err);
                }
            }
        }
        Ok(alices)
    }

    async fn proceed(
        &self,
        arena: &ArenaClient,
        round_id: RoundId,
        alices: &[AliceClient],
        cancel: &CancellationToken,
    ) -> Result<CoinJoinResult, CoinJoinClientError> {
        try_join_all(alices.iter().map(|alice| async move {
            delay(CONFIRMATION_DELAY_MS, cancel).await?;
            alice.confirm_connection(cancel).await
        }))
        .await?;

        let round = self
            .await_phase(round_id, Phase::OutputRegistration, cancel)
            .await?;
        let outputs = self.register_outputs(arena, &round, cancel).await?;

        try_join_all(alices.iter().map(|alice| alice.ready_to_sign(cancel))).await?;

        let round = self
            .await_phase(round_id, Phase::TransactionSigning, cancel)
            .await?;
        let transaction = round
            .unsigned_transaction
            .ok_or(CoinJoinClientError::MissingTransaction(round_id))?;
        if let Some(missing) = outputs.iter().find(|o| !transaction.output.contains(o)) {
            return Err(CoinJoinClientError::OutputMissing {
                script: missing.script_pubkey.clone(),
                amount: missing.value,
            });
        }

        try_join_all(alices.iter().map(|alice| alice.sign(&transaction, cancel))).await?;

        let round = self
            .updater
            .wait_for_phase(round_id, Phase::Ended, cancel)
            .await?;
        Ok(CoinJoinResult {
            round_id,
            end_round_state: round.end_round_state,
            was_broadcast: round.was_transaction_broadcast,
            transaction,
            outputs,
        })
    }

    /// Waits for `round_id` to reach `expected`, failing if it went past it instead.
    async fn await_phase(
        &self,
        round_id: RoundId,
        expected: Phase,
        cancel: &CancellationToken,
    ) -> Result<RoundState, CoinJoinClientError> {
        let round = self
            .updater
            .wait_for_phase(round_id, expected, cancel)
            .await?;
        if round.phase != expected {
            return Err(CoinJoinClientError::UnexpectedPhase {
                round_id,
                phase: round.phase,
                expected,
                end_round_state: round.end_round_state,
            });
        }
        Ok(round)
    }

    async fn register_outputs(
        &self,
        arena: &ArenaClient,
        round: &RoundState,
        cancel: &CancellationToken,
    ) -> Result<Vec<TxOut>, CoinJoinClientError> {
        let (mut amount, mut vsize) = consolidate(arena, round.id, cancel).await?;

        let scripts = self.destinations.next_destinations(MAX_OUTPUTS);
        let limits = DecompositionLimits {
            fee_rate: round.fee_rate,
            min_output: round.min_registrable_amount,
            output_vsize: scripts.iter().map(|s| output_vsize(s)).max().unwrap_or(0),
            available_vsize: vsize.value,
            max_outputs: scripts.len(),
        };
        let values = decompose(amount.value, &limits);
        if values.is_empty() {
            return Err(CoinJoinClientError::NotEnoughValue(Amount::from_sat(
                amount.value,
            )));
        }
        debug!(round_id = %round.id, ?values, "decomposed");

        let bob = BobClient::new(round, arena.clone());
        let mut outputs = Vec::with_capacity(values.len());
        for (value, script) in values.into_iter().zip(scripts) {
            delay(OUTPUT_DELAY_MS, cancel).await?;

            let needed = output_vsize(&script);
            let vsize_left = vsize.value.checked_sub(needed).ok_or(
                CoinJoinClientError::NotEnoughVsize {
                    available: vsize.value,
                    needed,
                },
            )?;

            let ([amount_credential, change_amount], [vsize_credential, change_vsize]) = arena
                .reissue(
                    round.id,
                    vec![amount],
                    &[value, amount.value - value],
                    vec![vsize],
                    &[needed, vsize_left],
                    cancel,
                )
                .await?;

            outputs.push(
                bob.register_output(script, amount_credential, vsize_credential, cancel)
                    .await?,
            );
            amount = change_amount;
            vsize = change_vsize;
        }

        arena.keep([amount], [vsize]);
        Ok(outputs)
    }
}

/// Rejects coin sets the issuers could not hold in a single credential.
fn ensure_registrable(
    round: &RoundState,
    coins: &[SigningCoin],
) -> Result<(), CoinJoinClientError> {
    let total = coins
        .iter()
        .filter_map(|c| c.coin.effective_value(round.fee_rate))
        .fold(Amount::ZERO, |acc, v| acc + v);
    if total > round.max_registrable_amount {
        return Err(CoinJoinClientError::TooMuchValue {
            total,
            max: round.max_registrable_amount,
        });
    }
    Ok(())
}

/// Merges every valuable amount credential into one and picks the largest vsize credential.
///
/// Vsize credentials are not merged: the issuer caps them at one Alice's allocation, which
/// already pays for every output a participant registers.
async fn consolidate(
    arena: &ArenaClient,
    round_id: RoundId,
    cancel: &CancellationToken,
) -> Result<(Credential, Credential), CoinJoinClientError> {
    let (mut amount, mut vsize) = arena.take_valuable();
    vsize.sort_by_key(|c| c.value);
    let vsize_credential = vsize.pop();
    arena.keep(Vec::new(), vsize);

    while amount.len() > 1 {
        let pair = take_two(&mut amount);
        let sum = pair.iter().map(|c| c.value).sum::<u64>();

        let ([merged, spare], zeros) = arena
            .reissue(round_id, pair, &[sum], Vec::new(), &[], cancel)
            .await?;

        arena.keep([spare], zeros);
        amount.push(merged);
    }

    match (amount.pop(), vsize_credential) {
        (Some(amount), Some(vsize)) => Ok((amount, vsize)),
        (amount, _) => Err(CoinJoinClientError::NotEnoughValue(Amount::from_sat(
            amount.map_or(0, |c| c.value),
        ))),
    }
}

fn take_two(credentials: &mut Vec<Credential>) -> Vec<Credential> {
    let keep = credentials.len().saturating_sub(2);
    credentials.split_off(keep)
}

/// Best-effort removal of already registered inputs.
async fn unregister(alices: &[AliceClient]) {
    // The caller's token may be the reason for unregistering.
    let cancel = CancellationToken::new();
    for alice in alices {
        if let Err(err) = alice.remove(&cancel).await {
            debug!(alice_id = %alice.alice_id(), %err, "cannot unregister input");
        }
    }
}

async fn delay(
    millis: Range<u64>,
    cancel: &CancellationToken,
) -> Result<(), CoinJoinClientError> {
    let millis = thread_rng().gen_range(millis);
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CoinJoinClientError::Cancelled),
        _ = sleep(Duration::from_millis(millis)) => Ok(()),
    }
}
