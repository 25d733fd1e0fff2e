//! Clients and an in-process coordinator running whole rounds against a mock node.

use std::{sync::Arc, time::Duration};

use bitcoin::{Amount, ScriptBuf};
use tokio_util::sync::CancellationToken;
use wabisabi_client::{
    CoinJoinClient, CoinJoinClientError, DestinationProvider, RoundStateUpdater, SigningCoin,
};
use wabisabi_common::periodic::PeriodicRunner;
use wabisabi_coordinator::{Arena, WabiSabiConfig};
use wabisabi_primitives::{
    errors::ProtocolErrorCode,
    phase::{EndRoundState, Phase},
    round_state::RoundState,
};
use wabisabi_test_utils::{
    bitcoin::{generate_p2wpkh_coins, generate_p2wpkh_script},
    node::MockBitcoinRpc,
};

const TICK: Duration = Duration::from_secs(1);

struct FreshScripts;

impl DestinationProvider for FreshScripts {
    fn next_destinations(&self, count: usize) -> Vec<ScriptBuf> {
        (0..count).map(|_| generate_p2wpkh_script()).collect()
    }
}

struct Harness {
    rpc: Arc<MockBitcoinRpc>,
    arena: Arc<Arena>,
    updater: Arc<RoundStateUpdater>,
    runners: Vec<PeriodicRunner>,
    cancel: CancellationToken,
}

impl Harness {
    fn start(min: usize, max: usize) -> Self {
        let config = WabiSabiConfig {
            min_input_count_by_round: min,
            max_input_count_by_round: max,
            standard_input_registration_timeout: Duration::from_secs(60),
            ..Default::default()
        };

        let rpc = Arc::new(MockBitcoinRpc::default());
        let arena = Arc::new(Arena::new(config, rpc.clone()));
        let updater = Arc::new(RoundStateUpdater::new(arena.clone()));
        let cancel = CancellationToken::new();
        let runners = vec![
            PeriodicRunner::spawn(arena.clone(), TICK, cancel.clone()),
            PeriodicRunner::spawn(updater.clone(), TICK, cancel.clone()),
        ];

        Self {
            rpc,
            arena,
            updater,
            runners,
            cancel,
        }
    }

    fn client(&self) -> CoinJoinClient {
        CoinJoinClient::new(
            self.arena.clone(),
            self.updater.clone(),
            Arc::new(FreshScripts),
        )
    }

    fn fund(&self, sats: &[u64]) -> Vec<SigningCoin> {
        let amounts: Vec<Amount> = sats.iter().copied().map(Amount::from_sat).collect();
        generate_p2wpkh_coins(&amounts)
            .into_iter()
            .map(|(coin, key)| {
                self.rpc.add_coin(&coin);
                SigningCoin::new(coin, key)
            })
            .collect()
    }

    async fn open_round(&self) -> RoundState {
        self.updater
            .create_round_awaiter(
                None,
                |r| r.phase == Phase::InputRegistration && !r.is_blame_round(),
                &self.cancel,
            )
            .await
            .expect("an open round")
    }

    async fn stop(self) {
        self.updater.stop();
        for runner in self.runners {
            runner.stop().await;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn two_participants_complete_a_coinjoin() {
    let harness = Harness::start(3, 3);
    let round = harness.open_round().await;

    let alice_coins = harness.fund(&[1_000_000]);
    let bob_coins = harness.fund(&[500_000, 700_000]);
    let (alice_client, bob_client) = (harness.client(), harness.client());
    let cancel = CancellationToken::new();

    let (alice, bob) = tokio::join!(
        alice_client.start_coinjoin(round.clone(), alice_coins.clone(), &cancel),
        bob_client.start_coinjoin(round.clone(), bob_coins.clone(), &cancel),
    );
    let alice = alice.expect("first participant finishes");
    let bob = bob.expect("second participant finishes");

    for result in [&alice, &bob] {
        assert_eq!(result.round_id, round.id);
        assert_eq!(result.end_round_state, EndRoundState::TransactionBroadcast);
        assert!(result.was_broadcast);
        assert_eq!(result.outputs.len(), 4);
    }

    let mempool = harness.rpc.mempool();
    assert_eq!(mempool.len(), 1);
    let coinjoin = &mempool[0];
    assert_eq!(coinjoin.compute_txid(), alice.transaction.compute_txid());
    assert_eq!(coinjoin.input.len(), 3);
    for coin in alice_coins.iter().chain(&bob_coins) {
        assert!(coinjoin
            .input
            .iter()
            .any(|i| i.previous_output == coin.coin.outpoint));
    }
    for output in alice.outputs.iter().chain(&bob.outputs) {
        assert!(coinjoin.output.contains(output));
        assert!(output.value >= round.min_registrable_amount);
    }
    assert!(coinjoin.input.iter().all(|i| !i.witness.is_empty()));

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn lonely_participant_gives_up_when_the_round_aborts() {
    let harness = Harness::start(2, 2);
    let round = harness.open_round().await;
    let coins = harness.fund(&[1_000_000]);

    let err = harness
        .client()
        .start_coinjoin(round.clone(), coins, &CancellationToken::new())
        .await
        .expect_err("round cannot start with one input");

    match err {
        CoinJoinClientError::Api(err) => assert!(matches!(
            err.protocol_code(),
            Some(
                ProtocolErrorCode::AliceNotFound
                    | ProtocolErrorCode::WrongPhase
                    | ProtocolErrorCode::RoundNotFound
            )
        )),
        other => panic!("unexpected error: {other}"),
    }

    let state = harness
        .arena
        .round_states()
        .await
        .into_iter()
        .find(|r| r.id == round.id);
    if let Some(state) = state {
        assert_eq!(state.end_round_state, EndRoundState::AbortedNotEnoughAlices);
    }
    assert!(harness.rpc.mempool().is_empty());

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn nothing_to_register() {
    let harness = Harness::start(2, 2);
    let round = harness.open_round().await;

    let err = harness
        .client()
        .start_coinjoin(round, Vec::new(), &CancellationToken::new())
        .await
        .expect_err("no coins");
    assert!(matches!(err, CoinJoinClientError::NoCoins));

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn cancelled_participant_stops_before_registering() {
    let harness = Harness::start(2, 2);
    let round = harness.open_round().await;
    let coins = harness.fund(&[1_000_000]);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = harness
        .client()
        .start_coinjoin(round.clone(), coins, &cancel)
        .await
        .expect_err("cancelled");
    assert!(matches!(err, CoinJoinClientError::Cancelled));

    let state = harness
        .arena
        .round_states()
        .await
        .into_iter()
        .find(|r| r.id == round.id)
        .expect("round still running");
    assert_eq!(state.input_count, 0);

    harness.stop().await;
}
