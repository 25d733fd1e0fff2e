//! The periodic tick that moves rounds through their phases.

use std::collections::HashSet;

use bitcoin::{FeeRate, OutPoint, Transaction};
use rand::thread_rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use wabisabi_primitives::{
    errors::ApiError,
    ids::{AliceId, RoundId},
    phase::{EndRoundState, Phase},
};

use super::{until_cancelled, Arena};
use crate::{
    errors::ArenaError,
    round::{Round, RoundParameters},
};

impl Arena {
    /// Advances every round as far as its state and the clock allow, then makes sure a round is
    /// accepting inputs.
    pub async fn step(&self, cancel: &CancellationToken) -> Result<(), ArenaError> {
        self.expire_rounds().await;
        self.timeout_alices().await;
        self.step_transaction_signing(cancel).await?;
        self.step_output_registration().await;
        self.step_connection_confirmation().await;
        self.step_input_registration().await;
        self.ensure_input_registration_round(cancel).await
    }

    /// Forgets rounds that ended long enough ago.
    async fn expire_rounds(&self) {
        let now = Instant::now();
        let retention = self.config.round_expiry_timeout;

        let mut rounds = self.rounds.lock().await;
        rounds.retain(|round| {
            let expired = round.is_expired(now, retention);
            if expired {
                debug!(round_id = %round.id(), "forgetting round");
            }
            !expired
        });
    }

    /// Drops Alices that did not confirm in time while their round still registers inputs.
    async fn timeout_alices(&self) {
        let now = Instant::now();
        let candidates: Vec<AliceId> = {
            let rounds = self.rounds.lock().await;
            rounds
                .iter()
                .filter(|r| !r.is_input_registration_ended(now))
                .flat_map(|r| r.alices().iter().filter(|a| a.is_expired(now)))
                .map(|a| a.id)
                .collect()
        };
        if candidates.is_empty() {
            return;
        }

        let guards = self.alices.lock_many(&candidates).await;
        let locked: HashSet<AliceId> = guards.iter().map(|(id, _)| *id).collect();

        let now = Instant::now();
        let mut rounds = self.rounds.lock().await;
        for round in rounds
            .iter_mut()
            .filter(|r| !r.is_input_registration_ended(now))
        {
            let expired: Vec<AliceId> = round
                .alices()
                .iter()
                .filter(|a| a.is_expired(now) && locked.contains(&a.id))
                .map(|a| a.id)
                .collect();

            for id in expired {
                round.remove_alice(&id);
                self.alices.release(&id);
                info!(round_id = %round.id(), alice_id = %id, "unconfirmed input timed out");
            }
        }
    }

    async fn step_transaction_signing(&self, cancel: &CancellationToken) -> Result<(), ArenaError> {
        let now = Instant::now();
        let mut signed: Vec<(RoundId, Transaction)> = Vec::new();
        let mut timed_out: Vec<(RoundId, Vec<AliceId>)> = Vec::new();
        {
            let rounds = self.rounds.lock().await;

            for round in rounds
                .iter()
                .filter(|r| r.phase() == Phase::TransactionSigning)
            {
                let Ok(state) = round.coinjoin().as_signing() else {
                    continue;
                };
                if let Ok(tx) = state.create_transaction() {
                    signed.push((round.id(), tx));
                } else if round
                    .phase_expired(now, round.parameters().transaction_signing_timeout)
                {
                    timed_out.push((round.id(), round.alices_without_witness()));
                }
            }
        }

        for (round_id, tx) in signed {
            let result = until_cancelled(cancel, self.rpc.send_raw_transaction(&tx)).await;
            if matches!(result, Err(ApiError::Cancelled)) {
                return Err(ArenaError::Cancelled);
            }
            let blame_fee_rate = match result {
                Ok(_) => None,
                Err(_) => self.blame_fee_rate(cancel).await?,
            };

            let now = Instant::now();
            let mut rounds = self.rounds.lock().await;
            let Some(index) = rounds.iter().position(|r| r.id() == round_id) else {
                continue;
            };
            if rounds[index].phase() != Phase::TransactionSigning {
                continue;
            }

            match result {
                Ok(txid) => {
                    info!(%round_id, %txid, "coinjoin broadcast");
                    let round = &mut rounds[index];
                    round.end(EndRoundState::TransactionBroadcast, now);
                    self.release_alices(round);
                }
                Err(err) => {
                    error!(%round_id, %err, "coinjoin broadcast failed");
                    self.fail_signing(
                        &mut rounds,
                        index,
                        &[],
                        EndRoundState::TransactionBroadcastFailed,
                        blame_fee_rate,
                        now,
                    );
                }
            }
        }

        for (round_id, culprits) in timed_out {
            let blame_fee_rate = self.blame_fee_rate(cancel).await?;
            let _guards = self.alices.lock_many(&culprits).await;

            let now = Instant::now();
            let mut rounds = self.rounds.lock().await;
            let Some(index) = rounds.iter().position(|r| r.id() == round_id) else {
                continue;
            };
            if rounds[index].phase() != Phase::TransactionSigning {
                continue;
            }

            // Witnesses may have arrived in the meantime.
            let culprits: Vec<AliceId> = rounds[index]
                .alices_without_witness()
                .into_iter()
                .filter(|id| culprits.contains(id))
                .collect();
            if culprits.is_empty() {
                continue;
            }

            {
                let round = &rounds[index];
                let mut prison = self.prison.lock();
                for alice in round.alices().iter().filter(|a| culprits.contains(&a.id)) {
                    prison.ban(alice.coin.outpoint, round_id);
                }
            }

            self.fail_signing(
                &mut rounds,
                index,
                &culprits,
                EndRoundState::AbortedNotEnoughAlicesSigned,
                blame_fee_rate,
                now,
            );
        }

        Ok(())
    }

    /// A fresh fee estimate for a blame round, or `None` if the node cannot provide one.
    async fn blame_fee_rate(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<FeeRate>, ArenaError> {
        let estimate = until_cancelled(
            cancel,
            self.rpc.estimate_smart_fee(self.config.confirmation_target),
        )
        .await;
        match estimate {
            Ok(fee_rate) => Ok(Some(fee_rate)),
            Err(ApiError::Cancelled) => Err(ArenaError::Cancelled),
            Err(err) => {
                warn!(%err, "fee estimation failed, blame round keeps the previous fee rate");
                Ok(None)
            }
        }
    }

    /// Ends the round at `index` after signing failed and, if enough honest inputs remain,
    /// starts a blame round restricted to them.
    ///
    /// The blame round uses `fee_rate`, or the failed round's rate when it is `None`.
    fn fail_signing(
        &self,
        rounds: &mut Vec<Round>,
        index: usize,
        culprits: &[AliceId],
        reason: EndRoundState,
        fee_rate: Option<FeeRate>,
        now: Instant,
    ) {
        let round = &mut rounds[index];
        for id in culprits {
            self.alices.release(id);
        }
        let remaining = round.fail_signing(culprits, reason, now);
        self.release_alices(round);

        let parameters = round.parameters();
        if remaining.len() < parameters.min_input_count {
            return;
        }

        let fee_rate = fee_rate.unwrap_or(parameters.fee_rate);
        let blame_parameters = RoundParameters::from_config(&self.config, fee_rate, true);
        let blame = Round::new_blame(
            blame_parameters,
            round.id(),
            remaining,
            now,
            &mut thread_rng(),
        );
        info!(
            round_id = %blame.id(),
            blame_of = %round.id(),
            whitelist = blame.blame_whitelist().len(),
            "blame round created"
        );
        rounds.push(blame);
    }

    async fn step_output_registration(&self) {
        let now = Instant::now();
        let mut rounds = self.rounds.lock().await;

        for round in rounds
            .iter_mut()
            .filter(|r| r.phase() == Phase::OutputRegistration)
        {
            let timeout = round.parameters().output_registration_timeout;
            if !round.all_ready_to_sign() && !round.phase_expired(now, timeout) {
                continue;
            }

            if let Err(err) = round.finalize_output_registration(now) {
                warn!(round_id = %round.id(), %err, "cannot finalize transaction");
                round.end(EndRoundState::AbortedWithError, now);
                self.release_alices(round);
            }
        }
    }

    async fn step_connection_confirmation(&self) {
        let now = Instant::now();
        let candidates: Vec<AliceId> = {
            let rounds = self.rounds.lock().await;
            rounds
                .iter()
                .filter(|r| is_connection_confirmation_over(r, now))
                .flat_map(|r| r.alices().iter().filter(|a| !a.confirmed_connection))
                .map(|a| a.id)
                .collect()
        };

        let guards = self.alices.lock_many(&candidates).await;
        let locked: HashSet<AliceId> = guards.iter().map(|(id, _)| *id).collect();

        let now = Instant::now();
        let mut rounds = self.rounds.lock().await;
        for round in rounds
            .iter_mut()
            .filter(|r| is_connection_confirmation_over(r, now))
        {
            let unconfirmed: Vec<(AliceId, OutPoint)> = round
                .alices()
                .iter()
                .filter(|a| !a.confirmed_connection)
                .map(|a| (a.id, a.coin.outpoint))
                .collect();
            if unconfirmed.iter().any(|(id, _)| !locked.contains(id)) {
                // Became due after the snapshot; handled on the next tick.
                continue;
            }

            {
                let mut prison = self.prison.lock();
                for (id, outpoint) in &unconfirmed {
                    prison.note(*outpoint, round.id());
                    round.remove_alice(id);
                    self.alices.release(id);
                }
            }

            if round.alices().len() < round.parameters().min_input_count {
                round.end(EndRoundState::AbortedNotEnoughAlices, now);
                self.release_alices(round);
            } else {
                round.set_phase(Phase::OutputRegistration, now);
            }
        }
    }

    async fn step_input_registration(&self) {
        let now = Instant::now();
        let mut rounds = self.rounds.lock().await;

        for round in rounds
            .iter_mut()
            .filter(|r| r.phase() == Phase::InputRegistration && r.is_input_registration_ended(now))
        {
            if round.alices().len() < round.parameters().min_input_count {
                round.end(EndRoundState::AbortedNotEnoughAlices, now);
                self.release_alices(round);
            } else {
                round.set_phase(Phase::ConnectionConfirmation, now);
            }
        }
    }

    /// Creates a regular round if none is accepting inputs.
    async fn ensure_input_registration_round(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(), ArenaError> {
        if self.has_open_round(Instant::now()).await {
            return Ok(());
        }

        let fee_rate = until_cancelled(
            cancel,
            self.rpc.estimate_smart_fee(self.config.confirmation_target),
        )
        .await
        .map_err(|err| match err {
            ApiError::Node(err) => ArenaError::FeeEstimation(err),
            _ => ArenaError::Cancelled,
        })?;

        let now = Instant::now();
        let mut rounds = self.rounds.lock().await;
        if rounds.iter().any(|r| is_open(r, now)) {
            return Ok(());
        }

        let parameters = RoundParameters::from_config(&self.config, fee_rate, false);
        let round = Round::new(parameters, now, &mut thread_rng());
        info!(
            round_id = %round.id(),
            fee_rate = round.parameters().fee_rate.to_sat_per_kwu(),
            "round created"
        );
        rounds.push(round);
        Ok(())
    }

    async fn has_open_round(&self, now: Instant) -> bool {
        self.rounds.lock().await.iter().any(|r| is_open(r, now))
    }
}

fn is_open(round: &Round, now: Instant) -> bool {
    !round.is_blame_round() && !round.is_input_registration_ended(now)
}

fn is_connection_confirmation_over(round: &Round, now: Instant) -> bool {
    round.phase() == Phase::ConnectionConfirmation
        && (round.all_confirmed()
            || round.phase_expired(now, round.parameters().connection_confirmation_timeout))
}
