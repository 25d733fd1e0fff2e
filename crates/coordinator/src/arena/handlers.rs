//! Participant requests.

use std::sync::Arc;

use bitcoin::Amount;
use rand::thread_rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wabisabi_credentials::{CredentialIssuer, CredentialsResponse, PreparedResponse};
use wabisabi_primitives::{
    coin::Coin,
    constants::COINBASE_MATURITY,
    errors::{ApiError, ProtocolError, ProtocolErrorCode},
    fees::{is_allowed_output_script, output_vsize},
    ids::{AliceId, RoundId},
    messages::{
        ConnectionConfirmationRequest, ConnectionConfirmationResponse, InputRegistrationRequest,
        InputRegistrationResponse, InputsRemovalRequest, OutputRegistrationRequest,
        OutputRegistrationResponse, ReadyToSignRequest, ReissueCredentialRequest,
        ReissueCredentialResponse, TransactionSignaturesRequest,
    },
    ownership::CommitmentData,
    phase::{EndRoundState, Phase},
};

use super::{find_round, find_round_mut, registry::AliceEntry, until_cancelled, Arena};
use crate::{alice::Alice, bob::Bob};

/// Validates and applies one batch per issuer, all or nothing.
fn commit_batches(
    amount_issuer: &CredentialIssuer,
    amount_batch: Vec<PreparedResponse>,
    vsize_issuer: &CredentialIssuer,
    vsize_batch: Vec<PreparedResponse>,
) -> Result<(Vec<CredentialsResponse>, Vec<CredentialsResponse>), ProtocolError> {
    amount_issuer.validate(&amount_batch)?;
    vsize_issuer.validate(&vsize_batch)?;

    let amount = amount_issuer.commit(amount_batch)?;
    let vsize = vsize_issuer.commit(vsize_batch)?;
    Ok((amount, vsize))
}

fn next_response(
    responses: &mut impl Iterator<Item = CredentialsResponse>,
) -> Result<CredentialsResponse, ProtocolError> {
    responses.next().ok_or_else(|| {
        ProtocolError::new(
            ProtocolErrorCode::InvalidCredentials,
            "issuer returned fewer responses than requested",
        )
    })
}

impl Arena {
    /// Looks up an Alice registered in `round_id`.
    fn registered_alice(
        &self,
        id: &AliceId,
        round_id: &RoundId,
    ) -> Result<Arc<AliceEntry>, ProtocolError> {
        self.alices
            .get(id)
            .filter(|entry| entry.round_id == *round_id)
            .ok_or_else(|| ProtocolErrorCode::AliceNotFound.into())
    }

    pub(super) async fn handle_register_input(
        &self,
        request: InputRegistrationRequest,
        cancel: &CancellationToken,
    ) -> Result<InputRegistrationResponse, ApiError> {
        let outpoint = request.input;

        let (parameters, amount_issuer, vsize_issuer) = {
            let rounds = self.rounds.lock().await;
            let round = find_round(&rounds, &request.round_id)?;
            round.ensure_accepting_inputs(Instant::now())?;
            round.ensure_whitelisted(&outpoint)?;
            round.ensure_vsize_quota()?;
            (
                round.parameters().clone(),
                round.amount_issuer().clone(),
                round.vsize_issuer().clone(),
            )
        };

        let banned = self
            .prison
            .lock()
            .is_banned(&outpoint, self.config.allow_noted_input_registration);
        if banned {
            return Err(ProtocolErrorCode::InputBanned.into());
        }

        let alice_id = AliceId::random(&mut thread_rng());
        let reservation = self
            .alices
            .reserve(alice_id, request.round_id, outpoint)
            .ok_or(ProtocolErrorCode::AliceAlreadyRegistered)?;

        let info = until_cancelled(cancel, self.rpc.get_tx_out(outpoint, true))
            .await?
            .ok_or(ProtocolErrorCode::InputSpent)?;
        if info.confirmations == 0 {
            return Err(ProtocolErrorCode::InputUnconfirmed.into());
        }
        if info.is_coinbase && info.confirmations < COINBASE_MATURITY {
            return Err(ProtocolErrorCode::InputImmature.into());
        }

        let coin = Coin::new(outpoint, info.txout);
        if !coin.script_pubkey().is_p2wpkh() {
            return Err(ProtocolErrorCode::ScriptNotAllowed.into());
        }

        let commitment = CommitmentData {
            coordinator_identifier: &parameters.coordinator_identifier,
            round_id: request.round_id,
        };
        if !request
            .ownership_proof
            .verify(coin.script_pubkey(), &commitment)
        {
            return Err(ProtocolErrorCode::WrongOwnershipProof.into());
        }

        if coin.amount() < parameters.min_registrable_amount
            || coin.effective_value(parameters.fee_rate).is_none()
        {
            return Err(ProtocolErrorCode::NotEnoughFunds.into());
        }
        if coin.amount() > parameters.max_registrable_amount {
            return Err(ProtocolErrorCode::TooMuchFunds.into());
        }
        let input_vsize = coin
            .input_vsize()
            .ok_or(ProtocolErrorCode::ScriptNotAllowed)?;
        if input_vsize > parameters.max_vsize_allocation_per_alice {
            return Err(ProtocolErrorCode::TooMuchVsize.into());
        }

        let amount_zero = amount_issuer
            .prepare_response(&request.zero_amount_credentials)
            .map_err(ProtocolError::from)?;
        let vsize_zero = vsize_issuer
            .prepare_response(&request.zero_vsize_credentials)
            .map_err(ProtocolError::from)?;

        let now = Instant::now();
        let mut rounds = self.rounds.lock().await;
        let round = find_round_mut(&mut rounds, &request.round_id)?;
        round.ensure_accepting_inputs(now)?;
        round.ensure_whitelisted(&outpoint)?;
        round.ensure_vsize_quota()?;
        // Only checks the input fits; the coin joins the transaction once its connection is
        // confirmed.
        round
            .construction()?
            .add_input(coin.clone())
            .map_err(ProtocolError::from)?;

        let (amount, vsize) = commit_batches(
            &amount_issuer,
            vec![amount_zero],
            &vsize_issuer,
            vec![vsize_zero],
        )?;

        round.add_alice(Alice::new(
            alice_id,
            coin,
            request.ownership_proof,
            now,
            parameters.connection_confirmation_timeout,
        ));
        reservation.commit();

        info!(
            round_id = %request.round_id,
            %alice_id,
            %outpoint,
            inputs = round.alices().len(),
            "input registered"
        );

        Ok(InputRegistrationResponse {
            alice_id,
            amount_credentials: next_response(&mut amount.into_iter())?,
            vsize_credentials: next_response(&mut vsize.into_iter())?,
        })
    }

    pub(super) async fn handle_confirm_connection(
        &self,
        request: ConnectionConfirmationRequest,
    ) -> Result<ConnectionConfirmationResponse, ProtocolError> {
        let entry = self.registered_alice(&request.alice_id, &request.round_id)?;
        let _alice = entry.lock().await;

        let (phase, coin, amount_issuer, vsize_issuer) = {
            let rounds = self.rounds.lock().await;
            let round = find_round(&rounds, &request.round_id)?;
            let phase = round.phase();
            if phase > Phase::ConnectionConfirmation {
                return Err(ProtocolError::wrong_phase(
                    phase,
                    Phase::ConnectionConfirmation,
                ));
            }

            let alice = round.alice(&request.alice_id)?;
            if alice.confirmed_connection {
                return Err(ProtocolErrorCode::AliceAlreadyConfirmedConnection.into());
            }

            let parameters = round.parameters();
            let amount = alice
                .amount_entitlement(parameters.fee_rate)
                .ok_or(ProtocolErrorCode::NotEnoughFunds)?;
            if request.real_amount_credentials.delta != amount.to_sat() as i64 {
                return Err(ProtocolErrorCode::IncorrectRequestedAmountCredentials.into());
            }
            let vsize = alice
                .vsize_entitlement(parameters.max_vsize_allocation_per_alice)
                .ok_or(ProtocolErrorCode::TooMuchVsize)?;
            if request.real_vsize_credentials.delta != vsize as i64 {
                return Err(ProtocolErrorCode::IncorrectRequestedVsizeCredentials.into());
            }

            (
                phase,
                alice.coin.clone(),
                round.amount_issuer().clone(),
                round.vsize_issuer().clone(),
            )
        };

        let amount_zero = amount_issuer.prepare_response(&request.zero_amount_credentials)?;
        let vsize_zero = vsize_issuer.prepare_response(&request.zero_vsize_credentials)?;
        let real = if phase == Phase::ConnectionConfirmation {
            Some((
                amount_issuer.prepare_response(&request.real_amount_credentials)?,
                vsize_issuer.prepare_response(&request.real_vsize_credentials)?,
            ))
        } else {
            None
        };

        let now = Instant::now();
        let mut rounds = self.rounds.lock().await;
        let round = find_round_mut(&mut rounds, &request.round_id)?;
        if round.phase() > Phase::ConnectionConfirmation {
            return Err(ProtocolError::wrong_phase(
                round.phase(),
                Phase::ConnectionConfirmation,
            ));
        }
        round.alice(&request.alice_id)?;

        let Some((amount_real, vsize_real)) = real else {
            // Still registering inputs: the Alice stays alive for another timeout.
            let timeout = round.parameters().connection_confirmation_timeout;
            round
                .alice_mut(&request.alice_id)?
                .set_deadline_relative_to(now, timeout);

            let (amount, vsize) = commit_batches(
                &amount_issuer,
                vec![amount_zero],
                &vsize_issuer,
                vec![vsize_zero],
            )?;
            debug!(alice_id = %request.alice_id, "input registration confirmed");

            return Ok(ConnectionConfirmationResponse {
                zero_amount_credentials: next_response(&mut amount.into_iter())?,
                zero_vsize_credentials: next_response(&mut vsize.into_iter())?,
                real_amount_credentials: None,
                real_vsize_credentials: None,
            });
        };

        let state = round
            .construction()?
            .add_input(coin)
            .map_err(ProtocolError::from)?;
        let (amount, vsize) = commit_batches(
            &amount_issuer,
            vec![amount_zero, amount_real],
            &vsize_issuer,
            vec![vsize_zero, vsize_real],
        )?;
        round.update_construction(state);
        round.alice_mut(&request.alice_id)?.confirmed_connection = true;

        info!(
            round_id = %request.round_id,
            alice_id = %request.alice_id,
            "connection confirmed"
        );

        let mut amount = amount.into_iter();
        let mut vsize = vsize.into_iter();
        Ok(ConnectionConfirmationResponse {
            zero_amount_credentials: next_response(&mut amount)?,
            zero_vsize_credentials: next_response(&mut vsize)?,
            real_amount_credentials: Some(next_response(&mut amount)?),
            real_vsize_credentials: Some(next_response(&mut vsize)?),
        })
    }

    pub(super) async fn handle_register_output(
        &self,
        request: OutputRegistrationRequest,
    ) -> Result<OutputRegistrationResponse, ProtocolError> {
        let (fee_rate, amount_issuer, vsize_issuer) = {
            let rounds = self.rounds.lock().await;
            let round = find_round(&rounds, &request.round_id)?;
            round.ensure_phase(Phase::OutputRegistration)?;
            (
                round.parameters().fee_rate,
                round.amount_issuer().clone(),
                round.vsize_issuer().clone(),
            )
        };

        if !is_allowed_output_script(&request.script) {
            return Err(ProtocolErrorCode::ScriptNotAllowed.into());
        }

        let vsize = output_vsize(&request.script);
        if request.vsize_credentials.delta != -(vsize as i64) {
            return Err(ProtocolErrorCode::IncorrectRequestedVsizeCredentials.into());
        }

        let credential_amount = request
            .amount_credentials
            .delta
            .checked_neg()
            .filter(|v| *v > 0)
            .ok_or(ProtocolErrorCode::IncorrectRequestedAmountCredentials)?;
        let bob = Bob::new(request.script, Amount::from_sat(credential_amount as u64));
        let output = bob
            .txout(fee_rate)
            .ok_or(ProtocolErrorCode::NotEnoughFunds)?;

        let amount_prepared = amount_issuer.prepare_response(&request.amount_credentials)?;
        let vsize_prepared = vsize_issuer.prepare_response(&request.vsize_credentials)?;

        let mut rounds = self.rounds.lock().await;
        let round = find_round_mut(&mut rounds, &request.round_id)?;
        round.ensure_phase(Phase::OutputRegistration)?;
        let state = round.construction()?.add_output(output)?;

        let (amount, vsize) = commit_batches(
            &amount_issuer,
            vec![amount_prepared],
            &vsize_issuer,
            vec![vsize_prepared],
        )?;
        round.update_construction(state);
        info!(
            round_id = %request.round_id,
            value = %bob.credential_amount,
            "output registered"
        );
        round.add_bob(bob);

        Ok(OutputRegistrationResponse {
            amount_credentials: next_response(&mut amount.into_iter())?,
            vsize_credentials: next_response(&mut vsize.into_iter())?,
        })
    }

    pub(super) async fn handle_ready_to_sign(
        &self,
        request: ReadyToSignRequest,
    ) -> Result<(), ProtocolError> {
        let entry = self.registered_alice(&request.alice_id, &request.round_id)?;
        let _alice = entry.lock().await;

        let (script, coordinator_identifier) = {
            let rounds = self.rounds.lock().await;
            let round = find_round(&rounds, &request.round_id)?;
            round.ensure_phase(Phase::OutputRegistration)?;
            let alice = round.alice(&request.alice_id)?;
            (
                alice.coin.script_pubkey().clone(),
                round.parameters().coordinator_identifier.clone(),
            )
        };

        let commitment = CommitmentData {
            coordinator_identifier: &coordinator_identifier,
            round_id: request.round_id,
        };
        if !request.ownership_proof.verify(&script, &commitment) {
            return Err(ProtocolErrorCode::WrongOwnershipProof.into());
        }

        let now = Instant::now();
        let mut rounds = self.rounds.lock().await;
        let round = find_round_mut(&mut rounds, &request.round_id)?;
        round.ensure_phase(Phase::OutputRegistration)?;
        round.alice_mut(&request.alice_id)?.ready_to_sign = true;
        debug!(alice_id = %request.alice_id, "ready to sign");

        if round.all_ready_to_sign() {
            if let Err(err) = round.finalize_output_registration(now) {
                warn!(round_id = %round.id(), %err, "cannot finalize transaction");
                round.end(EndRoundState::AbortedWithError, now);
                self.release_alices(round);
            }
        }
        Ok(())
    }

    pub(super) async fn handle_remove_input(
        &self,
        request: InputsRemovalRequest,
    ) -> Result<(), ProtocolError> {
        let Some(entry) = self.alices.get(&request.alice_id) else {
            return Ok(());
        };
        if entry.round_id != request.round_id {
            return Err(ProtocolErrorCode::AliceNotFound.into());
        }
        let _alice = entry.lock().await;

        let mut rounds = self.rounds.lock().await;
        let round = find_round_mut(&mut rounds, &request.round_id)?;
        round.ensure_phase(Phase::InputRegistration)?;
        if round.remove_alice(&request.alice_id).is_some() {
            info!(round_id = %request.round_id, alice_id = %request.alice_id, "input removed");
        }
        self.alices.release(&request.alice_id);
        Ok(())
    }

    pub(super) async fn handle_sign_transaction(
        &self,
        request: TransactionSignaturesRequest,
    ) -> Result<(), ProtocolError> {
        let mut rounds = self.rounds.lock().await;
        let round = find_round_mut(&mut rounds, &request.round_id)?;
        round.ensure_phase(Phase::TransactionSigning)?;
        round.add_witnesses(&request.input_witness_pairs)?;

        debug!(
            round_id = %request.round_id,
            witnesses = request.input_witness_pairs.len(),
            "witnesses accepted"
        );
        Ok(())
    }

    pub(super) async fn handle_reissue_credentials(
        &self,
        request: ReissueCredentialRequest,
    ) -> Result<ReissueCredentialResponse, ProtocolError> {
        let ensure_phase = |phase: Phase| {
            if phase != Phase::ConnectionConfirmation && phase != Phase::OutputRegistration {
                return Err(ProtocolError::wrong_phase(phase, Phase::OutputRegistration));
            }
            Ok(())
        };

        let (amount_issuer, vsize_issuer) = {
            let rounds = self.rounds.lock().await;
            let round = find_round(&rounds, &request.round_id)?;
            ensure_phase(round.phase())?;
            (round.amount_issuer().clone(), round.vsize_issuer().clone())
        };

        if request.real_amount_credentials.delta != 0 || request.real_vsize_credentials.delta != 0
        {
            return Err(ProtocolErrorCode::DeltaNotZero.into());
        }

        let amount_real = amount_issuer.prepare_response(&request.real_amount_credentials)?;
        let amount_zero = amount_issuer.prepare_response(&request.zero_amount_credentials)?;
        let vsize_real = vsize_issuer.prepare_response(&request.real_vsize_credentials)?;
        let vsize_zero = vsize_issuer.prepare_response(&request.zero_vsize_credentials)?;

        let rounds = self.rounds.lock().await;
        let round = find_round(&rounds, &request.round_id)?;
        ensure_phase(round.phase())?;

        let (amount, vsize) = commit_batches(
            &amount_issuer,
            vec![amount_real, amount_zero],
            &vsize_issuer,
            vec![vsize_real, vsize_zero],
        )?;

        let mut amount = amount.into_iter();
        let mut vsize = vsize.into_iter();
        Ok(ReissueCredentialResponse {
            real_amount_credentials: next_response(&mut amount)?,
            zero_amount_credentials: next_response(&mut amount)?,
            real_vsize_credentials: next_response(&mut vsize)?,
            zero_vsize_credentials: next_response(&mut vsize)?,
        })
    }
}
