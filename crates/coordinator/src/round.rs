//! A single coinjoin round.
//!
//! [`Round`] holds the state of one round and the rules for moving it forward. It performs no
//! locking and no I/O. The [`Arena`](crate::arena::Arena) decides when to call into it and makes
//! sure no two callers mutate the same round at once.

use std::{collections::HashSet, sync::Arc, time::Duration};

use bitcoin::{Amount, FeeRate, OutPoint, ScriptBuf, TxOut};
use rand::{CryptoRng, RngCore};
use tokio::time::Instant;
use tracing::{info, warn};
use wabisabi_credentials::CredentialIssuer;
use wabisabi_multiparty_tx::{
    CoinjoinState, ConstructionError, ConstructionState, MultipartyTransactionParameters,
};
use wabisabi_primitives::{
    constants::SHARED_OVERHEAD_VSIZE,
    errors::{ProtocolError, ProtocolErrorCode},
    fees::{fee_for_vsize, max_vsize_allocation_per_alice, output_vsize},
    ids::{AliceId, RoundId, TranscriptHasher},
    messages::InputWitnessPair,
    ownership::CommitmentData,
    phase::{EndRoundState, Phase},
    round_state::RoundState,
};

use crate::{alice::Alice, bob::Bob, config::WabiSabiConfig};

/// The immutable parameters of a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundParameters {
    /// Fee rate paid by every input and output.
    pub fee_rate: FeeRate,

    /// Fewest inputs needed to proceed.
    pub min_input_count: usize,

    /// Most inputs accepted.
    pub max_input_count: usize,

    /// Smallest input or output value.
    pub min_registrable_amount: Amount,

    /// Largest input or output value.
    pub max_registrable_amount: Amount,

    /// Size limit of the coinjoin.
    pub max_transaction_vsize: u64,

    /// Vsize each Alice may use.
    pub max_vsize_allocation_per_alice: u64,

    /// String ownership proofs commit to.
    pub coordinator_identifier: String,

    /// Destination of unclaimed value.
    pub blame_script: ScriptBuf,

    /// How long inputs are accepted.
    pub input_registration_timeout: Duration,

    /// How long connection confirmation lasts, and how long unconfirmed Alices live.
    pub connection_confirmation_timeout: Duration,

    /// How long output registration lasts.
    pub output_registration_timeout: Duration,

    /// How long signing lasts.
    pub transaction_signing_timeout: Duration,
}

impl RoundParameters {
    /// Derives round parameters from the coordinator config.
    pub fn from_config(config: &WabiSabiConfig, fee_rate: FeeRate, is_blame_round: bool) -> Self {
        let input_registration_timeout = if is_blame_round {
            config.blame_input_registration_timeout
        } else {
            config.standard_input_registration_timeout
        };

        Self {
            fee_rate,
            min_input_count: config.min_input_count_by_round,
            max_input_count: config.max_input_count_by_round,
            min_registrable_amount: config.min_registrable_amount,
            max_registrable_amount: config.max_registrable_amount,
            max_transaction_vsize: config.max_transaction_vsize,
            max_vsize_allocation_per_alice: max_vsize_allocation_per_alice(
                config.max_transaction_vsize,
                config.max_input_count_by_round,
            ),
            coordinator_identifier: config.coordinator_identifier.clone(),
            blame_script: config.blame_script.clone(),
            input_registration_timeout,
            connection_confirmation_timeout: config.connection_confirmation_timeout,
            output_registration_timeout: config.output_registration_timeout,
            transaction_signing_timeout: config.transaction_signing_timeout,
        }
    }

    fn multiparty_parameters(&self) -> MultipartyTransactionParameters {
        let allowed = self.min_registrable_amount..=self.max_registrable_amount;
        MultipartyTransactionParameters {
            fee_rate: self.fee_rate,
            allowed_input_amounts: allowed.clone(),
            allowed_output_amounts: allowed,
            max_transaction_vsize: self.max_transaction_vsize,
        }
    }
}

/// One coinjoin round.
#[derive(Debug)]
pub struct Round {
    id: RoundId,
    parameters: Arc<RoundParameters>,
    blame_of: Option<RoundId>,
    blame_whitelist: HashSet<OutPoint>,
    phase: Phase,
    end_round_state: EndRoundState,
    coinjoin: CoinjoinState,
    alices: Vec<Alice>,
    bobs: Vec<Bob>,
    amount_issuer: Arc<CredentialIssuer>,
    vsize_issuer: Arc<CredentialIssuer>,
    input_registration_started: Instant,
    phase_started: Instant,
    was_transaction_broadcast: bool,
}

impl Round {
    /// Creates a regular round accepting inputs from `now`.
    pub fn new<R: RngCore + CryptoRng>(
        parameters: RoundParameters,
        now: Instant,
        rng: &mut R,
    ) -> Self {
        Self::create(parameters, None, HashSet::new(), now, rng)
    }

    /// Creates a blame round of `blame_of` that only accepts `whitelist`.
    pub fn new_blame<R: RngCore + CryptoRng>(
        parameters: RoundParameters,
        blame_of: RoundId,
        whitelist: HashSet<OutPoint>,
        now: Instant,
        rng: &mut R,
    ) -> Self {
        Self::create(parameters, Some(blame_of), whitelist, now, rng)
    }

    fn create<R: RngCore + CryptoRng>(
        parameters: RoundParameters,
        blame_of: Option<RoundId>,
        blame_whitelist: HashSet<OutPoint>,
        now: Instant,
        rng: &mut R,
    ) -> Self {
        let amount_issuer = Arc::new(CredentialIssuer::new(
            parameters.max_registrable_amount.to_sat(),
            rng,
        ));
        let vsize_issuer = Arc::new(CredentialIssuer::new(
            parameters.max_vsize_allocation_per_alice,
            rng,
        ));

        let mut hasher = TranscriptHasher::new("wabisabi/round-id");
        hasher
            .append_u64("fee-rate", parameters.fee_rate.to_sat_per_kwu())
            .append_u64("min-amount", parameters.min_registrable_amount.to_sat())
            .append_u64("max-amount", parameters.max_registrable_amount.to_sat())
            .append_u64("min-inputs", parameters.min_input_count as u64)
            .append_u64("max-inputs", parameters.max_input_count as u64)
            .append_u64("max-vsize", parameters.max_transaction_vsize)
            .append_u64("alice-vsize", parameters.max_vsize_allocation_per_alice)
            .append("coordinator", parameters.coordinator_identifier.as_bytes())
            .append("amount-issuer", &amount_issuer.parameters().fingerprint)
            .append("vsize-issuer", &vsize_issuer.parameters().fingerprint);
        if let Some(parent) = blame_of {
            hasher.append("blame-of", &parent.to_byte_array());
        }
        let id = RoundId::from_hash(hasher.finish());

        let coinjoin = ConstructionState::new(parameters.multiparty_parameters()).into();

        Self {
            id,
            parameters: Arc::new(parameters),
            blame_of,
            blame_whitelist,
            phase: Phase::InputRegistration,
            end_round_state: EndRoundState::None,
            coinjoin,
            alices: Vec::new(),
            bobs: Vec::new(),
            amount_issuer,
            vsize_issuer,
            input_registration_started: now,
            phase_started: now,
            was_transaction_broadcast: false,
        }
    }

    /// The round id.
    pub const fn id(&self) -> RoundId {
        self.id
    }

    /// The round's immutable parameters.
    pub fn parameters(&self) -> &Arc<RoundParameters> {
        &self.parameters
    }

    /// The current phase.
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Why the round ended, [`EndRoundState::None`] while running.
    pub const fn end_round_state(&self) -> EndRoundState {
        self.end_round_state
    }

    /// The round this one is a blame round of.
    pub const fn blame_of(&self) -> Option<RoundId> {
        self.blame_of
    }

    /// Whether this is a blame round.
    pub const fn is_blame_round(&self) -> bool {
        self.blame_of.is_some()
    }

    /// Outpoints a blame round accepts.
    pub fn blame_whitelist(&self) -> &HashSet<OutPoint> {
        &self.blame_whitelist
    }

    /// Registered inputs.
    pub fn alices(&self) -> &[Alice] {
        &self.alices
    }

    /// Registered outputs.
    pub fn bobs(&self) -> &[Bob] {
        &self.bobs
    }

    /// The transaction being built.
    pub const fn coinjoin(&self) -> &CoinjoinState {
        &self.coinjoin
    }

    /// Issuer of amount credentials.
    pub fn amount_issuer(&self) -> &Arc<CredentialIssuer> {
        &self.amount_issuer
    }

    /// Issuer of vsize credentials.
    pub fn vsize_issuer(&self) -> &Arc<CredentialIssuer> {
        &self.vsize_issuer
    }

    /// Whether the coinjoin was broadcast.
    pub const fn was_transaction_broadcast(&self) -> bool {
        self.was_transaction_broadcast
    }

    /// When the current phase started.
    pub const fn phase_started(&self) -> Instant {
        self.phase_started
    }

    /// What ownership proofs for this round commit to.
    pub fn commitment(&self) -> CommitmentData<'_> {
        CommitmentData {
            coordinator_identifier: &self.parameters.coordinator_identifier,
            round_id: self.id,
        }
    }

    /// Moves the round to `phase`.
    ///
    /// # Panics
    ///
    /// If `phase` does not come after the current phase.
    pub fn set_phase(&mut self, phase: Phase, now: Instant) {
        assert!(
            phase > self.phase,
            "round {} cannot move from {} back to {}",
            self.id,
            self.phase,
            phase
        );

        info!(round_id = %self.id, from = %self.phase, to = %phase, "phase changed");
        self.phase = phase;
        self.phase_started = now;
    }

    /// Ends the round for `reason`.
    pub fn end(&mut self, reason: EndRoundState, now: Instant) {
        if self.phase == Phase::Ended {
            return;
        }

        self.end_round_state = reason;
        if reason == EndRoundState::TransactionBroadcast {
            self.was_transaction_broadcast = true;
        }
        info!(round_id = %self.id, %reason, "round ended");
        self.set_phase(Phase::Ended, now);
    }

    /// Whether `timeout` has elapsed since the current phase started.
    pub fn phase_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.phase_started) >= timeout
    }

    /// Whether an ended round has been visible for at least `retention`.
    pub fn is_expired(&self, now: Instant, retention: Duration) -> bool {
        self.phase == Phase::Ended && self.phase_expired(now, retention)
    }

    /// Whether input registration is over: the round is full, a blame round has all its
    /// whitelisted inputs, or the registration timeout passed.
    pub fn is_input_registration_ended(&self, now: Instant) -> bool {
        if self.phase > Phase::InputRegistration {
            return true;
        }

        let full = self.alices.len() >= self.parameters.max_input_count;
        let whitelist_complete =
            self.is_blame_round() && self.alices.len() >= self.blame_whitelist.len();
        let timed_out = now.saturating_duration_since(self.input_registration_started)
            >= self.parameters.input_registration_timeout;

        full || whitelist_complete || timed_out
    }

    /// Errors unless the round is in `expected`.
    pub fn ensure_phase(&self, expected: Phase) -> Result<(), ProtocolError> {
        if self.phase != expected {
            return Err(ProtocolError::wrong_phase(self.phase, expected));
        }
        Ok(())
    }

    /// Errors unless the round accepts new inputs right now.
    pub fn ensure_accepting_inputs(&self, now: Instant) -> Result<(), ProtocolError> {
        self.ensure_phase(Phase::InputRegistration)?;
        if self.is_input_registration_ended(now) {
            return Err(ProtocolError::new(
                ProtocolErrorCode::WrongPhase,
                "input registration is over",
            ));
        }
        Ok(())
    }

    /// Errors if this is a blame round and `outpoint` is not on its whitelist.
    pub fn ensure_whitelisted(&self, outpoint: &OutPoint) -> Result<(), ProtocolError> {
        if self.is_blame_round() && !self.blame_whitelist.contains(outpoint) {
            return Err(ProtocolErrorCode::InputNotWhitelisted.into());
        }
        Ok(())
    }

    /// Errors if one more Alice would exceed the round's vsize budget.
    pub fn ensure_vsize_quota(&self) -> Result<(), ProtocolError> {
        let allocation = self.parameters.max_vsize_allocation_per_alice;
        let used = SHARED_OVERHEAD_VSIZE + allocation * self.alices.len() as u64;
        if used + allocation > self.parameters.max_transaction_vsize {
            return Err(ProtocolErrorCode::VsizeQuotaExceeded.into());
        }
        Ok(())
    }

    /// The construction state, or `WrongPhase` once finalized.
    pub fn construction(&self) -> Result<&ConstructionState, ProtocolError> {
        self.coinjoin
            .as_construction()
            .map_err(|e| ProtocolError::new(ProtocolErrorCode::WrongPhase, e.to_string()))
    }

    /// Replaces the construction state with one derived from it.
    pub fn update_construction(&mut self, state: ConstructionState) {
        debug_assert!(!self.coinjoin.is_finalized());
        self.coinjoin = CoinjoinState::Construction(state);
    }

    /// Looks up an Alice of this round.
    pub fn alice(&self, id: &AliceId) -> Result<&Alice, ProtocolError> {
        self.alices
            .iter()
            .find(|a| a.id == *id)
            .ok_or_else(|| ProtocolErrorCode::AliceNotFound.into())
    }

    /// Looks up an Alice of this round for modification.
    pub fn alice_mut(&mut self, id: &AliceId) -> Result<&mut Alice, ProtocolError> {
        self.alices
            .iter_mut()
            .find(|a| a.id == *id)
            .ok_or_else(|| ProtocolErrorCode::AliceNotFound.into())
    }

    /// Adds a registered input.
    ///
    /// # Panics
    ///
    /// If an Alice with the same id or outpoint is already present.
    pub fn add_alice(&mut self, alice: Alice) {
        assert!(
            !self
                .alices
                .iter()
                .any(|a| a.id == alice.id || a.coin.outpoint == alice.coin.outpoint),
            "alice {} registered twice in round {}",
            alice.id,
            self.id
        );
        self.alices.push(alice);
    }

    /// Removes an Alice, returning it if it was present. The coin is dropped from the
    /// transaction as well while it is still under construction.
    pub fn remove_alice(&mut self, id: &AliceId) -> Option<Alice> {
        let pos = self.alices.iter().position(|a| a.id == *id)?;
        let alice = self.alices.remove(pos);

        if let CoinjoinState::Construction(state) = &self.coinjoin {
            self.coinjoin = state.remove_input(&alice.coin.outpoint).into();
        }
        Some(alice)
    }

    /// Adds a registered output.
    pub fn add_bob(&mut self, bob: Bob) {
        self.bobs.push(bob);
    }

    /// Whether every Alice has confirmed its connection.
    pub fn all_confirmed(&self) -> bool {
        self.alices.iter().all(|a| a.confirmed_connection)
    }

    /// Whether every Alice signalled it is ready to sign.
    pub fn all_ready_to_sign(&self) -> bool {
        !self.alices.is_empty() && self.alices.iter().all(|a| a.ready_to_sign)
    }

    /// Value neither claimed by an output nor needed for fees, after paying for one more output
    /// to the blame script.
    pub fn blame_residual(&self) -> Result<Option<TxOut>, ProtocolError> {
        let state = self.construction()?;
        let blame_fee = fee_for_vsize(
            self.parameters.fee_rate,
            output_vsize(&self.parameters.blame_script),
        );
        let residual = state.balance().to_sat() - blame_fee.to_sat() as i64;

        if residual < self.parameters.min_registrable_amount.to_sat() as i64 {
            return Ok(None);
        }

        Ok(Some(TxOut {
            value: Amount::from_sat(residual as u64),
            script_pubkey: self.parameters.blame_script.clone(),
        }))
    }

    /// Ends output registration, fixes the transaction and moves to transaction signing.
    ///
    /// Unless every Alice signalled ready to sign, a residual worth at least the minimum
    /// registrable amount is paid to the blame script. Otherwise it is left to the fee.
    pub fn finalize_output_registration(&mut self, now: Instant) -> Result<(), ConstructionError> {
        let mut state = self
            .coinjoin
            .as_construction()
            .map_err(|_| ConstructionError::NoInputs)?
            .clone();

        let residual = if self.all_ready_to_sign() {
            None
        } else {
            self.blame_residual().ok().flatten()
        };
        if let Some(residual) = residual {
            info!(
                round_id = %self.id,
                value = %residual.value,
                "paying unclaimed value to blame script"
            );
            state = state.add_output(residual)?;
        }

        let signing = state.finalize()?;
        self.coinjoin = CoinjoinState::Signing(signing);
        self.set_phase(Phase::TransactionSigning, now);
        Ok(())
    }

    /// Applies a batch of witnesses. Either all of them are recorded or none is.
    pub fn add_witnesses(&mut self, pairs: &[InputWitnessPair]) -> Result<(), ProtocolError> {
        let mut state = self
            .coinjoin
            .as_signing()
            .map_err(|e| ProtocolError::new(ProtocolErrorCode::WrongPhase, e.to_string()))?
            .clone();

        for pair in pairs {
            state = state.add_witness(pair.input_index as usize, pair.witness.clone())?;
        }

        self.coinjoin = CoinjoinState::Signing(state);
        Ok(())
    }

    /// Alices whose inputs have no witness yet.
    pub fn alices_without_witness(&self) -> Vec<AliceId> {
        let Ok(state) = self.coinjoin.as_signing() else {
            return Vec::new();
        };

        let unsigned: HashSet<_> = state.unsigned_inputs().map(|c| c.outpoint).collect();
        self.alices
            .iter()
            .filter(|a| unsigned.contains(&a.coin.outpoint))
            .map(|a| a.id)
            .collect()
    }

    /// Records a failed signing phase: removes `culprits`, ends the round for `reason` and
    /// returns the outpoints of the remaining inputs.
    pub fn fail_signing(
        &mut self,
        culprits: &[AliceId],
        reason: EndRoundState,
        now: Instant,
    ) -> HashSet<OutPoint> {
        for id in culprits {
            self.remove_alice(id);
        }
        warn!(
            round_id = %self.id,
            removed = culprits.len(),
            remaining = self.alices.len(),
            "signing failed"
        );
        self.end(reason, now);

        self.alices.iter().map(|a| a.coin.outpoint).collect()
    }

    /// The public snapshot of the round.
    pub fn to_round_state(&self) -> RoundState {
        RoundState {
            id: self.id,
            blame_of: self.blame_of,
            phase: self.phase,
            end_round_state: self.end_round_state,
            fee_rate: self.parameters.fee_rate,
            amount_issuer: self.amount_issuer.parameters(),
            vsize_issuer: self.vsize_issuer.parameters(),
            min_registrable_amount: self.parameters.min_registrable_amount,
            max_registrable_amount: self.parameters.max_registrable_amount,
            max_vsize_allocation_per_alice: self.parameters.max_vsize_allocation_per_alice,
            coordinator_identifier: self.parameters.coordinator_identifier.clone(),
            connection_confirmation_timeout: self.parameters.connection_confirmation_timeout,
            input_count: self.alices.len(),
            was_transaction_broadcast: self.was_transaction_broadcast,
            unsigned_transaction: self
                .coinjoin
                .as_signing()
                .ok()
                .map(|s| s.create_unsigned_transaction()),
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::thread_rng;
    use wabisabi_primitives::ownership::OwnershipProof;
    use wabisabi_test_utils::bitcoin::{generate_p2wpkh_coins, generate_p2wpkh_script};

    use super::*;

    fn parameters() -> RoundParameters {
        let config = WabiSabiConfig {
            min_input_count_by_round: 2,
            max_input_count_by_round: 3,
            ..Default::default()
        };
        RoundParameters::from_config(&config, FeeRate::from_sat_per_kwu(250), false)
    }

    fn alice(sats: u64, now: Instant) -> Alice {
        let (coin, key) = generate_p2wpkh_coins(&[Amount::from_sat(sats)]).remove(0);
        let commitment = CommitmentData {
            coordinator_identifier: "test",
            round_id: RoundId::from_hash(bitcoin::hashes::Hash::all_zeros()),
        };
        let proof = OwnershipProof::generate(&key, &commitment);
        Alice::new(
            AliceId::random(&mut thread_rng()),
            coin,
            proof,
            now,
            Duration::from_secs(60),
        )
    }

    #[test]
    fn round_ids_differ_between_rounds() {
        let now = Instant::now();
        let a = Round::new(parameters(), now, &mut thread_rng());
        let b = Round::new(parameters(), now, &mut thread_rng());

        assert_ne!(a.id(), b.id());
    }

    #[test]
    #[should_panic(expected = "cannot move")]
    fn phase_never_regresses() {
        let now = Instant::now();
        let mut round = Round::new(parameters(), now, &mut thread_rng());
        round.set_phase(Phase::OutputRegistration, now);
        round.set_phase(Phase::ConnectionConfirmation, now);
    }

    #[test]
    fn input_registration_ends_when_full() {
        let now = Instant::now();
        let mut round = Round::new(parameters(), now, &mut thread_rng());

        for _ in 0..2 {
            round.add_alice(alice(10_000, now));
        }
        assert!(!round.is_input_registration_ended(now));
        assert!(round.ensure_accepting_inputs(now).is_ok());

        round.add_alice(alice(10_000, now));
        assert!(round.is_input_registration_ended(now));
        assert!(round.ensure_accepting_inputs(now).is_err());
    }

    #[test]
    fn blame_round_ends_when_whitelist_is_registered() {
        let now = Instant::now();
        let a = alice(10_000, now);
        let whitelist = HashSet::from([a.coin.outpoint]);
        let parent = Round::new(parameters(), now, &mut thread_rng());
        let mut round =
            Round::new_blame(parameters(), parent.id(), whitelist, now, &mut thread_rng());

        assert!(round.ensure_whitelisted(&a.coin.outpoint).is_ok());
        assert_eq!(
            round
                .ensure_whitelisted(&alice(10_000, now).coin.outpoint)
                .map_err(|e| e.code),
            Err(ProtocolErrorCode::InputNotWhitelisted)
        );

        round.add_alice(a);
        assert!(round.is_input_registration_ended(now));
    }

    /// A round in output registration with a 100k input and a 50k output.
    fn underspent_round(ready_to_sign: bool, now: Instant) -> Round {
        let mut round = Round::new(parameters(), now, &mut thread_rng());

        let mut a = alice(100_000, now);
        a.ready_to_sign = ready_to_sign;
        let state = round
            .construction()
            .and_then(|s| s.add_input(a.coin.clone()).map_err(Into::into))
            .expect("valid input");
        round.update_construction(state);
        round.add_alice(a);

        let bob = Bob::new(generate_p2wpkh_script(), Amount::from_sat(50_000));
        let state = round
            .construction()
            .expect("under construction")
            .add_output(bob.txout(round.parameters().fee_rate).expect("positive"))
            .expect("valid output");
        round.update_construction(state);
        round.add_bob(bob);

        round.set_phase(Phase::ConnectionConfirmation, now);
        round.set_phase(Phase::OutputRegistration, now);
        round
    }

    #[test]
    fn residual_goes_to_blame_script() {
        let now = Instant::now();
        let mut round = underspent_round(false, now);
        round
            .finalize_output_registration(now)
            .expect("must finalize");

        let signing = round.coinjoin().as_signing().expect("finalized");
        let blame_output = signing
            .outputs()
            .iter()
            .find(|o| o.script_pubkey == round.parameters().blame_script)
            .expect("blame output present");

        // 100_000 - 68 (input) - 50_000 (bob) - 43 (p2wsh blame output)
        assert_eq!(blame_output.value, Amount::from_sat(49_889));
        assert_eq!(round.phase(), Phase::TransactionSigning);
    }

    #[test]
    fn residual_is_left_to_fees_when_all_are_ready() {
        let now = Instant::now();
        let mut round = underspent_round(true, now);
        round
            .finalize_output_registration(now)
            .expect("must finalize");

        let signing = round.coinjoin().as_signing().expect("finalized");
        assert_eq!(signing.outputs().len(), 1);
        assert!(signing
            .outputs()
            .iter()
            .all(|o| o.script_pubkey != round.parameters().blame_script));
        assert_eq!(round.phase(), Phase::TransactionSigning);
    }

    #[test]
    fn ending_is_idempotent() {
        let now = Instant::now();
        let mut round = Round::new(parameters(), now, &mut thread_rng());
        round.end(EndRoundState::AbortedNotEnoughAlices, now);
        round.end(EndRoundState::AbortedWithError, now);

        assert_eq!(round.phase(), Phase::Ended);
        assert_eq!(
            round.end_round_state(),
            EndRoundState::AbortedNotEnoughAlices
        );
    }
}
