//! The public snapshot of a round served to participants.

use std::time::Duration;

use bitcoin::{Amount, FeeRate, Transaction};
use serde::{Deserialize, Serialize};
use wabisabi_credentials::IssuerParameters;

use crate::{
    ids::RoundId,
    phase::{EndRoundState, Phase},
};

/// Everything a participant needs to know about a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundState {
    /// The round id.
    pub id: RoundId,

    /// The round this blame round was spawned from.
    pub blame_of: Option<RoundId>,

    /// Current phase.
    pub phase: Phase,
    /// Why the round ended, if it has.
    pub end_round_state: EndRoundState,
    /// Fee rate every input and output pays.
    #[serde(with = "crate::fees::serde_sat_per_kwu")]
    pub fee_rate: FeeRate,
    /// Parameters of the amount credential issuer.
    pub amount_issuer: IssuerParameters,
    /// Parameters of the vsize credential issuer.
    pub vsize_issuer: IssuerParameters,

    /// Smallest input or output amount accepted.
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub min_registrable_amount: Amount,

    /// Largest input or output amount accepted.
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub max_registrable_amount: Amount,

    /// Vsize each Alice may spend on its input and outputs.
    pub max_vsize_allocation_per_alice: u64,
    /// String ownership proofs must commit to.
    pub coordinator_identifier: String,
    /// How long connection confirmation lasts.
    pub connection_confirmation_timeout: Duration,
    /// Number of registered inputs.
    pub input_count: usize,
    /// Whether the coinjoin was broadcast.
    pub was_transaction_broadcast: bool,

    /// The transaction to sign, present from transaction signing on.
    pub unsigned_transaction: Option<Transaction>,
}

impl RoundState {
    /// Whether this is a blame round.
    pub const fn is_blame_round(&self) -> bool {
        self.blame_of.is_some()
    }
}
