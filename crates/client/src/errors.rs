//! Errors produced while taking part in a round.

use bitcoin::{Amount, OutPoint, ScriptBuf};
use thiserror::Error;
use wabisabi_primitives::{
    credentials::CredentialError,
    errors::ApiError,
    ids::RoundId,
    phase::{EndRoundState, Phase},
    witness::WitnessError,
};

/// Why a coinjoin attempt was abandoned.
#[derive(Debug, Error)]
pub enum CoinJoinClientError {
    /// Nothing to register.
    #[error("no coins to register")]
    NoCoins,

    /// The coordinator rejected a request or could not be reached.
    #[error("coordinator request failed: {0}")]
    Api(#[from] ApiError),

    /// A credential request could not be built or its response did not check out.
    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    /// Waiting for a round state failed.
    #[error("{0}")]
    Awaiter(#[from] RoundStateAwaiterError),

    /// An input could not be signed.
    #[error("cannot sign input: {0}")]
    Witness(#[from] WitnessError),

    /// The round moved somewhere other than the phase being waited for.
    #[error("round {round_id} is in {phase} ({end_round_state}) instead of {expected}")]
    UnexpectedPhase {
        /// The round.
        round_id: RoundId,
        /// Where it actually is.
        phase: Phase,
        /// Where it was expected to be.
        expected: Phase,
        /// Why it ended, if it has.
        end_round_state: EndRoundState,
    },

    /// The coins are worth too little to register them or any output.
    #[error("{0} is not enough to take part in the round")]
    NotEnoughValue(Amount),

    /// The coins are worth more than one credential may carry.
    #[error("{total} exceeds the round maximum of {max}")]
    TooMuchValue {
        /// Effective value of the coins.
        total: Amount,
        /// The round's largest registrable amount.
        max: Amount,
    },

    /// The vsize credentials cannot pay for the outputs.
    #[error("vsize credentials worth {available} cannot pay for {needed} vbytes")]
    NotEnoughVsize {
        /// Vsize credit left.
        available: u64,
        /// Vsize the next output needs.
        needed: u64,
    },

    /// The round reached transaction signing without publishing a transaction.
    #[error("round {0} published no transaction to sign")]
    MissingTransaction(RoundId),

    /// The transaction to sign lacks one of our outputs.
    #[error("transaction does not pay {amount} to {script}")]
    OutputMissing {
        /// The registered script.
        script: ScriptBuf,
        /// The amount it should receive.
        amount: Amount,
    },

    /// The transaction to sign does not spend one of our inputs.
    #[error("transaction does not spend {0}")]
    InputMissing(OutPoint),

    /// The attempt was cancelled by the caller.
    #[error("cancelled")]
    Cancelled,
}

/// Why a round state awaiter did not get the state it waited for.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoundStateAwaiterError {
    /// The coordinator no longer reports the round.
    #[error("round {0} is not running anymore")]
    RoundNotRunning(RoundId),

    /// The waiting task gave up.
    #[error("round state awaiter cancelled")]
    Cancelled,

    /// The updater was stopped.
    #[error("round state updater stopped")]
    Stopped,
}
