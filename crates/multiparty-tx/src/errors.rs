use bitcoin::{Amount, OutPoint, SignedAmount};
use thiserror::Error;
use wabisabi_primitives::{
    errors::{ProtocolError, ProtocolErrorCode},
    witness::WitnessError,
};

/// Errors adding inputs or outputs, or finalizing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstructionError {
    /// Inputs must be P2WPKH; outputs P2WPKH, P2WSH or P2TR.
    #[error("script type not allowed")]
    ScriptNotAllowed,

    /// The value is below the accepted range.
    #[error("{amount} is below the minimum of {min}")]
    NotEnoughFunds {
        /// The offending value.
        amount: Amount,
        /// The minimum.
        min: Amount,
    },

    /// The value is above the accepted range.
    #[error("{amount} is above the maximum of {max}")]
    TooMuchFunds {
        /// The offending value.
        amount: Amount,
        /// The maximum.
        max: Amount,
    },

    /// The outpoint is already an input.
    #[error("input {0} is already present")]
    DuplicateInput(OutPoint),

    /// The output would be dust.
    #[error("output of {0} is dust")]
    DustOutput(Amount),

    /// The transaction would grow beyond its size limit.
    #[error("transaction would be {vsize} vbytes, more than {max}")]
    TooMuchVsize {
        /// Size after the addition.
        vsize: u64,
        /// The limit.
        max: u64,
    },

    /// A transaction without inputs cannot be finalized.
    #[error("no inputs")]
    NoInputs,

    /// Outputs and their fees exceed what inputs provide.
    #[error("outputs exceed inputs by {0}")]
    NegativeBalance(SignedAmount),
}

/// Errors collecting witnesses.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SigningError {
    /// No input with this index.
    #[error("input index {0} is out of range")]
    InvalidInputIndex(usize),

    /// The input already has a witness.
    #[error("input {0} is already signed")]
    AlreadySigned(usize),

    /// The witness does not unlock the input.
    #[error("invalid witness for input {index}: {source}")]
    InvalidWitness {
        /// The input.
        index: usize,
        /// What is wrong with the witness.
        source: WitnessError,
    },

    /// Some inputs still lack a witness.
    #[error("{0} inputs are not signed")]
    NotFullySigned(usize),
}

/// Errors moving between states.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoinjoinStateError {
    /// The operation needs the construction state.
    #[error("transaction is already finalized")]
    AlreadyFinalized,

    /// The operation needs the signing state.
    #[error("transaction is not finalized yet")]
    NotFinalized,

    /// Finalization failed.
    #[error(transparent)]
    Construction(#[from] ConstructionError),
}

impl From<ConstructionError> for ProtocolError {
    fn from(err: ConstructionError) -> Self {
        let code = match err {
            ConstructionError::ScriptNotAllowed => ProtocolErrorCode::ScriptNotAllowed,
            ConstructionError::NotEnoughFunds { .. }
            | ConstructionError::DustOutput(_)
            | ConstructionError::NegativeBalance(_) => ProtocolErrorCode::NotEnoughFunds,
            ConstructionError::TooMuchFunds { .. } => ProtocolErrorCode::TooMuchFunds,
            ConstructionError::DuplicateInput(_) => ProtocolErrorCode::DuplicateInput,
            ConstructionError::TooMuchVsize { .. } => ProtocolErrorCode::TooMuchVsize,
            ConstructionError::NoInputs => ProtocolErrorCode::WrongPhase,
        };
        Self::new(code, err.to_string())
    }
}

impl From<SigningError> for ProtocolError {
    fn from(err: SigningError) -> Self {
        let code = match err {
            SigningError::InvalidInputIndex(_) => ProtocolErrorCode::InvalidInputIndex,
            SigningError::AlreadySigned(_) => ProtocolErrorCode::AlreadySigned,
            SigningError::InvalidWitness { .. } => ProtocolErrorCode::WrongSignature,
            SigningError::NotFullySigned(_) => ProtocolErrorCode::WrongPhase,
        };
        Self::new(code, err.to_string())
    }
}
