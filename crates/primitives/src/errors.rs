//! Errors returned to participants.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use wabisabi_credentials::CredentialError;

use crate::{node::NodeRpcError, phase::Phase};

/// Machine readable reason a request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolErrorCode {
    /// No round with the given id exists.
    RoundNotFound,
    /// The round is not in the phase the request needs.
    WrongPhase,
    /// No Alice with the given id exists in the round.
    AliceNotFound,
    /// The input is already registered.
    AliceAlreadyRegistered,
    /// The Alice has already confirmed its connection.
    AliceAlreadyConfirmedConnection,
    /// The round is a blame round and the input is not on its whitelist.
    InputNotWhitelisted,
    /// The ownership proof does not match the input or round.
    WrongOwnershipProof,
    /// The script type is not accepted for inputs or outputs.
    ScriptNotAllowed,
    /// The amount credential request does not match the Alice's entitlement.
    IncorrectRequestedAmountCredentials,
    /// The vsize credential request does not match the Alice's or output's entitlement.
    IncorrectRequestedVsizeCredentials,
    /// A reissuance request has a non-zero delta.
    DeltaNotZero,
    /// A credential request has the wrong number of credentials.
    WrongNumberOfCreds,
    /// Credential presentation or issuance failed verification.
    InvalidCredentials,
    /// A signature does not verify.
    WrongSignature,
    /// The input has already been signed.
    AlreadySigned,
    /// The input index does not exist in the transaction.
    InvalidInputIndex,
    /// The input is already part of the coinjoin.
    DuplicateInput,
    /// The amount exceeds the allowed maximum.
    TooMuchFunds,
    /// The amount is below the allowed minimum.
    NotEnoughFunds,
    /// The coinjoin would exceed its maximum size.
    TooMuchVsize,
    /// The round's vsize budget is used up.
    VsizeQuotaExceeded,
    /// The input is banned.
    InputBanned,
    /// The input is spent or does not exist.
    InputSpent,
    /// The input is not confirmed.
    InputUnconfirmed,
    /// The input is an immature coinbase output.
    InputImmature,
}

/// Coarse grouping of [`ProtocolErrorCode`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// The request breaks the protocol.
    ProtocolViolation,
    /// The request asks for more (or less) than the round can give.
    ResourceExhaustion,
    /// The coin is not eligible to participate.
    EligibilityViolation,
}

impl ProtocolErrorCode {
    /// The category this code belongs to.
    pub const fn category(self) -> ErrorCategory {
        match self {
            Self::TooMuchFunds
            | Self::NotEnoughFunds
            | Self::TooMuchVsize
            | Self::VsizeQuotaExceeded => ErrorCategory::ResourceExhaustion,
            Self::InputBanned | Self::InputSpent | Self::InputUnconfirmed | Self::InputImmature => {
                ErrorCategory::EligibilityViolation
            }
            _ => ErrorCategory::ProtocolViolation,
        }
    }
}

impl fmt::Display for ProtocolErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A structured rejection of a participant's request.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct ProtocolError {
    /// What went wrong.
    pub code: ProtocolErrorCode,

    /// Human readable detail.
    pub message: String,
}

impl ProtocolError {
    /// Creates an error with a detail message.
    pub fn new(code: ProtocolErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The round is not in `expected`.
    pub fn wrong_phase(actual: Phase, expected: Phase) -> Self {
        Self::new(
            ProtocolErrorCode::WrongPhase,
            format!("round is in {actual}, expected {expected}"),
        )
    }

    /// The category of this error.
    pub const fn category(&self) -> ErrorCategory {
        self.code.category()
    }
}

impl From<ProtocolErrorCode> for ProtocolError {
    fn from(code: ProtocolErrorCode) -> Self {
        Self::new(code, code.to_string())
    }
}

impl From<CredentialError> for ProtocolError {
    fn from(err: CredentialError) -> Self {
        let code = match err {
            CredentialError::InvalidCredentialCount { .. } => ProtocolErrorCode::WrongNumberOfCreds,
            CredentialError::ValueOutOfRange { .. } => ProtocolErrorCode::TooMuchFunds,
            _ => ProtocolErrorCode::InvalidCredentials,
        };
        Self::new(code, err.to_string())
    }
}

/// Errors a caller of the coordinator API can observe.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The coordinator rejected the request.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The coordinator's Bitcoin node failed.
    #[error("node error: {0}")]
    Node(#[from] NodeRpcError),

    /// The request did not reach the coordinator or the reply was malformed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The request was cancelled.
    #[error("request cancelled")]
    Cancelled,
}

impl ApiError {
    /// The protocol error code, if this is a protocol rejection.
    pub const fn protocol_code(&self) -> Option<ProtocolErrorCode> {
        match self {
            Self::Protocol(err) => Some(err.code),
            _ => None,
        }
    }
}

impl From<ProtocolErrorCode> for ApiError {
    fn from(code: ProtocolErrorCode) -> Self {
        Self::Protocol(code.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_categorized() {
        assert_eq!(
            ProtocolErrorCode::WrongPhase.category(),
            ErrorCategory::ProtocolViolation
        );
        assert_eq!(
            ProtocolErrorCode::VsizeQuotaExceeded.category(),
            ErrorCategory::ResourceExhaustion
        );
        assert_eq!(
            ProtocolErrorCode::InputImmature.category(),
            ErrorCategory::EligibilityViolation
        );
    }

    #[test]
    fn protocol_error_round_trips_through_json() {
        let err = ProtocolError::wrong_phase(Phase::Ended, Phase::InputRegistration);
        let json = serde_json::to_value(&err).expect("serialize");

        assert_eq!(json["code"], "WrongPhase");
        assert_eq!(
            serde_json::from_value::<ProtocolError>(json).expect("deserialize"),
            err
        );
    }
}
