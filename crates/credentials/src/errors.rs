//! Error types for credential issuance and presentation.

use thiserror::Error;

use crate::credential::SerialNumber;

/// Reasons a credential request (or its commit) is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    /// The request presents or requests the wrong number of credentials.
    #[error("expected {expected} {kind} credentials but got {got}")]
    InvalidCredentialCount {
        /// Either `"presented"` or `"requested"`.
        kind: &'static str,
        /// The number the protocol requires.
        expected: usize,
        /// The number found in the request.
        got: usize,
    },

    /// A requested credential value exceeds the issuer's maximum.
    #[error("requested value {value} exceeds the maximum of {max}")]
    ValueOutOfRange {
        /// The offending value.
        value: u64,
        /// The issuer's maximum.
        max: u64,
    },

    /// A zero-credential request asked for a non-zero value or presented credentials.
    #[error("zero credential request must neither present credentials nor request value")]
    NonZeroRequest,

    /// A presented credential was not issued by this issuer or was tampered with.
    #[error("credential {0} does not carry a valid issuer mac")]
    InvalidMac(SerialNumber),

    /// A presented credential was already spent.
    #[error("credential {0} was already spent")]
    CredentialAlreadySpent(SerialNumber),

    /// The same serial number appears twice within a request or a commit batch.
    #[error("serial number {0} appears more than once")]
    DuplicateSerial(SerialNumber),

    /// A requested serial number was already used for an earlier issuance.
    #[error("serial number {0} was already issued")]
    SerialReused(SerialNumber),

    /// The requested values do not equal the presented values plus the delta.
    #[error("requested {requested} != presented {presented} + delta {delta}")]
    UnbalancedRequest {
        /// Sum of requested values.
        requested: i128,
        /// Sum of presented values.
        presented: i128,
        /// The public delta.
        delta: i64,
    },

    /// Accepting the request would drive the issuer's balance below zero.
    #[error("issuer balance {balance} cannot absorb delta {delta}")]
    NegativeBalance {
        /// The balance before the request.
        balance: i64,
        /// The request delta.
        delta: i64,
    },

    /// A prepared response was committed to an issuer that did not prepare it.
    #[error("prepared response belongs to a different issuer")]
    WrongIssuer,

    /// The issuer's response does not match what was requested.
    #[error("issuer response does not match the request")]
    ResponseMismatch,

    /// The holder does not have enough credentials of the required kind.
    #[error("not enough {0} credentials in the pool")]
    InsufficientCredentials(&'static str),
}
