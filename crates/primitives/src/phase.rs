//! Round phases and the reasons a round ends.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The phase a round is in. Phases are ordered and a round only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    /// Inputs are being registered.
    InputRegistration,

    /// Registered inputs confirm they are still present and receive real credentials.
    ConnectionConfirmation,

    /// Outputs are being registered against credentials.
    OutputRegistration,

    /// The transaction is fixed and witnesses are being collected.
    TransactionSigning,

    /// The round is over, see [`EndRoundState`].
    Ended,
}

impl Phase {
    /// Returns the phase that follows this one, if any.
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::InputRegistration => Some(Self::ConnectionConfirmation),
            Self::ConnectionConfirmation => Some(Self::OutputRegistration),
            Self::OutputRegistration => Some(Self::TransactionSigning),
            Self::TransactionSigning => Some(Self::Ended),
            Self::Ended => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InputRegistration => "input-registration",
            Self::ConnectionConfirmation => "connection-confirmation",
            Self::OutputRegistration => "output-registration",
            Self::TransactionSigning => "transaction-signing",
            Self::Ended => "ended",
        };
        f.write_str(name)
    }
}

/// Why a round reached [`Phase::Ended`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndRoundState {
    /// The round has not ended.
    #[default]
    None,

    /// The coinjoin was broadcast.
    TransactionBroadcast,

    /// The node rejected the coinjoin.
    TransactionBroadcastFailed,

    /// Too few inputs registered or confirmed.
    AbortedNotEnoughAlices,

    /// Some inputs were never signed before the signing deadline.
    AbortedNotEnoughAlicesSigned,

    /// The round failed for another reason.
    AbortedWithError,
}

impl fmt::Display for EndRoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_are_ordered_by_progress() {
        let mut phase = Phase::InputRegistration;
        while let Some(next) = phase.next() {
            assert!(next > phase);
            phase = next;
        }
        assert_eq!(phase, Phase::Ended);
    }
}
