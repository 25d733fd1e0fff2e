//! Registered inputs.

use std::time::Duration;

use bitcoin::{Amount, FeeRate};
use tokio::time::Instant;
use wabisabi_primitives::{coin::Coin, ids::AliceId, ownership::OwnershipProof};

/// One registered input of a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alice {
    /// Identifier handed to the participant.
    pub id: AliceId,

    /// The registered coin.
    pub coin: Coin,

    /// The proof presented at registration.
    pub ownership_proof: OwnershipProof,

    /// During input registration, the Alice is dropped if this passes without a confirmation.
    pub deadline: Instant,

    /// Whether real credentials were issued and the coin joined the transaction.
    pub confirmed_connection: bool,

    /// Whether the participant finished registering outputs.
    pub ready_to_sign: bool,
}

impl Alice {
    /// Creates an unconfirmed Alice expiring `timeout` after `now`.
    pub fn new(
        id: AliceId,
        coin: Coin,
        ownership_proof: OwnershipProof,
        now: Instant,
        timeout: Duration,
    ) -> Self {
        Self {
            id,
            coin,
            ownership_proof,
            deadline: now + timeout,
            confirmed_connection: false,
            ready_to_sign: false,
        }
    }

    /// Pushes the deadline to `timeout` after `now`.
    pub fn set_deadline_relative_to(&mut self, now: Instant, timeout: Duration) {
        self.deadline = now + timeout;
    }

    /// Whether the deadline has passed.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// Amount credential the coin is worth: its value minus the fee for spending it.
    pub fn amount_entitlement(&self, fee_rate: FeeRate) -> Option<Amount> {
        self.coin.effective_value(fee_rate)
    }

    /// Vsize credential left once the input's own size is paid for.
    pub fn vsize_entitlement(&self, max_vsize_allocation: u64) -> Option<u64> {
        max_vsize_allocation.checked_sub(self.coin.input_vsize()?)
    }
}
