use std::ops::RangeInclusive;

use bitcoin::{Amount, FeeRate};

/// Rules every input and output of a coinjoin must follow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartyTransactionParameters {
    /// Fee rate the transaction pays.
    pub fee_rate: FeeRate,

    /// Accepted input values.
    pub allowed_input_amounts: RangeInclusive<Amount>,

    /// Accepted output values.
    pub allowed_output_amounts: RangeInclusive<Amount>,

    /// Upper bound on the virtual size of the final transaction.
    pub max_transaction_vsize: u64,
}
