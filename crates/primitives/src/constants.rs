//! Protocol constants.

/// Virtual size of a P2WPKH input, in vbytes.
pub const P2WPKH_INPUT_VSIZE: u64 = 68;

/// Virtual size of a P2TR key-path input, in vbytes.
pub const P2TR_INPUT_VSIZE: u64 = 58;

/// Virtual size of the parts of a segwit transaction not attributable to any input or output
/// (version, locktime, counts, segwit marker and flag), rounded up.
pub const SHARED_OVERHEAD_VSIZE: u64 = 15;

/// Upper bound on the vsize credential a single participant can hold.
pub const MAX_VSIZE_CREDENTIAL_VALUE: u64 = 255;

/// Number of confirmations a coinbase output needs before it can be spent.
pub const COINBASE_MATURITY: u32 = 100;

/// Default string binding ownership proofs to a coordinator.
pub const DEFAULT_COORDINATOR_IDENTIFIER: &str = "CoinJoinCoordinatorIdentifier";
