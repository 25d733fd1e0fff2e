//! The subset of a Bitcoin node's RPC interface the coordinator relies on.

use async_trait::async_trait;
use bitcoin::{FeeRate, OutPoint, Transaction, TxOut, Txid};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An unspent output as reported by the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutInfo {
    /// Value and script.
    pub txout: TxOut,

    /// Confirmations of the creating transaction, zero while in the mempool.
    pub confirmations: u32,

    /// Whether the output was created by a coinbase transaction.
    pub is_coinbase: bool,
}

/// Failures talking to the node.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum NodeRpcError {
    /// The node could not be reached.
    #[error("node unreachable: {0}")]
    Connection(String),

    /// The node answered with an error.
    #[error("node returned error {code}: {message}")]
    Rpc {
        /// RPC error code.
        code: i32,
        /// RPC error message.
        message: String,
    },

    /// The node answered with something unexpected.
    #[error("unexpected node response: {0}")]
    Malformed(String),

    /// The node has no fee estimate for the requested target.
    #[error("no fee estimate available")]
    NoFeeEstimate,
}

/// Bitcoin node calls used by the coordinator.
///
/// Every call may be slow or fail. Failures are propagated to the caller, never replaced with a
/// default.
#[async_trait]
pub trait BitcoinRpc: Send + Sync {
    /// Looks up an unspent output, `None` if it is spent or unknown.
    async fn get_tx_out(
        &self,
        outpoint: OutPoint,
        include_mempool: bool,
    ) -> Result<Option<TxOutInfo>, NodeRpcError>;

    /// Estimates the fee rate needed to confirm within `conf_target` blocks.
    async fn estimate_smart_fee(&self, conf_target: u16) -> Result<FeeRate, NodeRpcError>;

    /// Submits a transaction to the node's mempool.
    async fn send_raw_transaction(&self, tx: &Transaction) -> Result<Txid, NodeRpcError>;
}
