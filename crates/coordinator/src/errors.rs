//! Errors raised by the coordinator outside of request handling.

use thiserror::Error;
use wabisabi_primitives::node::NodeRpcError;

/// Failures of the periodic round stepping.
#[derive(Debug, Clone, Error)]
pub enum ArenaError {
    /// The node could not provide a fee estimate for a new round.
    #[error("cannot create round: {0}")]
    FeeEstimation(#[source] NodeRpcError),

    /// The tick was cancelled.
    #[error("cancelled")]
    Cancelled,
}
