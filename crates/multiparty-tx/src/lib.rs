//! The multiparty transaction a coinjoin round builds.
//!
//! The transaction goes through two states. In [`ConstructionState`] inputs and outputs are added,
//! each addition returning a new state and leaving the old one untouched, so that callers can
//! validate speculatively and commit later. [`ConstructionState::finalize`] fixes the transaction
//! and produces a [`SigningState`] that collects one witness per input.

mod construction;
mod errors;
mod parameters;
mod signing;
mod state;

pub use construction::ConstructionState;
pub use errors::{CoinjoinStateError, ConstructionError, SigningError};
pub use parameters::MultipartyTransactionParameters;
pub use signing::SigningState;
pub use state::CoinjoinState;
