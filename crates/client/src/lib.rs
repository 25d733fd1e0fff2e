//! The participant side of a WabiSabi coinjoin.
//!
//! A [`CoinJoinClient`](coinjoin::CoinJoinClient) drives a set of coins through one round:
//! it registers them, keeps their connections confirmed, decomposes the resulting credentials
//! into outputs, and signs the final transaction. Round progress is observed through a
//! [`RoundStateUpdater`](round_state_updater::RoundStateUpdater) polling the coordinator.

pub mod alice_client;
pub mod arena_client;
pub mod bob_client;
pub mod coinjoin;
pub mod decomposition;
pub mod destination;
pub mod errors;
pub mod round_state_updater;

pub use alice_client::{AliceClient, SigningCoin};
pub use arena_client::ArenaClient;
pub use coinjoin::{CoinJoinClient, CoinJoinResult};
pub use destination::DestinationProvider;
pub use errors::{CoinJoinClientError, RoundStateAwaiterError};
pub use round_state_updater::RoundStateUpdater;
