//! The WabiSabi coinjoin coordinator.
//!
//! [`Arena`](arena::Arena) owns every round and serializes access to them. It answers participant
//! requests concurrently and advances rounds through their phases on a periodic tick. The
//! per-round rules live in [`Round`](round::Round), which holds no locks and is only ever mutated
//! by the arena.

pub mod alice;
pub mod arena;
pub mod bob;
pub mod config;
pub mod errors;
pub mod prison;
pub mod round;

pub use arena::Arena;
pub use config::WabiSabiConfig;
