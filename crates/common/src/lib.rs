//! Crate includes reusable utils shared by the coordinator and the client.
//! Such as initializing the tracing framework and running background work on a fixed period.

pub mod logging;
pub mod periodic;

// Re-export tracing crate for convenience.
pub use tracing;
