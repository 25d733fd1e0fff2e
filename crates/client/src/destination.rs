//! Where mixed coins go.

use bitcoin::ScriptBuf;

/// Source of fresh output scripts.
///
/// Implemented by the wallet; every returned script must be unused and is handed to the
/// coordinator at most once.
pub trait DestinationProvider: Send + Sync {
    /// Returns `count` fresh scripts.
    fn next_destinations(&self, count: usize) -> Vec<ScriptBuf>;
}
