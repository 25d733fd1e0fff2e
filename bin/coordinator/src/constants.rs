use std::time::Duration;

pub(crate) const DEFAULT_THREAD_COUNT: u8 = 4;

pub(crate) const DEFAULT_THREAD_STACK_SIZE: usize = 8 * 1024 * 1024;

/// Upper bound on a single call to the Bitcoin node.
pub(crate) const DEFAULT_NODE_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
