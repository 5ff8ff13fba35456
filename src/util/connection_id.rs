//! Connection identifiers for log correlation.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for short connection IDs.
static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Identifier attached to every accepted connection.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a process-local ID from a counter: `conn-{counter:016x}`.
    pub fn generate() -> Self {
        let count = CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn-{:016x}", count))
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
