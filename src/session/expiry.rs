//! Deadline bookkeeping for idle keys.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

/// Marks keys for later extraction once their time-to-live has elapsed.
///
/// Nothing fires on its own: the owner pulls expired keys with
/// [`ExpiryManager::extract_expired`] on its own schedule. Uses the tokio
/// clock so paused-time tests can drive it.
#[derive(Debug)]
pub struct ExpiryManager<K> {
    deadlines: HashMap<K, Instant>,
}

impl<K: Hash + Eq + Clone> ExpiryManager<K> {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self {
            deadlines: HashMap::new(),
        }
    }

    /// Mark `key` to expire `ttl` from now, replacing any earlier mark.
    pub fn expire(&mut self, key: K, ttl: Duration) {
        self.deadlines.insert(key, Instant::now() + ttl);
    }

    /// Unmark `key`; it is active again.
    pub fn unexpire(&mut self, key: &K) -> bool {
        self.deadlines.remove(key).is_some()
    }

    /// Whether `key` is waiting to expire.
    pub fn is_pending(&self, key: &K) -> bool {
        self.deadlines.contains_key(key)
    }

    /// Remove and return every key whose deadline has passed.
    pub fn extract_expired(&mut self) -> Vec<K> {
        let now = Instant::now();
        let mut expired = Vec::new();
        self.deadlines.retain(|key, deadline| {
            if *deadline <= now {
                expired.push(key.clone());
                false
            } else {
                true
            }
        });
        expired
    }

    /// Number of keys waiting to expire.
    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    /// Whether no keys are waiting.
    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

impl<K: Hash + Eq + Clone> Default for ExpiryManager<K> {
    fn default() -> Self {
        Self::new()
    }
}
