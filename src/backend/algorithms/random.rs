//! Random selection.

use super::Selector;
use rand::Rng;

/// Random selector.
///
/// Ignores the client key and draws a uniform index on every call, so
/// placement is re-rolled for each connection.
#[derive(Debug, Default)]
pub struct Random;

impl Random {
    /// Create a new random selector.
    pub fn new() -> Self {
        Self
    }
}

impl Selector for Random {
    fn index(&self, _key: &str, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        Some(rand::rng().random_range(0..len))
    }

    fn name(&self) -> &'static str {
        "random"
    }
}
