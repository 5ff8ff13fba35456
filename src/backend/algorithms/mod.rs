//! Target selection algorithms.

mod hash;
mod random;

pub use hash::{StickyHash, sticky_hash};
pub use random::Random;

/// Trait for target selection algorithms.
///
/// A selector maps a client key onto an index in `[0, len)`. The pool
/// applies it twice: once over the full target list (primary) and once
/// over the active subset (secondary).
pub trait Selector: Send + Sync {
    /// Pick an index for `key` among `len` candidates.
    ///
    /// Returns `None` if `len` is zero.
    fn index(&self, key: &str, len: usize) -> Option<usize>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

/// Selection policy derived from the `stickiness` option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Hash the client key so a client keeps its target.
    Sticky,
    /// Draw a fresh random index on every call.
    Random,
}

impl Selection {
    /// Map the `stickiness` flag onto a policy.
    pub fn from_stickiness(sticky: bool) -> Self {
        if sticky {
            Selection::Sticky
        } else {
            Selection::Random
        }
    }

    /// Whether clients keep their assigned target across connections.
    pub fn is_sticky(self) -> bool {
        self == Selection::Sticky
    }

    /// Build the selector for this policy.
    pub fn selector(self) -> Box<dyn Selector> {
        match self {
            Selection::Sticky => Box::new(StickyHash::new()),
            Selection::Random => Box::new(Random::new()),
        }
    }
}
