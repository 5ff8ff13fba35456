//! Sticky hash selection.

use super::Selector;

/// Hash-based selector.
///
/// Consistently routes the same client key to the same index for a
/// given candidate count.
#[derive(Debug, Default)]
pub struct StickyHash;

impl StickyHash {
    /// Create a new sticky hash selector.
    pub fn new() -> Self {
        Self
    }
}

impl Selector for StickyHash {
    fn index(&self, key: &str, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        Some(sticky_hash(key) as usize % len)
    }

    fn name(&self) -> &'static str {
        "hash"
    }
}

/// 32-bit polynomial rolling hash over the UTF-16 code units of `key`.
///
/// `h = h * 31 + c` with two's complement wraparound at every step; the
/// result is the magnitude of the final signed value.
pub fn sticky_hash(key: &str) -> u32 {
    let mut h: i32 = 0;
    for unit in key.encode_utf16() {
        h = h.wrapping_shl(5).wrapping_sub(h).wrapping_add(i32::from(unit));
    }
    h.unsigned_abs()
}
