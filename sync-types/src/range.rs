//! Index windows over a room list.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An inclusive, zero-based index interval `[start, end]` into a room list.
///
/// Serialized as a two-element JSON array, matching the protocol's
/// `[[0, 19], [40, 59]]` range notation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListRange(pub usize, pub usize);

impl ListRange {
    /// Create a range covering `start..=end`.
    pub fn new(start: usize, end: usize) -> Self {
        Self(start, end)
    }

    /// First index covered by this range.
    pub fn start(&self) -> usize {
        self.0
    }

    /// Last index covered by this range (inclusive).
    pub fn end(&self) -> usize {
        self.1
    }

    /// Whether `start <= end`.
    pub fn is_valid(&self) -> bool {
        self.0 <= self.1
    }

    /// Number of positions covered. Zero for an inverted range.
    pub fn len(&self) -> usize {
        if self.is_valid() {
            (self.1 - self.0).saturating_add(1)
        } else {
            0
        }
    }

    /// Whether the range covers no positions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `index` falls inside the range.
    pub fn contains(&self, index: usize) -> bool {
        self.0 <= index && index <= self.1
    }
}

impl fmt::Debug for ListRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.0, self.1)
    }
}
