//! Placement resolver
//!
//! Picks a side for a new slot when the buyer gave no explicit position.
//! The rule balances the owner's own slots: `Left` while the owner has no
//! more left slots than right slots, `Right` otherwise. Ties favour `Left`.
//!
//! This balances an owner's sub-tree growth only; global balance comes from
//! the spillover order of the parent locator.

use crate::models::Position;
use serde::{Deserialize, Serialize};

/// Owner's slots counted by position
///
/// Root slots have no position and count for neither side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionCounts {
    pub left: usize,
    pub right: usize,
}

impl PositionCounts {
    pub fn record(&mut self, position: Option<Position>) {
        match position {
            Some(Position::Left) => self.left += 1,
            Some(Position::Right) => self.right += 1,
            None => {}
        }
    }

    pub fn total(&self) -> usize {
        self.left + self.right
    }
}

impl FromIterator<Option<Position>> for PositionCounts {
    fn from_iter<I: IntoIterator<Item = Option<Position>>>(iter: I) -> Self {
        let mut counts = PositionCounts::default();
        for position in iter {
            counts.record(position);
        }
        counts
    }
}

/// Choose the side for the owner's next slot
///
/// # Example
/// ```
/// use matrix_placement_core::models::Position;
/// use matrix_placement_core::placement::resolver::{resolve, PositionCounts};
///
/// assert_eq!(resolve(PositionCounts::default()), Position::Left);
/// assert_eq!(resolve(PositionCounts { left: 1, right: 0 }), Position::Right);
/// assert_eq!(resolve(PositionCounts { left: 1, right: 1 }), Position::Left);
/// ```
pub fn resolve(counts: PositionCounts) -> Position {
    if counts.left <= counts.right {
        Position::Left
    } else {
        Position::Right
    }
}
