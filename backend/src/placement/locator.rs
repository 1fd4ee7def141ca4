//! Parent locator (spillover)
//!
//! A new slot attaches under the shallowest slot whose child at the requested
//! position is still empty. Among slots on the same level the earliest
//! inserted wins. The tree therefore fills top-down and, within a level, in
//! insertion order before any deeper level is used.
//!
//! [`SpilloverIndex`] keeps, per position, the ordered set of slots that still
//! have that child free, keyed by `(level, seq)`. The first entry is the
//! answer, so lookup is `O(log n)` and depends only on the snapshot content.

use crate::models::{Position, Slot, SlotId};
use crate::placement::view::TreeView;
use std::collections::BTreeMap;

/// Ordering key of a candidate parent: shallowest level, then insertion order
pub type SpilloverKey = (u32, u64);

/// Candidate parents with a free child, one ordered map per position
#[derive(Debug, Clone, Default)]
pub struct SpilloverIndex {
    open_left: BTreeMap<SpilloverKey, SlotId>,
    open_right: BTreeMap<SpilloverKey, SlotId>,
}

impl SpilloverIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn side(&self, position: Position) -> &BTreeMap<SpilloverKey, SlotId> {
        match position {
            Position::Left => &self.open_left,
            Position::Right => &self.open_right,
        }
    }

    fn side_mut(&mut self, position: Position) -> &mut BTreeMap<SpilloverKey, SlotId> {
        match position {
            Position::Left => &mut self.open_left,
            Position::Right => &mut self.open_right,
        }
    }

    /// Register a slot, opening every child position it still has free
    pub fn track(&mut self, slot: &Slot) {
        let key = (slot.level(), slot.seq());
        for position in [Position::Left, Position::Right] {
            if slot.has_free(position) {
                self.side_mut(position).insert(key, slot.id());
            }
        }
    }

    /// Mark the child at `position` of the slot keyed `key` as taken
    pub fn fill(&mut self, key: SpilloverKey, position: Position) {
        self.side_mut(position).remove(&key);
    }

    /// First candidate parent for `position`
    pub fn first_open(&self, position: Position) -> Option<SlotId> {
        self.side(position).values().next().copied()
    }

    /// First `n` candidate parents for `position`, in spillover order
    pub fn leading(&self, position: Position, n: usize) -> Vec<SlotId> {
        self.side(position).values().take(n).copied().collect()
    }

    /// Number of slots with a free child at `position`
    pub fn open_count(&self, position: Position) -> usize {
        self.side(position).len()
    }
}

/// Find the parent the next slot at `position` attaches under
///
/// Returns `None` only for an empty tree, in which case the caller creates
/// the root. Repeated calls on the same view return the same slot.
pub fn find_available_parent(view: &TreeView, position: Position) -> Option<&Slot> {
    view.spillover()
        .first_open(position)
        .and_then(|id| view.get(&id))
}
