//! Snapshot view of the matrix used for planning
//!
//! A [`TreeView`] is built either from every committed slot or, on the hot
//! path, from a store's [`PlanningSnapshot`] (owner counts plus the leading
//! open parents). It is then extended in place with the slots a transaction
//! plans to insert. Planned
//! slots are visible to the resolver and locator exactly like committed ones,
//! so units of one purchase stack on each other deterministically.

use crate::models::{NewSlot, Slot, SlotId};
use crate::placement::locator::SpilloverIndex;
use crate::placement::resolver::PositionCounts;
use crate::store::PlanningSnapshot;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct TreeView {
    /// Slots in insertion order
    slots: Vec<Slot>,
    index: HashMap<SlotId, usize>,
    spillover: SpilloverIndex,
    owner_counts: HashMap<String, PositionCounts>,
    next_seq: u64,
}

impl TreeView {
    /// Build a view from committed slots (any order)
    pub fn from_slots(mut slots: Vec<Slot>) -> Self {
        slots.sort_by_key(|s| s.seq());

        let mut view = TreeView {
            next_seq: slots.last().map(|s| s.seq() + 1).unwrap_or(0),
            ..Default::default()
        };
        for slot in slots {
            view.push(slot);
        }
        view
    }

    /// Build a planning view for `owner` from the store's maintained index
    ///
    /// Only `owner`'s counts are known; `counts_for` any other owner reports
    /// nothing but what this view plans.
    pub fn from_snapshot(owner: &str, snapshot: PlanningSnapshot) -> Self {
        let PlanningSnapshot {
            owner_counts,
            open_left,
            open_right,
            next_seq,
        } = snapshot;

        let mut open: Vec<Slot> = open_left.into_iter().chain(open_right).collect();
        open.sort_by_key(|s| s.seq());
        open.dedup_by_key(|s| s.id());

        let mut view = TreeView {
            next_seq: open.last().map(|s| s.seq() + 1).unwrap_or(0).max(next_seq),
            ..Default::default()
        };
        view.owner_counts.insert(owner.to_string(), owner_counts);
        for slot in open {
            view.track(slot);
        }
        view
    }

    fn push(&mut self, slot: Slot) {
        self.owner_counts
            .entry(slot.owner().to_string())
            .or_default()
            .record(slot.position());
        self.track(slot);
    }

    /// Index a slot without counting it for its owner
    fn track(&mut self, slot: Slot) {
        self.spillover.track(&slot);
        self.index.insert(slot.id(), self.slots.len());
        self.slots.push(slot);
    }

    /// Add a planned slot, linking it under its parent
    ///
    /// The slot receives the next provisional sequence number. The caller is
    /// responsible for having chosen a free position.
    pub fn apply(&mut self, new_slot: NewSlot) -> &Slot {
        let claim = new_slot.claim();
        let slot = new_slot.into_slot(self.next_seq);
        self.next_seq += 1;

        if let Some((parent, position)) = claim {
            if let Some(&i) = self.index.get(&parent) {
                let key = (self.slots[i].level(), self.slots[i].seq());
                self.slots[i].link_child(position, slot.id());
                self.spillover.fill(key, position);
            }
        }

        let at = self.slots.len();
        self.push(slot);
        &self.slots[at]
    }

    pub fn get(&self, id: &SlotId) -> Option<&Slot> {
        self.index.get(id).map(|&i| &self.slots[i])
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Owner's slots counted by position, planned slots included
    pub fn counts_for(&self, owner: &str) -> PositionCounts {
        self.owner_counts.get(owner).copied().unwrap_or_default()
    }

    pub fn spillover(&self) -> &SpilloverIndex {
        &self.spillover
    }

    /// Slots of one level in breadth-first order (insertion order within the level)
    pub fn level(&self, level: u32) -> Vec<&Slot> {
        self.slots.iter().filter(|s| s.level() == level).collect()
    }

    pub fn depth(&self) -> u32 {
        self.slots.iter().map(|s| s.level()).max().unwrap_or(0)
    }
}
