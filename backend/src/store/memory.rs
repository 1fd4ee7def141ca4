//! In-memory stores
//!
//! [`MemoryTreeStore`] keeps slots in an arena (`Vec<Slot>` in insertion
//! order plus an id index) behind a single `RwLock`. The write lock is the
//! serialization point that makes a batch an atomic compare-and-swap. The
//! arena also maintains the spillover index and per-owner side counts, so
//! planning never scans the arena.
//!
//! [`MemoryAccountStore`] keeps accounts in a `DashMap`, so balance updates
//! lock one owner's shard and never touch the tree lock.
//!
//! [`MemoryStore`] pairs the two and commits purchases atomically.

use crate::models::{Account, NewSlot, Position, Slot, SlotId};
use crate::placement::locator::SpilloverIndex;
use crate::placement::resolver::PositionCounts;
use crate::store::{
    check_batch, AccountStore, PlanningSnapshot, PurchaseStore, StoreError, TreeStore,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Default)]
struct Arena {
    /// All slots, index = insertion sequence
    slots: Vec<Slot>,
    index: HashMap<SlotId, usize>,
    by_owner: HashMap<String, Vec<usize>>,
    owner_counts: HashMap<String, PositionCounts>,
    open: SpilloverIndex,
    root: Option<SlotId>,
}

impl Arena {
    fn push(&mut self, new_slot: NewSlot) -> Slot {
        let seq = self.slots.len();
        let slot = new_slot.into_slot(seq as u64);

        match slot.parent().zip(slot.position()) {
            Some((parent, position)) => {
                // Parent is validated by check_batch before anything is pushed
                if let Some(&parent_idx) = self.index.get(&parent) {
                    let parent_slot = &mut self.slots[parent_idx];
                    parent_slot.link_child(position, slot.id());
                    self.open
                        .fill((parent_slot.level(), parent_slot.seq()), position);
                }
            }
            None => self.root = Some(slot.id()),
        }

        self.open.track(&slot);
        self.owner_counts
            .entry(slot.owner().to_string())
            .or_default()
            .record(slot.position());
        self.index.insert(slot.id(), seq);
        self.by_owner
            .entry(slot.owner().to_string())
            .or_default()
            .push(seq);
        self.slots.push(slot.clone());
        slot
    }

    fn open_slots(&self, position: Position, limit: usize) -> Vec<Slot> {
        self.open
            .leading(position, limit)
            .iter()
            .filter_map(|id| self.index.get(id).map(|&i| self.slots[i].clone()))
            .collect()
    }
}

/// Arena-backed tree store
///
/// # Example
/// ```
/// use matrix_placement_core::models::NewSlot;
/// use matrix_placement_core::store::{MemoryTreeStore, TreeStore};
/// use uuid::Uuid;
///
/// let store = MemoryTreeStore::new();
/// let root = store.insert(NewSlot::root("0xabc", Uuid::new_v4())).unwrap();
/// assert_eq!(store.get(root.id()).unwrap().level(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MemoryTreeStore {
    arena: RwLock<Arena>,
}

impl MemoryTreeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from slots listed in insertion order
    ///
    /// Every slot goes through the same admission checks as a live insert,
    /// so an inconsistent listing is rejected.
    pub fn from_slots(slots: Vec<Slot>) -> Result<Self, StoreError> {
        let mut ordered = slots;
        ordered.sort_by_key(|s| s.seq());

        let batch: Vec<NewSlot> = ordered
            .into_iter()
            .map(|s| NewSlot {
                id: s.id(),
                owner: s.owner().to_string(),
                position: s.position(),
                parent: s.parent(),
                level: s.level(),
                placement_id: s.placement_id(),
                created_at: s.created_at(),
            })
            .collect();

        let store = Self::new();
        store.insert_batch(batch)?;
        Ok(store)
    }

    pub fn root(&self) -> Option<SlotId> {
        self.arena.read().root
    }
}

impl TreeStore for MemoryTreeStore {
    fn insert_batch(&self, slots: Vec<NewSlot>) -> Result<Vec<Slot>, StoreError> {
        let mut arena = self.arena.write();

        check_batch(
            &slots,
            arena.root.is_some(),
            |id| arena.index.contains_key(id),
            |id| {
                arena
                    .index
                    .get(id)
                    .map(|&i| (arena.slots[i].level(), *arena.slots[i].children()))
            },
        )?;

        let seqs: Vec<usize> = slots
            .into_iter()
            .map(|s| arena.push(s).seq() as usize)
            .collect();

        // Re-read so earlier entries carry links made by later ones
        Ok(seqs.into_iter().map(|i| arena.slots[i].clone()).collect())
    }

    fn get(&self, id: SlotId) -> Result<Slot, StoreError> {
        let arena = self.arena.read();
        arena
            .index
            .get(&id)
            .map(|&i| arena.slots[i].clone())
            .ok_or(StoreError::NotFound(id))
    }

    fn slots_of(&self, owner: &str) -> Result<Vec<Slot>, StoreError> {
        let arena = self.arena.read();
        Ok(arena
            .by_owner
            .get(owner)
            .map(|seqs| seqs.iter().map(|&i| arena.slots[i].clone()).collect())
            .unwrap_or_default())
    }

    fn all_slots(&self) -> Result<Vec<Slot>, StoreError> {
        Ok(self.arena.read().slots.clone())
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.arena.read().slots.len())
    }

    fn planning_snapshot(
        &self,
        owner: &str,
        limit: usize,
    ) -> Result<PlanningSnapshot, StoreError> {
        let arena = self.arena.read();
        Ok(PlanningSnapshot {
            owner_counts: arena.owner_counts.get(owner).copied().unwrap_or_default(),
            open_left: arena.open_slots(Position::Left, limit),
            open_right: arena.open_slots(Position::Right, limit),
            next_seq: arena.slots.len() as u64,
        })
    }
}

/// Account store with per-owner locking
#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    accounts: DashMap<String, Account>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_accounts(accounts: Vec<Account>) -> Self {
        let store = Self::new();
        for account in accounts {
            store
                .accounts
                .insert(account.identity().to_string(), account);
        }
        store
    }
}

impl AccountStore for MemoryAccountStore {
    fn account(&self, owner: &str) -> Result<Option<Account>, StoreError> {
        Ok(self.accounts.get(owner).map(|a| a.value().clone()))
    }

    fn record_purchase(
        &self,
        owner: &str,
        slot_ids: &[SlotId],
        token_credit: f64,
    ) -> Result<Account, StoreError> {
        let mut entry = self
            .accounts
            .entry(owner.to_string())
            .or_insert_with(|| Account::new(owner.to_string()));

        entry.apply_purchase(slot_ids, token_credit)?;
        Ok(entry.value().clone())
    }

    fn accounts(&self) -> Result<Vec<Account>, StoreError> {
        let mut all: Vec<Account> = self.accounts.iter().map(|a| a.value().clone()).collect();
        all.sort_by(|a, b| a.identity().cmp(b.identity()));
        Ok(all)
    }
}

/// Tree and accounts kept in memory, committed together per purchase
///
/// Lock order is always owner entry, then tree lock. The tree lock is never
/// held while an account is locked by another path, so the two cannot
/// deadlock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tree: MemoryTreeStore,
    accounts: MemoryAccountStore,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(tree: MemoryTreeStore, accounts: MemoryAccountStore) -> Self {
        Self { tree, accounts }
    }

    pub fn tree(&self) -> &MemoryTreeStore {
        &self.tree
    }

    pub fn accounts(&self) -> &MemoryAccountStore {
        &self.accounts
    }
}

impl TreeStore for MemoryStore {
    fn insert_batch(&self, slots: Vec<NewSlot>) -> Result<Vec<Slot>, StoreError> {
        self.tree.insert_batch(slots)
    }

    fn get(&self, id: SlotId) -> Result<Slot, StoreError> {
        self.tree.get(id)
    }

    fn slots_of(&self, owner: &str) -> Result<Vec<Slot>, StoreError> {
        self.tree.slots_of(owner)
    }

    fn all_slots(&self) -> Result<Vec<Slot>, StoreError> {
        self.tree.all_slots()
    }

    fn len(&self) -> Result<usize, StoreError> {
        self.tree.len()
    }

    fn planning_snapshot(
        &self,
        owner: &str,
        limit: usize,
    ) -> Result<PlanningSnapshot, StoreError> {
        self.tree.planning_snapshot(owner, limit)
    }
}

impl AccountStore for MemoryStore {
    fn account(&self, owner: &str) -> Result<Option<Account>, StoreError> {
        self.accounts.account(owner)
    }

    fn record_purchase(
        &self,
        owner: &str,
        slot_ids: &[SlotId],
        token_credit: f64,
    ) -> Result<Account, StoreError> {
        self.accounts.record_purchase(owner, slot_ids, token_credit)
    }

    fn accounts(&self) -> Result<Vec<Account>, StoreError> {
        self.accounts.accounts()
    }
}

impl PurchaseStore for MemoryStore {
    fn commit_purchase(
        &self,
        owner: &str,
        slots: Vec<NewSlot>,
        token_credit: f64,
    ) -> Result<(Vec<Slot>, Account), StoreError> {
        let ids: Vec<SlotId> = slots.iter().map(|s| s.id).collect();

        // The owner's entry stays locked across the tree commit
        let entry = self.accounts.accounts.entry(owner.to_string());
        let mut updated = match &entry {
            Entry::Occupied(e) => e.get().clone(),
            Entry::Vacant(_) => Account::new(owner.to_string()),
        };
        updated.apply_purchase(&ids, token_credit)?;

        let committed = self.tree.insert_batch(slots)?;
        entry.insert(updated.clone());
        Ok((committed, updated))
    }
}
