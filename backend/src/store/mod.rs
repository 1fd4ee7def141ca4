//! Slot and account storage
//!
//! The tree store is the only shared mutable resource of the engine. Every
//! mutation goes through [`TreeStore::insert_batch`], which behaves as one
//! atomic compare-and-swap over all `(parent, position)` claims of the batch.
//!
//! # Critical Invariants
//!
//! 1. **Append-only**: slots are never deleted or moved
//! 2. **One occupant**: each `(parent, position)` pair and the root are
//!    claimed at most once; losers get `PositionOccupied`
//! 3. **No dangling links**: a parent's child pointer is written in the same
//!    atomic unit as the child record
//! 4. **Read-your-writes**: a committed slot is immediately visible to `get`
//!    and `children_of`
//! 5. **Atomic purchase**: [`PurchaseStore::commit_purchase`] writes the slots
//!    and the owner's account update together or not at all
//!
//! Stores keep the spillover index (slots with a free child, per side) and
//! per-owner side counts up to date on every commit, so planning reads only
//! the leading open parents instead of the whole tree.
//!
//! Two backends are provided: [`MemoryStore`] (arena tree + `DashMap`
//! accounts) and the durable [`SledStore`].

pub mod memory;
pub mod persistent;

use crate::models::{Account, AccountError, Children, NewSlot, Position, Slot, SlotId};
use crate::placement::resolver::PositionCounts;
use thiserror::Error;

pub use memory::{MemoryAccountStore, MemoryStore, MemoryTreeStore};
pub use persistent::SledStore;

/// Errors raised by slot and account stores
#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("Slot {0} not found")]
    NotFound(SlotId),

    #[error("Parent slot {0} does not exist")]
    UnknownParent(SlotId),

    #[error("Position {} under {} is already occupied", describe_position(.position), describe_parent(.parent))]
    PositionOccupied {
        parent: Option<SlotId>,
        position: Option<Position>,
    },

    #[error("Slot {id} has level {actual}, expected {expected}")]
    LevelMismatch { id: SlotId, expected: u32, actual: u32 },

    #[error("Slot {0} already exists")]
    DuplicateId(SlotId),

    #[error("Slot {id} is malformed: {reason}")]
    Malformed { id: SlotId, reason: String },

    #[error("Account error: {0}")]
    Account(#[from] AccountError),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

fn describe_position(position: &Option<Position>) -> &'static str {
    position.map(|p| p.as_str()).unwrap_or("root")
}

fn describe_parent(parent: &Option<SlotId>) -> String {
    parent
        .map(|p| p.to_string())
        .unwrap_or_else(|| "matrix".to_string())
}

impl StoreError {
    /// Race-induced failure that a fresh attempt may resolve
    pub fn is_occupied(&self) -> bool {
        matches!(self, StoreError::PositionOccupied { .. })
    }

    pub(crate) fn occupied(slot: &NewSlot) -> Self {
        StoreError::PositionOccupied {
            parent: slot.parent,
            position: slot.position,
        }
    }
}

impl From<sled::Error> for StoreError {
    fn from(e: sled::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Committed state a purchase is planned against
///
/// `open_left`/`open_right` hold the first `limit` slots with a free child on
/// that side, in spillover order `(level, seq)`. A purchase of `n` units
/// fills at most `n` of them per side, so `limit = n` is always enough.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanningSnapshot {
    /// Planning owner's slots counted by side
    pub owner_counts: PositionCounts,
    pub open_left: Vec<Slot>,
    pub open_right: Vec<Slot>,
    /// Sequence the next committed slot will receive
    pub next_seq: u64,
}

/// Durable storage of slots keyed by id
pub trait TreeStore: Send + Sync {
    /// Insert one slot
    ///
    /// Fails with `PositionOccupied` if the claim is taken and with
    /// `UnknownParent` if the parent does not exist.
    fn insert(&self, slot: NewSlot) -> Result<Slot, StoreError> {
        let mut inserted = self.insert_batch(vec![slot])?;
        inserted
            .pop()
            .ok_or_else(|| StoreError::Backend("empty insert result".to_string()))
    }

    /// Insert several slots atomically, in order
    ///
    /// Later entries may name earlier entries of the same batch as parent.
    /// Either every slot is committed or none is.
    fn insert_batch(&self, slots: Vec<NewSlot>) -> Result<Vec<Slot>, StoreError>;

    fn get(&self, id: SlotId) -> Result<Slot, StoreError>;

    fn children_of(&self, id: SlotId) -> Result<Children, StoreError> {
        self.get(id).map(|slot| *slot.children())
    }

    /// Slots owned by `owner` in insertion order
    fn slots_of(&self, owner: &str) -> Result<Vec<Slot>, StoreError>;

    /// Every slot in insertion order
    fn all_slots(&self) -> Result<Vec<Slot>, StoreError>;

    fn len(&self) -> Result<usize, StoreError>;

    fn is_empty(&self) -> Result<bool, StoreError> {
        self.len().map(|n| n == 0)
    }

    /// Owner counts and leading open parents, read from the maintained index
    fn planning_snapshot(&self, owner: &str, limit: usize)
        -> Result<PlanningSnapshot, StoreError>;
}

/// Per-owner aggregate storage
pub trait AccountStore: Send + Sync {
    fn account(&self, owner: &str) -> Result<Option<Account>, StoreError>;

    /// Append slot ids and add token credit to `owner` in one atomic update,
    /// creating the account on first purchase. Returns the updated account.
    fn record_purchase(
        &self,
        owner: &str,
        slot_ids: &[SlotId],
        token_credit: f64,
    ) -> Result<Account, StoreError>;

    /// Every account, ordered by identity
    fn accounts(&self) -> Result<Vec<Account>, StoreError>;
}

/// Store that commits a whole purchase as one unit
pub trait PurchaseStore: TreeStore + AccountStore {
    /// Insert `slots` and append their ids plus `token_credit` to `owner`'s
    /// account atomically
    ///
    /// Fails without writing anything when a claim is taken, a parent is
    /// unknown or the account update is rejected. Purchases by one owner
    /// commit one at a time, so the account lists slots in commit order.
    fn commit_purchase(
        &self,
        owner: &str,
        slots: Vec<NewSlot>,
        token_credit: f64,
    ) -> Result<(Vec<Slot>, Account), StoreError>;
}

/// Validate a batch against already committed slots
///
/// `lookup` resolves committed parents as `(level, children)`. Shared by both
/// backends so they reject exactly the same inputs.
pub(crate) fn check_batch<F>(
    slots: &[NewSlot],
    root_taken: bool,
    contains: impl Fn(&SlotId) -> bool,
    mut lookup: F,
) -> Result<(), StoreError>
where
    F: FnMut(&SlotId) -> Option<(u32, Children)>,
{
    use std::collections::{HashMap, HashSet};

    let mut pending_levels: HashMap<SlotId, u32> = HashMap::new();
    let mut pending_claims: HashSet<(SlotId, Position)> = HashSet::new();
    let mut root_claimed = root_taken;

    for slot in slots {
        if contains(&slot.id) || pending_levels.contains_key(&slot.id) {
            return Err(StoreError::DuplicateId(slot.id));
        }

        match (slot.parent, slot.position) {
            (None, Some(_)) => {
                return Err(StoreError::Malformed {
                    id: slot.id,
                    reason: "root slot cannot have a position".to_string(),
                });
            }
            (None, None) => {
                if slot.level != 1 {
                    return Err(StoreError::LevelMismatch {
                        id: slot.id,
                        expected: 1,
                        actual: slot.level,
                    });
                }
                if root_claimed {
                    return Err(StoreError::occupied(slot));
                }
                root_claimed = true;
            }
            (Some(parent), position) => {
                let position = position.ok_or_else(|| StoreError::Malformed {
                    id: slot.id,
                    reason: "child slot needs a position".to_string(),
                })?;

                let (parent_level, occupied) = match pending_levels.get(&parent) {
                    Some(level) => (*level, false),
                    None => match lookup(&parent) {
                        Some((level, children)) => (level, !children.is_free(position)),
                        None => return Err(StoreError::UnknownParent(parent)),
                    },
                };

                if occupied || !pending_claims.insert((parent, position)) {
                    return Err(StoreError::occupied(slot));
                }
                if slot.level != parent_level + 1 {
                    return Err(StoreError::LevelMismatch {
                        id: slot.id,
                        expected: parent_level + 1,
                        actual: slot.level,
                    });
                }
            }
        }

        pending_levels.insert(slot.id, slot.level);
    }

    Ok(())
}
