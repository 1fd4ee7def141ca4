//! Snapshot - Export, Audit and Restore Store State
//!
//! Captures every slot and account so a matrix can be audited offline or
//! restored into a [`MemoryStore`].
//!
//! # Critical Invariants (checked by [`validate_snapshot`])
//!
//! - **Unique ids**: every slot id appears once
//! - **Causal order**: a parent exists and was inserted before its child
//! - **Levels**: root level is 1, child level is parent level + 1
//! - **One occupant**: at most one child per `(parent, position)`, one root
//! - **Account integrity**: account slot ids exist, belong to that owner and
//!   are listed once, in commit order (ascending `seq`)

use crate::config::{canonical_hash, ConfigError, PlacementConfig};
use crate::models::{Account, Position, Slot, SlotId};
use crate::store::{
    AccountStore, MemoryAccountStore, MemoryStore, MemoryTreeStore, StoreError, TreeStore,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum SnapshotError {
    #[error("Snapshot validation failed: {0}")]
    Invalid(String),

    #[error("Snapshot content hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("Snapshot was taken with a different config (hash {snapshot}, current {current})")]
    ConfigMismatch { snapshot: String, current: String },

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Complete store state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// Slots in insertion order
    pub slots: Vec<Slot>,

    /// Accounts ordered by identity
    pub accounts: Vec<Account>,

    /// SHA256 of the engine config the snapshot was taken with
    pub config_hash: String,

    /// SHA256 of `slots` and `accounts`
    pub content_hash: String,
}

#[derive(Serialize)]
struct Content<'a> {
    slots: &'a [Slot],
    accounts: &'a [Account],
}

impl StoreSnapshot {
    /// Capture slots and accounts of a store
    pub fn capture<S>(store: &S, config: &PlacementConfig) -> Result<Self, SnapshotError>
    where
        S: TreeStore + AccountStore + ?Sized,
    {
        let slots = store.all_slots()?;
        let accounts = store.accounts()?;
        let content_hash = canonical_hash(&Content {
            slots: &slots,
            accounts: &accounts,
        })?;

        Ok(Self {
            slots,
            accounts,
            config_hash: config.hash()?,
            content_hash,
        })
    }

    /// Recompute the content hash and compare
    pub fn verify_hash(&self) -> Result<(), SnapshotError> {
        let actual = canonical_hash(&Content {
            slots: &self.slots,
            accounts: &self.accounts,
        })?;
        if actual != self.content_hash {
            return Err(SnapshotError::HashMismatch {
                expected: self.content_hash.clone(),
                actual,
            });
        }
        Ok(())
    }

    /// Rebuild an in-memory store after hash, config and invariant checks
    pub fn restore(self, config: &PlacementConfig) -> Result<MemoryStore, SnapshotError> {
        self.verify_hash()?;

        let current = config.hash()?;
        if current != self.config_hash {
            return Err(SnapshotError::ConfigMismatch {
                snapshot: self.config_hash,
                current,
            });
        }

        validate_snapshot(&self.slots, &self.accounts)?;

        let tree = MemoryTreeStore::from_slots(self.slots)?;
        let accounts = MemoryAccountStore::from_accounts(self.accounts);
        Ok(MemoryStore::from_parts(tree, accounts))
    }
}

/// Check the structural invariants of a slot listing and its accounts
pub fn validate_snapshot(slots: &[Slot], accounts: &[Account]) -> Result<(), SnapshotError> {
    let invalid = |msg: String| Err(SnapshotError::Invalid(msg));

    // 1. Unique ids, seq order
    let mut by_id: HashMap<SlotId, &Slot> = HashMap::with_capacity(slots.len());
    for slot in slots {
        if by_id.insert(slot.id(), slot).is_some() {
            return invalid(format!("duplicate slot id {}", slot.id()));
        }
    }

    // 2. Parent links, causal order, levels, single occupancy
    let mut claims: HashSet<(SlotId, Position)> = HashSet::new();
    let mut root: Option<SlotId> = None;
    for slot in slots {
        match (slot.parent(), slot.position()) {
            (None, None) => {
                if slot.level() != 1 {
                    return invalid(format!("root {} has level {}", slot.id(), slot.level()));
                }
                if let Some(existing) = root.replace(slot.id()) {
                    return invalid(format!("two roots: {} and {}", existing, slot.id()));
                }
            }
            (Some(parent_id), Some(position)) => {
                let parent = match by_id.get(&parent_id) {
                    Some(p) => p,
                    None => {
                        return invalid(format!("slot {} has unknown parent {}", slot.id(), parent_id))
                    }
                };
                if parent.seq() >= slot.seq() {
                    return invalid(format!(
                        "slot {} (seq {}) precedes its parent {} (seq {})",
                        slot.id(),
                        slot.seq(),
                        parent_id,
                        parent.seq()
                    ));
                }
                if slot.level() != parent.level() + 1 {
                    return invalid(format!(
                        "slot {} has level {}, parent has level {}",
                        slot.id(),
                        slot.level(),
                        parent.level()
                    ));
                }
                if !claims.insert((parent_id, position)) {
                    return invalid(format!("{} child of {} occupied twice", position, parent_id));
                }
                if parent.children().get(position) != Some(slot.id()) {
                    return invalid(format!(
                        "parent {} does not link {} child {}",
                        parent_id,
                        position,
                        slot.id()
                    ));
                }
            }
            _ => return invalid(format!("slot {} has a parent/position mismatch", slot.id())),
        }
    }

    // 3. No child pointer without a child record
    for slot in slots {
        for position in [Position::Left, Position::Right] {
            if let Some(child) = slot.children().get(position) {
                if !by_id.contains_key(&child) {
                    return invalid(format!("dangling {} link {} -> {}", position, slot.id(), child));
                }
            }
        }
    }

    // 4. Accounts
    for account in accounts {
        let mut last_seq: Option<u64> = None;
        for id in account.slots() {
            let slot = match by_id.get(id) {
                Some(s) => s,
                None => {
                    return invalid(format!(
                        "account {} lists unknown slot {}",
                        account.identity(),
                        id
                    ))
                }
            };
            if slot.owner() != account.identity() {
                return invalid(format!(
                    "account {} lists slot {} owned by {}",
                    account.identity(),
                    id,
                    slot.owner()
                ));
            }
            if last_seq.is_some_and(|last| slot.seq() <= last) {
                return invalid(format!(
                    "account {} lists slot {} twice or out of commit order",
                    account.identity(),
                    id
                ));
            }
            last_seq = Some(slot.seq());
        }
        if !account.token_balance().is_finite() || account.token_balance() < 0.0 {
            return invalid(format!(
                "account {} has invalid token balance {}",
                account.identity(),
                account.token_balance()
            ));
        }
    }

    Ok(())
}
