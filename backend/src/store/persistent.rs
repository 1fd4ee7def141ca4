//! Durable store on sled
//!
//! Layout (one sled tree per concern):
//! - `slots`: slot id → JSON slot record (children are not stored here)
//! - `claims`: `parent id ‖ 'L'|'R'` or `root` → child id; these keys are the
//!   parent's child pointers and the compare-and-swap targets
//! - `owners`: `owner ‖ 0x00 ‖ seq (BE)` → slot id, for ordered `slots_of`
//! - `meta`: `next_seq` counter
//! - `accounts`: owner → JSON account
//! - `open_left` / `open_right`: `level (BE) ‖ seq (BE)` → slot id for every
//!   slot whose child on that side is free; key order is spillover order
//! - `counts`: owner → left and right slot counts (two BE `u64`)
//!
//! Every commit is one sled transaction over all eight trees followed by a
//! flush. Child record, parent pointer, index entries and the owner's account
//! are therefore written in the same atomic unit.

use crate::models::{Account, Children, NewSlot, Position, Slot, SlotId};
use crate::placement::resolver::PositionCounts;
use crate::store::{
    check_batch, AccountStore, PlanningSnapshot, PurchaseStore, StoreError, TreeStore,
};
use sled::transaction::{
    ConflictableTransactionError, TransactionError, Transactional, TransactionalTree,
};
use sled::{Db, Tree};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info};

const SLOTS_TREE: &str = "slots";
const CLAIMS_TREE: &str = "claims";
const OWNERS_TREE: &str = "owners";
const META_TREE: &str = "meta";
const ACCOUNTS_TREE: &str = "accounts";
const OPEN_LEFT_TREE: &str = "open_left";
const OPEN_RIGHT_TREE: &str = "open_right";
const COUNTS_TREE: &str = "counts";

const ROOT_CLAIM: &[u8] = b"root";
const NEXT_SEQ_KEY: &[u8] = b"next_seq";

fn claim_key(parent: &SlotId, position: Position) -> [u8; 17] {
    let mut key = [0u8; 17];
    key[..16].copy_from_slice(parent.as_bytes());
    key[16] = position.as_byte();
    key
}

fn owner_prefix(owner: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(owner.len() + 1);
    key.extend_from_slice(owner.as_bytes());
    key.push(0);
    key
}

fn owner_key(owner: &str, seq: u64) -> Vec<u8> {
    let mut key = owner_prefix(owner);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

/// Big-endian so byte order equals `(level, seq)` order
fn open_key(level: u32, seq: u64) -> [u8; 12] {
    let mut key = [0u8; 12];
    key[..4].copy_from_slice(&level.to_be_bytes());
    key[4..].copy_from_slice(&seq.to_be_bytes());
    key
}

fn encode_counts(counts: &PositionCounts) -> [u8; 16] {
    let mut value = [0u8; 16];
    value[..8].copy_from_slice(&(counts.left as u64).to_be_bytes());
    value[8..].copy_from_slice(&(counts.right as u64).to_be_bytes());
    value
}

fn decode_counts(bytes: &[u8]) -> Result<PositionCounts, StoreError> {
    if bytes.len() != 16 {
        return Err(StoreError::Serialization(format!(
            "bad counts length {}",
            bytes.len()
        )));
    }
    Ok(PositionCounts {
        left: decode_seq(&bytes[..8])? as usize,
        right: decode_seq(&bytes[8..])? as usize,
    })
}

fn decode_id(bytes: &[u8]) -> Result<SlotId, StoreError> {
    let raw: [u8; 16] = bytes
        .try_into()
        .map_err(|_| StoreError::Serialization(format!("bad slot id length {}", bytes.len())))?;
    Ok(SlotId::from_bytes(raw))
}

fn decode_seq(bytes: &[u8]) -> Result<u64, StoreError> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StoreError::Serialization(format!("bad sequence length {}", bytes.len())))?;
    Ok(u64::from_be_bytes(raw))
}

type TxResult<T> = Result<T, ConflictableTransactionError<StoreError>>;

/// Lift a store error into a transaction abort
fn aborting<T, E: Into<StoreError>>(result: Result<T, E>) -> TxResult<T> {
    result.map_err(|e| ConflictableTransactionError::Abort(e.into()))
}

fn unwrap_tx<T>(result: Result<T, TransactionError<StoreError>>) -> Result<T, StoreError> {
    match result {
        Ok(value) => Ok(value),
        Err(TransactionError::Abort(e)) => Err(e),
        Err(TransactionError::Storage(e)) => Err(e.into()),
    }
}

fn read_account(accounts: &TransactionalTree, owner: &str) -> TxResult<Account> {
    match accounts.get(owner.as_bytes())? {
        Some(bytes) => aborting(serde_json::from_slice::<Account>(&bytes)),
        None => Ok(Account::new(owner.to_string())),
    }
}

fn write_account(accounts: &TransactionalTree, account: &Account) -> TxResult<()> {
    let record = aborting(serde_json::to_vec(account))?;
    accounts.insert(account.identity().as_bytes(), record)?;
    Ok(())
}

/// Sled-backed tree and account store
///
/// Cloning is cheap; clones share the same database handle.
#[derive(Debug, Clone)]
pub struct SledStore {
    db: Db,
    slots: Tree,
    claims: Tree,
    owners: Tree,
    meta: Tree,
    accounts: Tree,
    open_left: Tree,
    open_right: Tree,
    counts: Tree,
}

impl SledStore {
    /// Open (or create) a store at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path.as_ref())?;
        info!(path = %path.as_ref().display(), "opened placement store");
        Self::from_db(&db)
    }

    /// Store that is deleted when dropped
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(&db)
    }

    pub fn from_db(db: &Db) -> Result<Self, StoreError> {
        Ok(Self {
            db: db.clone(),
            slots: db.open_tree(SLOTS_TREE)?,
            claims: db.open_tree(CLAIMS_TREE)?,
            owners: db.open_tree(OWNERS_TREE)?,
            meta: db.open_tree(META_TREE)?,
            accounts: db.open_tree(ACCOUNTS_TREE)?,
            open_left: db.open_tree(OPEN_LEFT_TREE)?,
            open_right: db.open_tree(OPEN_RIGHT_TREE)?,
            counts: db.open_tree(COUNTS_TREE)?,
        })
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    fn decode_slot(&self, bytes: &[u8]) -> Result<Slot, StoreError> {
        let slot: Slot = serde_json::from_slice(bytes)?;
        let children = self.read_children(&slot.id())?;
        Ok(slot.with_children(children))
    }

    fn read_children(&self, id: &SlotId) -> Result<Children, StoreError> {
        let read = |position: Position| -> Result<Option<SlotId>, StoreError> {
            self.claims
                .get(claim_key(id, position))?
                .map(|v| decode_id(&v))
                .transpose()
        };
        Ok(Children {
            left: read(Position::Left)?,
            right: read(Position::Right)?,
        })
    }

    fn leading_open(&self, tree: &Tree, limit: usize) -> Result<Vec<Slot>, StoreError> {
        tree.iter()
            .values()
            .take(limit)
            .map(|value| self.get(decode_id(&value?)?))
            .collect()
    }

    /// Commit `batch` and, when given, the purchase's account update
    ///
    /// Everything happens in one transaction; any rejected check aborts it
    /// with nothing written.
    fn commit(
        &self,
        batch: &[NewSlot],
        purchase: Option<(&str, f64)>,
    ) -> Result<(Vec<Slot>, Option<Account>), StoreError> {
        let trees = (
            &self.slots,
            &self.claims,
            &self.owners,
            &self.meta,
            &self.accounts,
            &self.open_left,
            &self.open_right,
            &self.counts,
        );

        let result = trees.transaction(
            |(slots, claims, owners, meta, accounts, open_left, open_right, counts)| {
                let open_tree = |position: Position| match position {
                    Position::Left => open_left,
                    Position::Right => open_right,
                };

                // Gather everything the admission check needs from the
                // transactional view, then run the shared pure check.
                let batch_ids: HashSet<SlotId> = batch.iter().map(|s| s.id).collect();
                let mut existing = HashSet::new();
                for slot in batch {
                    if slots.get(slot.id.as_bytes())?.is_some() {
                        existing.insert(slot.id);
                    }
                }

                // parent id → (level, seq, children)
                let mut parents: HashMap<SlotId, (u32, u64, Children)> = HashMap::new();
                for parent in batch.iter().filter_map(|s| s.parent) {
                    if batch_ids.contains(&parent) || parents.contains_key(&parent) {
                        continue;
                    }
                    let record = match slots.get(parent.as_bytes())? {
                        Some(bytes) => bytes,
                        None => continue,
                    };
                    let stored: Slot = aborting(serde_json::from_slice(&record))?;
                    let mut children = Children::default();
                    for position in [Position::Left, Position::Right] {
                        if let Some(child) = claims.get(claim_key(&parent, position))? {
                            children.set(position, aborting(decode_id(&child))?);
                        }
                    }
                    parents.insert(parent, (stored.level(), stored.seq(), children));
                }

                let root_taken = claims.get(ROOT_CLAIM)?.is_some();
                aborting(check_batch(
                    batch,
                    root_taken,
                    |id| existing.contains(id),
                    |id| parents.get(id).map(|(level, _, children)| (*level, *children)),
                ))?;

                let account = match purchase {
                    Some((owner, credit)) => {
                        let mut account = read_account(accounts, owner)?;
                        let ids: Vec<SlotId> = batch.iter().map(|s| s.id).collect();
                        aborting(account.apply_purchase(&ids, credit))?;
                        write_account(accounts, &account)?;
                        Some(account)
                    }
                    None => None,
                };

                let mut next_seq = match meta.get(NEXT_SEQ_KEY)? {
                    Some(bytes) => aborting(decode_seq(&bytes))?,
                    None => 0,
                };

                let mut keys: HashMap<SlotId, (u32, u64)> = parents
                    .iter()
                    .map(|(id, (level, seq, _))| (*id, (*level, *seq)))
                    .collect();
                let mut owner_counts: HashMap<String, PositionCounts> = HashMap::new();
                let mut committed = Vec::with_capacity(batch.len());

                for new_slot in batch {
                    let slot = new_slot.clone().into_slot(next_seq);
                    next_seq += 1;
                    let slot_id = slot.id();
                    let id = &slot_id.as_bytes()[..];

                    slots.insert(id, aborting(serde_json::to_vec(&slot))?)?;

                    match new_slot.claim() {
                        Some((parent, position)) => {
                            claims.insert(&claim_key(&parent, position)[..], id)?;
                            if let Some(&(level, seq)) = keys.get(&parent) {
                                open_tree(position).remove(&open_key(level, seq)[..])?;
                            }
                        }
                        None => {
                            claims.insert(ROOT_CLAIM, id)?;
                        }
                    }

                    let key = open_key(slot.level(), slot.seq());
                    open_left.insert(&key[..], id)?;
                    open_right.insert(&key[..], id)?;
                    keys.insert(slot.id(), (slot.level(), slot.seq()));

                    owners.insert(owner_key(slot.owner(), slot.seq()), id)?;

                    if !owner_counts.contains_key(slot.owner()) {
                        let stored = match counts.get(slot.owner().as_bytes())? {
                            Some(bytes) => aborting(decode_counts(&bytes))?,
                            None => PositionCounts::default(),
                        };
                        owner_counts.insert(slot.owner().to_string(), stored);
                    }
                    if let Some(entry) = owner_counts.get_mut(slot.owner()) {
                        entry.record(slot.position());
                    }

                    committed.push(slot);
                }

                for (owner, tally) in &owner_counts {
                    counts.insert(owner.as_bytes(), &encode_counts(tally)[..])?;
                }
                meta.insert(NEXT_SEQ_KEY, &next_seq.to_be_bytes()[..])?;

                Ok((committed, account))
            },
        );

        let (committed, account) = unwrap_tx(result)?;
        self.flush()?;
        debug!(count = committed.len(), "committed slot batch");

        // Children of freshly committed slots are empty, except where a later
        // entry of the same batch linked under an earlier one.
        let committed = committed
            .into_iter()
            .map(|slot| {
                let children = self.read_children(&slot.id())?;
                Ok(slot.with_children(children))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        Ok((committed, account))
    }
}

impl TreeStore for SledStore {
    fn insert_batch(&self, batch: Vec<NewSlot>) -> Result<Vec<Slot>, StoreError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        self.commit(&batch, None).map(|(committed, _)| committed)
    }

    fn get(&self, id: SlotId) -> Result<Slot, StoreError> {
        match self.slots.get(id.as_bytes())? {
            Some(bytes) => self.decode_slot(&bytes),
            None => Err(StoreError::NotFound(id)),
        }
    }

    fn slots_of(&self, owner: &str) -> Result<Vec<Slot>, StoreError> {
        self.owners
            .scan_prefix(owner_prefix(owner))
            .values()
            .map(|value| {
                let id = decode_id(&value?)?;
                self.get(id)
            })
            .collect()
    }

    fn all_slots(&self) -> Result<Vec<Slot>, StoreError> {
        let mut all = self
            .slots
            .iter()
            .values()
            .map(|value| self.decode_slot(&value?))
            .collect::<Result<Vec<_>, StoreError>>()?;
        all.sort_by_key(|s| s.seq());
        Ok(all)
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.slots.len())
    }

    fn planning_snapshot(
        &self,
        owner: &str,
        limit: usize,
    ) -> Result<PlanningSnapshot, StoreError> {
        let owner_counts = self
            .counts
            .get(owner.as_bytes())?
            .map(|bytes| decode_counts(&bytes))
            .transpose()?
            .unwrap_or_default();
        let open_left = self.leading_open(&self.open_left, limit)?;
        let open_right = self.leading_open(&self.open_right, limit)?;

        // Read last so it covers every slot listed above
        let next_seq = self
            .meta
            .get(NEXT_SEQ_KEY)?
            .map(|bytes| decode_seq(&bytes))
            .transpose()?
            .unwrap_or(0);

        Ok(PlanningSnapshot {
            owner_counts,
            open_left,
            open_right,
            next_seq,
        })
    }
}

impl PurchaseStore for SledStore {
    fn commit_purchase(
        &self,
        owner: &str,
        slots: Vec<NewSlot>,
        token_credit: f64,
    ) -> Result<(Vec<Slot>, Account), StoreError> {
        let (committed, account) = self.commit(&slots, Some((owner, token_credit)))?;
        let account = account
            .ok_or_else(|| StoreError::Backend("purchase committed without account".to_string()))?;
        Ok((committed, account))
    }
}

impl AccountStore for SledStore {
    fn account(&self, owner: &str) -> Result<Option<Account>, StoreError> {
        self.accounts
            .get(owner.as_bytes())?
            .map(|bytes| serde_json::from_slice(&bytes).map_err(StoreError::from))
            .transpose()
    }

    fn record_purchase(
        &self,
        owner: &str,
        slot_ids: &[SlotId],
        token_credit: f64,
    ) -> Result<Account, StoreError> {
        let result = self.accounts.transaction(|accounts| {
            let mut account = read_account(accounts, owner)?;
            aborting(account.apply_purchase(slot_ids, token_credit))?;
            write_account(accounts, &account)?;
            Ok(account)
        });

        let account = unwrap_tx(result)?;
        self.accounts.flush()?;
        Ok(account)
    }

    fn accounts(&self) -> Result<Vec<Account>, StoreError> {
        self.accounts
            .iter()
            .values()
            .map(|value| Ok(serde_json::from_slice(&value?)?))
            .collect()
    }
}
