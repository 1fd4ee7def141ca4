//! Tests for the sled-backed store
//!
//! Uses `tempfile` directories for durability checks across reopen.

use matrix_placement_core::models::{NewSlot, Position};
use matrix_placement_core::{
    AccountError, AccountStore, PlacementConfig, PlacementEngine, PlacementRequest,
    PurchaseStore, SledStore, SlotId, StoreError, TreeStore,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::tempdir;
use uuid::Uuid;

#[test]
fn test_insert_and_read_back() {
    let store = SledStore::temporary().unwrap();
    let root = store.insert(NewSlot::root("A", Uuid::new_v4())).unwrap();
    let child = store
        .insert(NewSlot::child("B", &root, Position::Right, Uuid::new_v4()))
        .unwrap();

    assert_eq!(store.get(child.id()).unwrap(), child);
    assert_eq!(store.children_of(root.id()).unwrap().right, Some(child.id()));
    assert_eq!(store.get(root.id()).unwrap().children().right, Some(child.id()));
    assert_eq!(store.len().unwrap(), 2);
}

#[test]
fn test_rejections_match_memory_store() {
    let store = SledStore::temporary().unwrap();
    let root = store.insert(NewSlot::root("A", Uuid::new_v4())).unwrap();
    store
        .insert(NewSlot::child("B", &root, Position::Left, Uuid::new_v4()))
        .unwrap();

    let taken = store.insert(NewSlot::child("C", &root, Position::Left, Uuid::new_v4()));
    assert!(taken.unwrap_err().is_occupied());

    let second_root = store.insert(NewSlot::root("C", Uuid::new_v4()));
    assert!(second_root.unwrap_err().is_occupied());

    let mut orphan = NewSlot::child("C", &root, Position::Right, Uuid::new_v4());
    let ghost = SlotId::new();
    orphan.parent = Some(ghost);
    assert_eq!(store.insert(orphan), Err(StoreError::UnknownParent(ghost)));

    let missing = SlotId::new();
    assert_eq!(store.get(missing), Err(StoreError::NotFound(missing)));
    assert_eq!(store.len().unwrap(), 2);
}

#[test]
fn test_failed_batch_writes_nothing() {
    let store = SledStore::temporary().unwrap();
    let root = store.insert(NewSlot::root("A", Uuid::new_v4())).unwrap();
    let placement = Uuid::new_v4();

    let ok = NewSlot::child("B", &root, Position::Left, placement);
    let clash = NewSlot::child("B", &root, Position::Left, placement);

    assert!(store.insert_batch(vec![ok, clash]).unwrap_err().is_occupied());
    assert_eq!(store.len().unwrap(), 1);
    assert!(store.slots_of("B").unwrap().is_empty());
    assert_eq!(store.children_of(root.id()).unwrap().count(), 0);
}

#[test]
fn test_slots_of_in_insertion_order() {
    let store = SledStore::temporary().unwrap();
    let root = store.insert(NewSlot::root("A", Uuid::new_v4())).unwrap();
    let mut expected = vec![root.id()];
    let mut parent = root;
    for _ in 0..12 {
        parent = store
            .insert(NewSlot::child("A", &parent, Position::Left, Uuid::new_v4()))
            .unwrap();
        expected.push(parent.id());
    }
    // Owner whose name extends "A" must not leak into A's listing
    store
        .insert(NewSlot::child("AB", &parent, Position::Right, Uuid::new_v4()))
        .unwrap();

    let ids: Vec<SlotId> = store.slots_of("A").unwrap().iter().map(|s| s.id()).collect();
    assert_eq!(ids, expected);
    assert_eq!(store.slots_of("AB").unwrap().len(), 1);

    let all = store.all_slots().unwrap();
    assert!(all.windows(2).all(|w| w[0].seq() < w[1].seq()));
}

#[test]
fn test_state_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("matrix.db");

    let (slots, balance) = {
        let store = SledStore::open(&path).unwrap();
        let engine = PlacementEngine::new(store, PlacementConfig::default()).unwrap();
        engine.place(&PlacementRequest::new("A", 450_000)).unwrap();
        let result = engine.place(&PlacementRequest::new("B", 650_000)).unwrap();
        (engine.store().all_slots().unwrap(), result.token_balance)
    };

    let store = SledStore::open(&path).unwrap();
    assert_eq!(store.all_slots().unwrap(), slots);
    let account = store.account("B").unwrap().unwrap();
    assert_eq!(account.token_balance(), balance);
    assert_eq!(account.slots().len(), 3);

    // Sequence numbering continues after reopen
    let engine = PlacementEngine::new(store, PlacementConfig::default()).unwrap();
    let snapshot = engine.store().planning_snapshot("B", 4).unwrap();
    assert_eq!(snapshot.owner_counts.total(), 3);
    assert_eq!(snapshot.next_seq, slots.len() as u64);

    let result = engine.place(&PlacementRequest::new("C", 200_000)).unwrap();
    let placed = engine.store().get(result.slots[0].id).unwrap();
    assert_eq!(placed.seq(), slots.len() as u64);
}

#[test]
fn test_purchase_commits_slots_and_account_together() {
    let store = SledStore::temporary().unwrap();
    let root = NewSlot::root("A", Uuid::new_v4());
    let root_id = root.id;

    let (committed, account) = store.commit_purchase("A", vec![root], 0.75).unwrap();

    assert_eq!(committed[0].id(), root_id);
    assert_eq!(account.slots(), &[root_id]);
    assert_eq!(store.account("A").unwrap(), Some(account));
}

#[test]
fn test_rejected_account_update_writes_nothing() {
    let store = SledStore::temporary().unwrap();
    let root = store.insert(NewSlot::root("ROOT", Uuid::new_v4())).unwrap();

    // The account already lists the id the purchase is about to commit
    let child = NewSlot::child("A", &root, Position::Left, Uuid::new_v4());
    store.record_purchase("A", &[child.id], 0.5).unwrap();

    let err = store.commit_purchase("A", vec![child.clone()], 1.0).unwrap_err();

    assert_eq!(err, StoreError::Account(AccountError::DuplicateSlot(child.id)));
    assert_eq!(store.len().unwrap(), 1);
    assert_eq!(store.get(child.id), Err(StoreError::NotFound(child.id)));
    assert!(store.children_of(root.id()).unwrap().left.is_none());
    assert_eq!(store.account("A").unwrap().unwrap().token_balance(), 0.5);

    let snapshot = store.planning_snapshot("A", 4).unwrap();
    assert_eq!(snapshot.owner_counts.total(), 0);
    assert_eq!(snapshot.open_left.len(), 1);
    assert_eq!(snapshot.next_seq, 1);
}

#[test]
fn test_account_updates() {
    let store = SledStore::temporary().unwrap();
    let first = SlotId::new();
    let second = SlotId::new();

    store.record_purchase("A", &[first], 0.5).unwrap();
    let account = store.record_purchase("A", &[second], 0.25).unwrap();

    assert_eq!(account.slots(), &[first, second]);
    assert_eq!(account.token_balance(), 0.75);

    let duplicate = store.record_purchase("A", &[first], 1.0);
    assert!(matches!(duplicate, Err(StoreError::Account(_))));
    assert_eq!(store.account("A").unwrap().unwrap().token_balance(), 0.75);

    store.record_purchase("B", &[], 1.0).unwrap();
    let identities: Vec<String> = store
        .accounts()
        .unwrap()
        .iter()
        .map(|a| a.identity().to_string())
        .collect();
    assert_eq!(identities, vec!["A", "B"]);
}

#[test]
fn test_concurrent_claims_one_winner() {
    let store = SledStore::temporary().unwrap();
    let root = store.insert(NewSlot::root("A", Uuid::new_v4())).unwrap();
    let wins = AtomicUsize::new(0);

    std::thread::scope(|s| {
        for i in 0..8 {
            let store = store.clone();
            let root = &root;
            let wins = &wins;
            s.spawn(move || {
                let owner = format!("OWNER_{}", i);
                match store.insert(NewSlot::child(owner, root, Position::Right, Uuid::new_v4())) {
                    Ok(_) => {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(e) => assert!(e.is_occupied(), "unexpected error: {}", e),
                }
            });
        }
    });

    assert_eq!(wins.load(Ordering::SeqCst), 1);
    assert_eq!(store.len().unwrap(), 2);
}
