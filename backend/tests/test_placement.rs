//! Tests for the placement transaction
//!
//! Scenarios cover splitting, auto-balancing, explicit positions, root
//! creation and all-or-nothing validation. Amounts are in kobo.

use matrix_placement_core::models::{NewSlot, Position};
use matrix_placement_core::{
    amount_from_f64, AccountError, AccountStore, MemoryEngine, MemoryStore, PlacementConfig,
    PlacementEngine, PlacementError, PlacementRequest, SledStore, StoreError, TreeStore,
};
use uuid::Uuid;

fn engine() -> MemoryEngine {
    MemoryEngine::in_memory(PlacementConfig::default()).unwrap()
}

/// Engine whose tree already holds a root owned by someone else
fn engine_with_root() -> (MemoryEngine, matrix_placement_core::Slot) {
    let store = MemoryStore::new();
    let root = store.insert(NewSlot::root("ROOT", Uuid::new_v4())).unwrap();
    let engine = PlacementEngine::new(store, PlacementConfig::default()).unwrap();
    (engine, root)
}

fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[test]
fn test_exact_amount_buys_one_slot() {
    let engine = engine();

    let result = engine.place(&PlacementRequest::new("A", 200_000)).unwrap();

    assert_eq!(result.slot_count(), 1);
    assert_eq!(result.remainder, 0);
    assert_eq!(result.credited_tokens, 0.0);
    assert_eq!(result.token_balance, 0.0);
    assert_eq!(result.attempts, 1);

    let account = engine.store().account("A").unwrap().unwrap();
    assert_eq!(account.slots(), &[result.slots[0].id]);
}

#[test]
fn test_remainder_is_credited_and_positions_balance() {
    let (engine, root) = engine_with_root();

    let result = engine.place(&PlacementRequest::new("A", 450_000)).unwrap();

    assert_eq!(result.slot_count(), 2);
    assert_eq!(result.remainder, 50_000);
    assert!(approx_eq(result.credited_tokens, 0.75));
    assert!(approx_eq(result.token_balance, 0.75));

    assert_eq!(result.slots[0].position, Some(Position::Left));
    assert_eq!(result.slots[1].position, Some(Position::Right));
    assert!(result.slots.iter().all(|s| s.parent_id == Some(root.id())));
    assert!(result.slots.iter().all(|s| s.level == 2));
}

#[test]
fn test_per_call_rate_and_price() {
    let (engine, _) = engine_with_root();

    let result = engine
        .place(
            &PlacementRequest::new("A", 450_000)
                .with_slot_price(100_000)
                .with_token_rate(0.01),
        )
        .unwrap();

    assert_eq!(result.slot_count(), 4);
    assert_eq!(result.remainder, 50_000);
    assert!(approx_eq(result.credited_tokens, 5.0));
}

#[test]
fn test_first_purchase_creates_root() {
    let engine = engine();

    let result = engine.place(&PlacementRequest::new("A", 200_000)).unwrap();
    let root = &result.slots[0];

    assert_eq!(root.level, 1);
    assert_eq!(root.parent_id, None);
    assert_eq!(root.position, None);
    assert_eq!(root.code.map(|c| c.to_string()).as_deref(), Some("A1"));
}

#[test]
fn test_explicit_position_ignored_for_root() {
    let engine = engine();

    let result = engine
        .place(&PlacementRequest::new("A", 200_000).with_positions(vec![Position::Right]))
        .unwrap();

    assert_eq!(result.slots[0].position, None);
    assert_eq!(result.slots[0].level, 1);
}

#[test]
fn test_position_count_mismatch_creates_nothing() {
    let (engine, _) = engine_with_root();

    let failure = engine
        .place(&PlacementRequest::new("A", 450_000).with_positions(vec![
            Position::Left,
            Position::Left,
            Position::Right,
        ]))
        .unwrap_err();

    assert_eq!(
        failure.error,
        PlacementError::PositionCountMismatch {
            expected: 2,
            provided: 3
        }
    );
    assert_eq!(engine.store().len().unwrap(), 1);
    assert!(engine.store().account("A").unwrap().is_none());
}

#[test]
fn test_explicit_positions_spill_over() {
    let (engine, root) = engine_with_root();

    let result = engine
        .place(
            &PlacementRequest::new("A", 400_000)
                .with_positions(vec![Position::Right, Position::Right]),
        )
        .unwrap();

    let first = &result.slots[0];
    let second = &result.slots[1];
    assert_eq!(first.parent_id, Some(root.id()));
    assert_eq!(second.parent_id, Some(first.id));
    assert_eq!(second.level, 3);
    assert_eq!(first.code.map(|c| c.to_string()).as_deref(), Some("B2"));
    assert_eq!(second.code.map(|c| c.to_string()).as_deref(), Some("C4"));
}

#[test]
fn test_spillover_is_per_position() {
    let (engine, root) = engine_with_root();

    let b = engine.place(&PlacementRequest::new("B", 200_000)).unwrap();
    let c = engine.place(&PlacementRequest::new("C", 200_000)).unwrap();

    // Both new owners resolve left; root's left is taken by B
    assert_eq!(b.slots[0].parent_id, Some(root.id()));
    assert_eq!(c.slots[0].position, Some(Position::Left));
    assert_eq!(c.slots[0].parent_id, Some(b.slots[0].id));
}

#[test]
fn test_balance_accumulates_across_purchases() {
    let (engine, _) = engine_with_root();

    engine.place(&PlacementRequest::new("A", 450_000)).unwrap();
    let second = engine.place(&PlacementRequest::new("A", 450_000)).unwrap();

    assert!(approx_eq(second.credited_tokens, 0.75));
    assert!(approx_eq(second.token_balance, 1.5));

    let account = engine.store().account("A").unwrap().unwrap();
    assert_eq!(account.slots().len(), 4);
    // Own counts are 2/2 after the second purchase
    let positions: Vec<_> = engine
        .store()
        .slots_of("A")
        .unwrap()
        .iter()
        .map(|s| s.position())
        .collect();
    assert_eq!(
        positions,
        vec![
            Some(Position::Left),
            Some(Position::Right),
            Some(Position::Left),
            Some(Position::Right)
        ]
    );
}

#[test]
fn test_remainder_only_purchase() {
    let (engine, _) = engine_with_root();

    let result = engine.place(&PlacementRequest::new("A", 50_000)).unwrap();

    assert!(result.slots.is_empty());
    assert_eq!(result.attempts, 0);
    assert_eq!(engine.store().len().unwrap(), 1);
    let account = engine.store().account("A").unwrap().unwrap();
    assert!(account.slots().is_empty());
    assert!(approx_eq(account.token_balance(), 0.75));
}

#[test]
fn test_validation_errors() {
    let engine = engine();

    let negative = engine.place(&PlacementRequest::new("A", -1)).unwrap_err();
    assert!(matches!(negative.error, PlacementError::InvalidAmount { .. }));

    let price = engine
        .place(&PlacementRequest::new("A", 200_000).with_slot_price(0))
        .unwrap_err();
    assert_eq!(price.error, PlacementError::InvalidSlotPrice { price: 0 });

    let rate = engine
        .place(&PlacementRequest::new("A", 200_000).with_token_rate(-0.5))
        .unwrap_err();
    assert_eq!(rate.error, PlacementError::InvalidRate(-0.5));

    let nan = engine
        .place(&PlacementRequest::new("A", 200_000).with_token_rate(f64::NAN))
        .unwrap_err();
    assert!(matches!(nan.error, PlacementError::InvalidRate(_)));

    let owner = engine.place(&PlacementRequest::new(" ", 200_000)).unwrap_err();
    assert!(matches!(owner.error, PlacementError::InvalidOwner(_)));

    for failure in [negative, price, rate, nan, owner] {
        assert!(failure.error.is_validation());
    }
    assert_eq!(engine.store().len().unwrap(), 0);
    assert!(AccountStore::accounts(engine.store()).unwrap().is_empty());
}

#[test]
fn test_too_many_slots() {
    let config = PlacementConfig {
        max_slots_per_purchase: 3,
        ..PlacementConfig::default()
    };
    let engine = MemoryEngine::in_memory(config).unwrap();

    let failure = engine.place(&PlacementRequest::new("A", 800_000)).unwrap_err();

    assert_eq!(
        failure.error,
        PlacementError::TooManySlots {
            requested: 4,
            limit: 3
        }
    );
    assert_eq!(engine.store().len().unwrap(), 0);
}

#[test]
fn test_single_purchase_builds_a_subtree() {
    let engine = engine();

    let result = engine.place(&PlacementRequest::new("A", 1_400_000)).unwrap();

    let codes: Vec<String> = result
        .slots
        .iter()
        .map(|s| s.code.map(|c| c.to_string()).unwrap_or_default())
        .collect();
    assert_eq!(codes, vec!["A1", "B1", "B2", "C1", "C2", "C3", "C4"]);

    let ids: Vec<_> = result.slots.iter().map(|s| s.id).collect();
    let stored = engine.store().slots_of("A").unwrap();
    assert_eq!(ids, stored.iter().map(|s| s.id()).collect::<Vec<_>>());
    for slot in &stored {
        assert_eq!(slot.placement_id(), result.placement_id);
    }
}

#[test]
fn test_config_is_validated() {
    let config = PlacementConfig {
        slot_price: 0,
        ..PlacementConfig::default()
    };
    assert!(MemoryEngine::in_memory(config).is_err());
}

#[test]
fn test_fractional_amount_credits_the_fraction() {
    let (engine, _) = engine_with_root();
    let amount = amount_from_f64(4500.50).unwrap();

    let result = engine.place(&PlacementRequest::new("A", amount)).unwrap();

    assert_eq!(amount, 450_050);
    assert_eq!(result.slot_count(), 2);
    assert_eq!(result.remainder, 50_050);
    assert!(approx_eq(result.credited_tokens, 500.5 * 0.0015));
    assert!(approx_eq(result.token_balance, 0.75075));
}

#[test]
fn test_rejected_credit_leaves_tree_untouched() {
    let (engine, _) = engine_with_root();

    // 500 naira * f64::MAX overflows to infinity, which the account refuses
    let failure = engine
        .place(&PlacementRequest::new("A", 450_000).with_token_rate(f64::MAX))
        .unwrap_err();

    assert_eq!(
        failure.error,
        PlacementError::Store(StoreError::Account(AccountError::InvalidCredit(
            f64::INFINITY
        )))
    );
    assert_eq!(engine.store().len().unwrap(), 1);
    assert!(engine.store().slots_of("A").unwrap().is_empty());
    assert!(engine.store().account("A").unwrap().is_none());

    // The positions the failed purchase planned are still free
    let retry = engine.place(&PlacementRequest::new("A", 450_000)).unwrap();
    assert_eq!(retry.slots[0].code.map(|c| c.to_string()).as_deref(), Some("B1"));
}

#[test]
fn test_rejected_credit_leaves_sled_tree_untouched() {
    let store = SledStore::temporary().unwrap();
    let engine = PlacementEngine::new(store, PlacementConfig::default()).unwrap();
    engine.place(&PlacementRequest::new("A", 200_000)).unwrap();

    let failure = engine
        .place(&PlacementRequest::new("A", 450_000).with_token_rate(f64::MAX))
        .unwrap_err();

    assert!(matches!(
        failure.error,
        PlacementError::Store(StoreError::Account(_))
    ));
    assert_eq!(engine.store().len().unwrap(), 1);
    let account = engine.store().account("A").unwrap().unwrap();
    assert_eq!(account.slots().len(), 1);
    assert_eq!(account.token_balance(), 0.0);

    let snapshot = engine.store().planning_snapshot("A", 2).unwrap();
    assert_eq!(snapshot.next_seq, 1);
    assert_eq!(snapshot.open_left.len(), 1);
    assert_eq!(snapshot.open_right.len(), 1);
}
