//! Tests for amount splitting
//!
//! CRITICAL: All money values are i64 minor units (kobo)

use matrix_placement_core::core::split::{amount_from_f64, split, to_major, SplitError};
use proptest::prelude::*;

#[test]
fn test_single_slot_no_remainder() {
    let s = split(200_000, 200_000).unwrap();
    assert_eq!(s.slot_count, 1);
    assert_eq!(s.remainder, 0);
}

#[test]
fn test_two_slots_with_remainder() {
    let s = split(450_000, 200_000).unwrap();
    assert_eq!(s.slot_count, 2);
    assert_eq!(s.remainder, 50_000);
    assert_eq!(s.spent(200_000), 400_000);
}

#[test]
fn test_large_amount() {
    let s = split(100_000_000_000_001, 200_000).unwrap();
    assert_eq!(s.slot_count, 500_000_000);
    assert_eq!(s.remainder, 1);
}

#[test]
fn test_invalid_inputs() {
    assert!(matches!(split(-200_000, 200_000), Err(SplitError::InvalidAmount { .. })));
    assert!(matches!(split(200_000, 0), Err(SplitError::InvalidSlotPrice { price: 0 })));
}

#[test]
fn test_external_amounts() {
    assert_eq!(amount_from_f64(0.0), Ok(0));
    assert_eq!(amount_from_f64(2000.0), Ok(200_000));
    assert_eq!(amount_from_f64(4500.50), Ok(450_050));
    assert_eq!(amount_from_f64(0.005), Ok(1));
    assert!(amount_from_f64(-0.5).is_err());
    assert!(amount_from_f64(f64::NEG_INFINITY).is_err());
    assert!(amount_from_f64(1e300).is_err());
}

#[test]
fn test_fractional_amount_splits_into_remainder() {
    let s = split(amount_from_f64(4500.50).unwrap(), 200_000).unwrap();
    assert_eq!(s.slot_count, 2);
    assert_eq!(s.remainder, 50_050);
    assert_eq!(to_major(s.remainder), 500.5);
}

proptest! {
    #[test]
    fn prop_split_is_exact(amount in 0i64..=1_000_000_000_000, price in 1i64..=1_000_000) {
        let s = split(amount, price).unwrap();
        prop_assert!(s.remainder >= 0);
        prop_assert!(s.remainder < price);
        prop_assert_eq!(s.slot_count as i64 * price + s.remainder, amount);
        prop_assert_eq!(s.slot_count as i64, amount / price);
    }

    #[test]
    fn prop_negative_amounts_rejected(amount in i64::MIN..0, price in 1i64..=1_000_000) {
        let rejected = matches!(split(amount, price), Err(SplitError::InvalidAmount { .. }));
        prop_assert!(rejected);
    }

    #[test]
    fn prop_whole_kobo_amounts_convert_exactly(kobo in 0i64..=1_000_000_000_000) {
        prop_assert_eq!(amount_from_f64(to_major(kobo)), Ok(kobo));
    }
}
