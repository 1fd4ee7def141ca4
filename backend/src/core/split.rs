//! Amount splitting
//!
//! Converts a purchase amount into whole slots plus a remainder that is later
//! credited as tokens.
//!
//! CRITICAL: All money values are i64 minor units (kobo, 1/100 of a naira).
//! Splitting is exact integer arithmetic, so
//! `slot_count * slot_price + remainder == amount` always holds, and a
//! fractional payment such as 4500.50 keeps its fraction in the remainder.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minor units per major currency unit
pub const MINOR_UNITS: i64 = 100;

/// Errors raised while validating a purchase amount
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SplitError {
    #[error("Invalid amount {amount}: must be finite and non-negative")]
    InvalidAmount { amount: String },

    #[error("Invalid slot price {price}: must be positive")]
    InvalidSlotPrice { price: i64 },
}

/// Result of splitting an amount by the slot price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Split {
    /// Number of whole slots the amount pays for
    pub slot_count: usize,

    /// Amount left over, always in `[0, slot_price)`
    pub remainder: i64,
}

impl Split {
    /// Portion of the amount spent on whole slots
    pub fn spent(&self, slot_price: i64) -> i64 {
        self.slot_count as i64 * slot_price
    }
}

/// Split `amount` into whole slots and a remainder
///
/// # Example
/// ```
/// use matrix_placement_core::core::split::split;
///
/// let s = split(450_000, 200_000).unwrap();
/// assert_eq!(s.slot_count, 2);
/// assert_eq!(s.remainder, 50_000);
/// ```
pub fn split(amount: i64, slot_price: i64) -> Result<Split, SplitError> {
    if slot_price <= 0 {
        return Err(SplitError::InvalidSlotPrice { price: slot_price });
    }
    if amount < 0 {
        return Err(SplitError::InvalidAmount {
            amount: amount.to_string(),
        });
    }

    Ok(Split {
        slot_count: (amount / slot_price) as usize,
        remainder: amount % slot_price,
    })
}

/// Convert an externally supplied major-unit amount into minor units
///
/// Rounds to the nearest minor unit, so `4500.50` becomes `450_050`. Rejects
/// NaN, infinities and negative values, and amounts whose minor-unit value is
/// beyond the range where `f64` represents every integer exactly.
///
/// # Example
/// ```
/// use matrix_placement_core::core::split::amount_from_f64;
///
/// assert_eq!(amount_from_f64(4500.50), Ok(450_050));
/// ```
pub fn amount_from_f64(amount: f64) -> Result<i64, SplitError> {
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0; // 2^53

    let invalid = || SplitError::InvalidAmount {
        amount: amount.to_string(),
    };
    if !amount.is_finite() || amount < 0.0 {
        return Err(invalid());
    }
    let minor = (amount * MINOR_UNITS as f64).round();
    if minor > MAX_EXACT {
        return Err(invalid());
    }
    Ok(minor as i64)
}

/// Minor units back to a major-unit value, for token conversion and display
pub fn to_major(minor: i64) -> f64 {
    minor as f64 / MINOR_UNITS as f64
}
