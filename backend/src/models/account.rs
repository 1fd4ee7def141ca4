//! Account model
//!
//! Aggregate state of one purchasing identity:
//! - Ordered slot ids (insertion order = purchase order)
//! - Token balance accumulated from purchase remainders
//!
//! Accounts are created lazily on first purchase and never deleted here.
//! External debits (token transfers) happen outside the placement core.

use crate::models::slot::SlotId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during account operations
#[derive(Debug, Error, PartialEq)]
pub enum AccountError {
    #[error("Token credit must be finite and non-negative, got {0}")]
    InvalidCredit(f64),

    #[error("Slot {0} is already recorded for this account")]
    DuplicateSlot(SlotId),
}

/// Owner aggregate
///
/// # Example
/// ```
/// use matrix_placement_core::models::{Account, SlotId};
///
/// let mut account = Account::new("0xabc".to_string());
/// account.record_slots(&[SlotId::new()]).unwrap();
/// account.credit_tokens(0.75).unwrap();
///
/// assert_eq!(account.slots().len(), 1);
/// assert_eq!(account.token_balance(), 0.75);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Wallet address or user id
    identity: String,

    /// Owned slot ids in purchase order
    slots: Vec<SlotId>,

    /// Accumulated token credit
    token_balance: f64,
}

impl Account {
    pub fn new(identity: String) -> Self {
        Self {
            identity,
            slots: Vec::new(),
            token_balance: 0.0,
        }
    }

    /// Rebuild an account from persisted fields
    pub fn from_parts(identity: String, slots: Vec<SlotId>, token_balance: f64) -> Self {
        Self {
            identity,
            slots,
            token_balance,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn slots(&self) -> &[SlotId] {
        &self.slots
    }

    pub fn token_balance(&self) -> f64 {
        self.token_balance
    }

    /// Append newly placed slots, keeping purchase order
    ///
    /// Either every id is appended or none is.
    pub fn record_slots(&mut self, ids: &[SlotId]) -> Result<(), AccountError> {
        for (i, id) in ids.iter().enumerate() {
            if self.slots.contains(id) || ids[..i].contains(id) {
                return Err(AccountError::DuplicateSlot(*id));
            }
        }
        self.slots.extend_from_slice(ids);
        Ok(())
    }

    /// Add token credit; the balance never decreases inside the core
    pub fn credit_tokens(&mut self, amount: f64) -> Result<(), AccountError> {
        if !amount.is_finite() || amount < 0.0 || !(self.token_balance + amount).is_finite() {
            return Err(AccountError::InvalidCredit(amount));
        }
        self.token_balance += amount;
        Ok(())
    }

    /// Apply one purchase: slots and credit together, or nothing
    pub fn apply_purchase(&mut self, ids: &[SlotId], credit: f64) -> Result<(), AccountError> {
        if !credit.is_finite() || credit < 0.0 || !(self.token_balance + credit).is_finite() {
            return Err(AccountError::InvalidCredit(credit));
        }
        self.record_slots(ids)?;
        self.token_balance += credit;
        Ok(())
    }
}
