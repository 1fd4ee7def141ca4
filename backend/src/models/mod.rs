//! Domain models for the placement matrix

pub mod account;
pub mod slot;

// Re-exports
pub use account::{Account, AccountError};
pub use slot::{Children, NewSlot, ParsePositionError, Position, Slot, SlotId};
