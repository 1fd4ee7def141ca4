//! Matrix Placement Core - Rust Engine
//!
//! Exchanges a purchase amount for slots in a shared binary placement matrix
//! plus token credit for the part of the amount that does not buy a whole
//! slot.
//!
//! # Architecture
//!
//! - **core**: Amount splitting
//! - **models**: Domain types (Slot, Account)
//! - **store**: Tree and account stores (in-memory, sled)
//! - **placement**: Resolver, spillover locator, matrix codes, placement transaction
//! - **snapshot**: Export, audit and restore of store state
//! - **config**: Engine configuration
//!
//! # Critical Invariants
//!
//! 1. All money values are i64 minor units (kobo); splitting is exact
//! 2. Each `(parent, position)` pair holds at most one slot
//! 3. A purchase commits its slots and account update together or not at all
//! 4. Placement is deterministic for a given tree snapshot

// Module declarations
pub mod config;
pub mod core;
pub mod models;
pub mod placement;
pub mod snapshot;
pub mod store;

// Re-exports for convenience
pub use config::{ConfigError, PlacementConfig};
pub use crate::core::split::{amount_from_f64, split, to_major, Split, SplitError, MINOR_UNITS};
pub use models::{Account, AccountError, Children, NewSlot, Position, Slot, SlotId};
pub use placement::{
    CodeError, MatrixCode, MemoryEngine, PlacedSlot, PlacementEngine, PlacementError,
    PlacementFailure, PlacementRequest, PlacementResult, TreeView,
};
pub use snapshot::{validate_snapshot, SnapshotError, StoreSnapshot};
pub use store::{
    AccountStore, MemoryAccountStore, MemoryStore, MemoryTreeStore, PlanningSnapshot,
    PurchaseStore, SledStore, StoreError, TreeStore,
};

// FFI module (when feature enabled)
#[cfg(feature = "pyo3")]
pub mod ffi;

// PyO3 exports (when feature enabled)
#[cfg(feature = "pyo3")]
use pyo3::prelude::*;

#[cfg(feature = "pyo3")]
#[pymodule]
fn matrix_placement_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<ffi::engine::PyPlacementEngine>()?;
    Ok(())
}
