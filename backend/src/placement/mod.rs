//! Placement engine
//!
//! - **resolver**: side choice when the buyer gives none
//! - **locator**: spillover search for the parent with a free child
//! - **view**: planning snapshot shared by resolver and locator
//! - **code**: matrix position codes for reporting
//! - **engine**: the placement transaction

pub mod code;
pub mod engine;
pub mod locator;
pub mod resolver;
pub mod view;

pub use code::{CodeError, MatrixCode};
pub use engine::{
    plan_units, MemoryEngine, PlacedSlot, PlacementEngine, PlacementError, PlacementFailure,
    PlacementRequest, PlacementResult,
};
pub use locator::{find_available_parent, SpilloverIndex};
pub use resolver::{resolve, PositionCounts};
pub use view::TreeView;
