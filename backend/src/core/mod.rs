//! Pure building blocks shared by the placement engine

pub mod split;

pub use split::{amount_from_f64, split, to_major, Split, SplitError, MINOR_UNITS};
