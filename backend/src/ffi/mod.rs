//! Python bindings (feature `pyo3`)

pub mod engine;

pub use engine::PyPlacementEngine;
