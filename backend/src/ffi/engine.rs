//! PyO3 wrapper for the placement engine
//!
//! This module provides the Python interface used by the purchase endpoint.
//! Python passes and receives money in major units (naira); the engine works
//! in kobo.

use pyo3::exceptions::{PyKeyError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList};

use crate::config::PlacementConfig;
use crate::core::split::{amount_from_f64, to_major};
use crate::models::{Account, Position, Slot, SlotId};
use crate::placement::{
    MemoryEngine, PlacementEngine, PlacementError, PlacementFailure, PlacementRequest,
    PlacementResult,
};
use crate::store::{AccountStore, SledStore, StoreError, TreeStore};

enum Backend {
    Memory(MemoryEngine),
    Sled(PlacementEngine<SledStore>),
}

macro_rules! with_engine {
    ($backend:expr, $engine:ident => $body:expr) => {
        match $backend {
            Backend::Memory($engine) => $body,
            Backend::Sled($engine) => $body,
        }
    };
}

/// Python wrapper for the Rust placement engine
///
/// # Example (from Python)
///
/// ```python
/// from matrix_placement_core import PlacementEngine
///
/// engine = PlacementEngine(path="/var/lib/matrix", token_rate=0.0015)
/// result = engine.place("0xabc", 4500.50)
/// print(result["slots"], result["token_balance"])
/// ```
#[pyclass(name = "PlacementEngine")]
pub struct PyPlacementEngine {
    inner: Backend,
}

#[pymethods]
impl PyPlacementEngine {
    /// Create an engine; `path=None` keeps everything in memory
    #[new]
    #[pyo3(signature = (path=None, slot_price=None, token_rate=None, max_attempts=None))]
    fn new(
        path: Option<String>,
        slot_price: Option<f64>,
        token_rate: Option<f64>,
        max_attempts: Option<usize>,
    ) -> PyResult<Self> {
        let mut config = PlacementConfig::default();
        if let Some(price) = slot_price {
            config.slot_price = minor_units(price)?;
        }
        if let Some(rate) = token_rate {
            config.token_rate = rate;
        }
        if let Some(attempts) = max_attempts {
            config.max_attempts = attempts;
        }

        let inner = match path {
            Some(path) => {
                let store = SledStore::open(&path).map_err(store_err)?;
                Backend::Sled(
                    PlacementEngine::new(store, config)
                        .map_err(|e| PyValueError::new_err(e.to_string()))?,
                )
            }
            None => Backend::Memory(
                MemoryEngine::in_memory(config).map_err(|e| PyValueError::new_err(e.to_string()))?,
            ),
        };

        Ok(Self { inner })
    }

    /// Place a purchase and return the placement report
    ///
    /// Raises ValueError for invalid input and RuntimeError when retries are
    /// exhausted (safe to resubmit).
    #[pyo3(signature = (owner, amount, positions=None, slot_price=None, token_rate=None))]
    fn place(
        &self,
        py: Python<'_>,
        owner: String,
        amount: f64,
        positions: Option<Vec<String>>,
        slot_price: Option<f64>,
        token_rate: Option<f64>,
    ) -> PyResult<Py<PyDict>> {
        let mut request = PlacementRequest::new(owner, minor_units(amount)?);
        request.slot_price = slot_price.map(minor_units).transpose()?;
        request.token_rate = token_rate;
        if let Some(raw) = positions {
            let parsed = raw
                .iter()
                .map(|p| p.parse::<Position>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| PyValueError::new_err(e.to_string()))?;
            request.positions = Some(parsed);
        }

        let result = py
            .allow_threads(|| with_engine!(&self.inner, engine => engine.place(&request)))
            .map_err(failure_err)?;

        result_to_py(py, &result)
    }

    /// Look up one slot by id
    fn slot(&self, py: Python<'_>, id: &str) -> PyResult<Py<PyDict>> {
        let id = parse_id(id)?;
        let slot = with_engine!(&self.inner, engine => engine.store().get(id)).map_err(store_err)?;
        slot_to_py(py, &slot)
    }

    /// Matrix code of a slot, e.g. "C3"
    fn code(&self, id: &str) -> PyResult<String> {
        let id = parse_id(id)?;
        let code = with_engine!(&self.inner, engine => engine.code_of(id)).map_err(|e| match e {
            PlacementError::Store(e) => store_err(e),
            other => PyValueError::new_err(other.to_string()),
        })?;
        Ok(code.to_string())
    }

    /// Owner's slots in purchase order
    fn slots_of(&self, py: Python<'_>, owner: &str) -> PyResult<Py<PyList>> {
        let slots =
            with_engine!(&self.inner, engine => engine.store().slots_of(owner)).map_err(store_err)?;
        let list = PyList::empty_bound(py);
        for slot in &slots {
            list.append(slot_to_py(py, slot)?)?;
        }
        Ok(list.unbind())
    }

    /// Owner's account, or None before the first purchase
    fn account(&self, py: Python<'_>, owner: &str) -> PyResult<Option<Py<PyDict>>> {
        let account =
            with_engine!(&self.inner, engine => engine.store().account(owner)).map_err(store_err)?;
        account.map(|a| account_to_py(py, &a)).transpose()
    }

    /// Total number of slots in the matrix
    fn slot_count(&self) -> PyResult<usize> {
        with_engine!(&self.inner, engine => engine.store().len()).map_err(store_err)
    }
}

fn minor_units(major: f64) -> PyResult<i64> {
    amount_from_f64(major).map_err(|e| PyValueError::new_err(e.to_string()))
}

fn parse_id(raw: &str) -> PyResult<SlotId> {
    raw.parse()
        .map_err(|e: uuid::Error| PyValueError::new_err(e.to_string()))
}

fn store_err(e: StoreError) -> PyErr {
    match e {
        StoreError::NotFound(id) => PyKeyError::new_err(id.to_string()),
        other => PyRuntimeError::new_err(other.to_string()),
    }
}

fn failure_err(failure: PlacementFailure) -> PyErr {
    if failure.error.is_validation() {
        PyValueError::new_err(failure.to_string())
    } else {
        PyRuntimeError::new_err(failure.to_string())
    }
}

fn slot_to_py(py: Python<'_>, slot: &Slot) -> PyResult<Py<PyDict>> {
    let dict = PyDict::new_bound(py);
    dict.set_item("id", slot.id().to_string())?;
    dict.set_item("seq", slot.seq())?;
    dict.set_item("owner", slot.owner())?;
    dict.set_item("position", slot.position().map(|p| p.as_str()))?;
    dict.set_item("parent_id", slot.parent().map(|p| p.to_string()))?;
    dict.set_item("left", slot.children().left.map(|c| c.to_string()))?;
    dict.set_item("right", slot.children().right.map(|c| c.to_string()))?;
    dict.set_item("level", slot.level())?;
    dict.set_item("placement_id", slot.placement_id().to_string())?;
    dict.set_item("created_at", slot.created_at().to_rfc3339())?;
    Ok(dict.unbind())
}

fn account_to_py(py: Python<'_>, account: &Account) -> PyResult<Py<PyDict>> {
    let dict = PyDict::new_bound(py);
    dict.set_item("identity", account.identity())?;
    let slots: Vec<String> = account.slots().iter().map(|s| s.to_string()).collect();
    dict.set_item("slots", slots)?;
    dict.set_item("token_balance", account.token_balance())?;
    Ok(dict.unbind())
}

fn result_to_py(py: Python<'_>, result: &PlacementResult) -> PyResult<Py<PyDict>> {
    let dict = PyDict::new_bound(py);
    dict.set_item("placement_id", result.placement_id.to_string())?;
    dict.set_item("owner", &result.owner)?;
    dict.set_item("slots_purchased", result.slot_count())?;
    dict.set_item("remainder", to_major(result.remainder))?;
    dict.set_item("credited_tokens", result.credited_tokens)?;
    dict.set_item("token_balance", result.token_balance)?;
    dict.set_item("attempts", result.attempts)?;

    let slots = PyList::empty_bound(py);
    for placed in &result.slots {
        let entry = PyDict::new_bound(py);
        entry.set_item("id", placed.id.to_string())?;
        entry.set_item("position", placed.position.map(|p| p.as_str()))?;
        entry.set_item("level", placed.level)?;
        entry.set_item("parent_id", placed.parent_id.map(|p| p.to_string()))?;
        entry.set_item("code", placed.code.map(|c| c.to_string()))?;
        slots.append(entry)?;
    }
    dict.set_item("slots", slots)?;

    Ok(dict.unbind())
}
