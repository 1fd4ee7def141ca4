//! Placement transaction
//!
//! Turns one purchase into slots and token credit:
//!
//! ```text
//! 1. Validate (amount, price, rate, owner, explicit position count)
//! 2. Split amount → slot count + remainder
//! 3. Plan every unit on a TreeView built from the store's planning snapshot
//!      position = explicit[i] or resolve(owner counts)
//!      parent   = find_available_parent(position) or new root
//! 4. Commit slots, ids and credit (remainder * rate) with one commit_purchase
//!      PositionOccupied → re-read snapshot, re-plan (bounded attempts)
//! 5. Report slots with matrix codes
//! ```
//!
//! # Critical Invariants
//!
//! 1. **All-or-nothing**: validation runs before any write, and slots plus
//!    the account update are one atomic commit, so a failed purchase leaves
//!    neither slots nor credit behind
//! 2. **No dangling links**: parent pointers are written with the child
//! 3. **Bounded planning**: an attempt reads the owner's counts and the
//!    leading open parents, never the whole tree

use crate::config::{ConfigError, PlacementConfig};
use crate::core::split::{split, to_major, Split, SplitError};
use crate::models::{Account, NewSlot, Position, SlotId};
use crate::placement::code::{CodeError, MatrixCode};
use crate::placement::locator::find_available_parent;
use crate::placement::resolver::resolve;
use crate::placement::view::TreeView;
use crate::store::{AccountStore, MemoryStore, PurchaseStore, StoreError, TreeStore};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur while placing a purchase
#[derive(Debug, Error, PartialEq)]
pub enum PlacementError {
    #[error("Invalid amount {amount}: must be finite and non-negative")]
    InvalidAmount { amount: String },

    #[error("Invalid slot price {price}: must be positive")]
    InvalidSlotPrice { price: i64 },

    #[error("Invalid token rate {0}: must be finite and non-negative")]
    InvalidRate(f64),

    #[error("Invalid owner identity {0:?}")]
    InvalidOwner(String),

    #[error("Expected {expected} explicit positions, got {provided}")]
    PositionCountMismatch { expected: usize, provided: usize },

    #[error("Purchase of {requested} slots exceeds the limit of {limit}")]
    TooManySlots { requested: usize, limit: usize },

    #[error("Placement conflicted {attempts} times; resubmit the purchase")]
    PlacementConflict { attempts: usize },

    #[error("Matrix code error: {0}")]
    Code(#[from] CodeError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<SplitError> for PlacementError {
    fn from(e: SplitError) -> Self {
        match e {
            SplitError::InvalidAmount { amount } => PlacementError::InvalidAmount { amount },
            SplitError::InvalidSlotPrice { price } => PlacementError::InvalidSlotPrice { price },
        }
    }
}

impl PlacementError {
    /// Whether resubmitting the same purchase may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, PlacementError::PlacementConflict { .. })
    }

    /// Rejected before any placement work
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            PlacementError::InvalidAmount { .. }
                | PlacementError::InvalidSlotPrice { .. }
                | PlacementError::InvalidRate(_)
                | PlacementError::InvalidOwner(_)
                | PlacementError::PositionCountMismatch { .. }
                | PlacementError::TooManySlots { .. }
        )
    }
}

/// Caller-facing failure, echoing the request for idempotent resubmission
#[derive(Debug, Error, PartialEq)]
#[error("Placement of {amount} for {owner} failed: {error}")]
pub struct PlacementFailure {
    pub owner: String,
    pub amount: i64,
    #[source]
    pub error: PlacementError,
}

impl PlacementFailure {
    pub fn is_retryable(&self) -> bool {
        self.error.is_retryable()
    }
}

// ============================================================================
// Request / Result
// ============================================================================

/// One purchase to place
///
/// # Example
/// ```
/// use matrix_placement_core::models::Position;
/// use matrix_placement_core::PlacementRequest;
///
/// let request = PlacementRequest::new("0xabc", 450_050)
///     .with_token_rate(0.002)
///     .with_positions(vec![Position::Left, Position::Right]);
/// assert_eq!(request.amount, 450_050);
/// ```
///
/// A purchase buying more than `PlacementConfig::max_slots_per_purchase`
/// slots is refused with `TooManySlots` before any planning. The limit is a
/// configurable cap on one atomic commit, not a property of the matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementRequest {
    /// Purchasing identity, validated upstream
    pub owner: String,

    /// Paid amount in minor units (kobo)
    pub amount: i64,

    /// Overrides the configured slot price (minor units)
    #[serde(default)]
    pub slot_price: Option<i64>,

    /// Tokens per leftover major currency unit; overrides the configured rate
    #[serde(default)]
    pub token_rate: Option<f64>,

    /// Manual placement: one side per purchased slot
    #[serde(default)]
    pub positions: Option<Vec<Position>>,
}

impl PlacementRequest {
    pub fn new(owner: impl Into<String>, amount: i64) -> Self {
        Self {
            owner: owner.into(),
            amount,
            slot_price: None,
            token_rate: None,
            positions: None,
        }
    }

    pub fn with_slot_price(mut self, slot_price: i64) -> Self {
        self.slot_price = Some(slot_price);
        self
    }

    pub fn with_token_rate(mut self, token_rate: f64) -> Self {
        self.token_rate = Some(token_rate);
        self
    }

    pub fn with_positions(mut self, positions: Vec<Position>) -> Self {
        self.positions = Some(positions);
        self
    }
}

/// Report line for one created slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacedSlot {
    pub id: SlotId,
    pub position: Option<Position>,
    pub level: u32,
    pub parent_id: Option<SlotId>,
    /// `None` only beyond the encodable depth
    pub code: Option<MatrixCode>,
}

/// Outcome of a successful placement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementResult {
    /// Shared by every slot created by this purchase
    pub placement_id: Uuid,
    pub owner: String,
    pub slots: Vec<PlacedSlot>,
    /// Leftover in minor units
    pub remainder: i64,
    /// Tokens credited by this purchase
    pub credited_tokens: f64,
    /// Owner's token balance after this purchase
    pub token_balance: f64,
    /// Plan/commit attempts used (1 when no race occurred)
    pub attempts: usize,
}

impl PlacementResult {
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Placement engine over a purchase store
///
/// The engine is `Send + Sync` when its store is; share it between request
/// handlers with `Arc`.
#[derive(Debug)]
pub struct PlacementEngine<S> {
    store: S,
    config: PlacementConfig,
}

/// Engine over the in-memory store
pub type MemoryEngine = PlacementEngine<MemoryStore>;

impl MemoryEngine {
    pub fn in_memory(config: PlacementConfig) -> Result<Self, ConfigError> {
        Self::new(MemoryStore::new(), config)
    }
}

impl<S: PurchaseStore> PlacementEngine<S> {
    pub fn new(store: S, config: PlacementConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { store, config })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &PlacementConfig {
        &self.config
    }

    /// Place a purchase
    ///
    /// # Example
    /// ```
    /// use matrix_placement_core::{MemoryEngine, PlacementConfig, PlacementRequest};
    ///
    /// let engine = MemoryEngine::in_memory(PlacementConfig::default()).unwrap();
    /// let result = engine.place(&PlacementRequest::new("0xabc", 450_000)).unwrap();
    ///
    /// assert_eq!(result.slot_count(), 2);
    /// assert_eq!(result.remainder, 50_000);
    /// assert_eq!(result.slots[0].level, 1); // first purchase creates the root
    /// ```
    pub fn place(&self, request: &PlacementRequest) -> Result<PlacementResult, PlacementFailure> {
        self.place_inner(request).map_err(|error| {
            warn!(
                owner = %request.owner,
                amount = request.amount,
                error = %error,
                "placement failed"
            );
            PlacementFailure {
                owner: request.owner.clone(),
                amount: request.amount,
                error,
            }
        })
    }

    fn place_inner(&self, request: &PlacementRequest) -> Result<PlacementResult, PlacementError> {
        let owner = request.owner.as_str();
        validate_owner(owner)?;

        let slot_price = request.slot_price.unwrap_or(self.config.slot_price);
        let token_rate = request.token_rate.unwrap_or(self.config.token_rate);

        let split = split(request.amount, slot_price)?;
        if !token_rate.is_finite() || token_rate < 0.0 {
            return Err(PlacementError::InvalidRate(token_rate));
        }
        if split.slot_count > self.config.max_slots_per_purchase {
            return Err(PlacementError::TooManySlots {
                requested: split.slot_count,
                limit: self.config.max_slots_per_purchase,
            });
        }
        if let Some(positions) = &request.positions {
            if positions.len() != split.slot_count {
                return Err(PlacementError::PositionCountMismatch {
                    expected: split.slot_count,
                    provided: positions.len(),
                });
            }
        }

        let placement_id = Uuid::new_v4();
        let credited_tokens = if split.remainder > 0 {
            to_major(split.remainder) * token_rate
        } else {
            0.0
        };

        let (slots, account, attempts) = if split.slot_count > 0 {
            let (slots, account, attempts) = self.commit_slots(
                owner,
                &split,
                request.positions.as_deref(),
                placement_id,
                credited_tokens,
            )?;
            (slots, Some(account), attempts)
        } else if split.remainder > 0 {
            let (_, account) = self
                .store
                .commit_purchase(owner, Vec::new(), credited_tokens)?;
            (Vec::new(), Some(account), 0)
        } else {
            (Vec::new(), None, 0)
        };

        let token_balance = match account {
            Some(account) => account.token_balance(),
            None => self
                .store
                .account(owner)?
                .map(|a| a.token_balance())
                .unwrap_or(0.0),
        };

        info!(
            owner = %owner,
            placement_id = %placement_id,
            slots = slots.len(),
            remainder = split.remainder,
            credited_tokens,
            attempts,
            "placement committed"
        );

        Ok(PlacementResult {
            placement_id,
            owner: owner.to_string(),
            slots,
            remainder: split.remainder,
            credited_tokens,
            token_balance,
            attempts,
        })
    }

    /// Plan and commit all units with the account update, re-planning on
    /// position races
    fn commit_slots(
        &self,
        owner: &str,
        split: &Split,
        explicit: Option<&[Position]>,
        placement_id: Uuid,
        credited_tokens: f64,
    ) -> Result<(Vec<PlacedSlot>, Account, usize), PlacementError> {
        let max_attempts = self.config.max_attempts;

        for attempt in 1..=max_attempts {
            // n units fill at most n open parents per side
            let snapshot = self.store.planning_snapshot(owner, split.slot_count)?;
            let mut view = TreeView::from_snapshot(owner, snapshot);
            let planned = plan_units(&mut view, owner, split.slot_count, explicit, placement_id);

            match self.store.commit_purchase(owner, planned, credited_tokens) {
                Ok((committed, account)) => {
                    let report = committed
                        .iter()
                        .map(|slot| PlacedSlot {
                            id: slot.id(),
                            position: slot.position(),
                            level: slot.level(),
                            parent_id: slot.parent(),
                            code: MatrixCode::encode(slot, |id| {
                                view.get(&id).cloned().or_else(|| self.store.get(id).ok())
                            })
                            .ok(),
                        })
                        .collect();
                    return Ok((report, account, attempt));
                }
                Err(e) if e.is_occupied() => {
                    warn!(
                        owner = %owner,
                        attempt,
                        max_attempts,
                        error = %e,
                        "position taken by a concurrent placement, re-planning"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(PlacementError::PlacementConflict {
            attempts: max_attempts,
        })
    }

    /// Matrix code of a committed slot
    pub fn code_of(&self, id: SlotId) -> Result<MatrixCode, PlacementError> {
        let slot = self.store.get(id)?;
        let mut missing = None;
        let code = MatrixCode::encode(&slot, |parent| match self.store.get(parent) {
            Ok(s) => Some(s),
            Err(e) => {
                missing = Some(e);
                None
            }
        });
        match (code, missing) {
            (Ok(code), _) => Ok(code),
            (Err(_), Some(e)) => Err(e.into()),
            (Err(e), None) => Err(e.into()),
        }
    }
}

/// Plan `count` slots for `owner` on `view`, extending the view as it goes
///
/// Deterministic for a given view content: the same snapshot and inputs
/// produce the same parents and positions.
pub fn plan_units(
    view: &mut TreeView,
    owner: &str,
    count: usize,
    explicit: Option<&[Position]>,
    placement_id: Uuid,
) -> Vec<NewSlot> {
    (0..count)
        .map(|i| {
            let position = match explicit {
                Some(positions) => positions[i],
                None => resolve(view.counts_for(owner)),
            };

            let new_slot = match find_available_parent(view, position) {
                Some(parent) => NewSlot::child(owner, parent, position, placement_id),
                None => NewSlot::root(owner, placement_id),
            };
            debug!(
                owner = %owner,
                unit = i,
                position = %position,
                parent = ?new_slot.parent,
                level = new_slot.level,
                "planned slot"
            );

            view.apply(new_slot.clone());
            new_slot
        })
        .collect()
}

fn validate_owner(owner: &str) -> Result<(), PlacementError> {
    if owner.trim().is_empty() || owner.chars().any(char::is_control) {
        return Err(PlacementError::InvalidOwner(owner.to_string()));
    }
    Ok(())
}
