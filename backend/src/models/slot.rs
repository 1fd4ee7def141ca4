//! Slot model
//!
//! A slot is one node of the shared binary matrix. Each slot has:
//! - Owner identity (many slots may share an owner)
//! - Position relative to its parent (`None` for the root)
//! - Parent link and up to one child per position
//! - Level (root = 1, otherwise parent level + 1)
//! - Store-assigned insertion sequence used for every ordering decision
//!
//! Slots live in an id-addressed arena inside the tree store. Parent and
//! child references are plain ids, never owning pointers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Unique slot identifier (UUID v4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotId(Uuid);

impl SlotId {
    pub fn new() -> Self {
        SlotId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        SlotId(Uuid::from_bytes(bytes))
    }
}

impl Default for SlotId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for SlotId {
    fn from(id: Uuid) -> Self {
        SlotId(id)
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SlotId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(SlotId)
    }
}

/// Side of the parent a slot hangs from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Left,
    Right,
}

impl Position {
    pub fn as_str(&self) -> &'static str {
        match self {
            Position::Left => "left",
            Position::Right => "right",
        }
    }

    pub(crate) fn as_byte(&self) -> u8 {
        match self {
            Position::Left => b'L',
            Position::Right => b'R',
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
#[error("Unknown position '{0}': expected 'left' or 'right'")]
pub struct ParsePositionError(pub String);

impl FromStr for Position {
    type Err = ParsePositionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" | "l" => Ok(Position::Left),
            "right" | "r" => Ok(Position::Right),
            _ => Err(ParsePositionError(s.to_string())),
        }
    }
}

/// Child links of a slot, at most one per position
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Children {
    pub left: Option<SlotId>,
    pub right: Option<SlotId>,
}

impl Children {
    pub fn get(&self, position: Position) -> Option<SlotId> {
        match position {
            Position::Left => self.left,
            Position::Right => self.right,
        }
    }

    pub fn is_free(&self, position: Position) -> bool {
        self.get(position).is_none()
    }

    pub(crate) fn set(&mut self, position: Position, child: SlotId) {
        match position {
            Position::Left => self.left = Some(child),
            Position::Right => self.right = Some(child),
        }
    }

    pub fn count(&self) -> usize {
        self.left.is_some() as usize + self.right.is_some() as usize
    }
}

/// A slot that has not been committed to a store yet
///
/// The store validates the parent link and level and assigns `seq`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSlot {
    pub id: SlotId,
    pub owner: String,
    pub position: Option<Position>,
    pub parent: Option<SlotId>,
    pub level: u32,
    pub placement_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl NewSlot {
    /// New root slot (level 1, no parent, no position)
    pub fn root(owner: impl Into<String>, placement_id: Uuid) -> Self {
        Self {
            id: SlotId::new(),
            owner: owner.into(),
            position: None,
            parent: None,
            level: 1,
            placement_id,
            created_at: Utc::now(),
        }
    }

    /// New slot under `parent` at `position`
    pub fn child(
        owner: impl Into<String>,
        parent: &Slot,
        position: Position,
        placement_id: Uuid,
    ) -> Self {
        Self {
            id: SlotId::new(),
            owner: owner.into(),
            position: Some(position),
            parent: Some(parent.id),
            level: parent.level + 1,
            placement_id,
            created_at: Utc::now(),
        }
    }

    /// The `(parent, position)` pair this slot claims, `None` for a root
    pub fn claim(&self) -> Option<(SlotId, Position)> {
        match (self.parent, self.position) {
            (Some(parent), Some(position)) => Some((parent, position)),
            _ => None,
        }
    }

    /// Materialise the committed slot with its store sequence
    pub fn into_slot(self, seq: u64) -> Slot {
        Slot {
            id: self.id,
            seq,
            owner: self.owner,
            position: self.position,
            parent: self.parent,
            children: Children::default(),
            level: self.level,
            placement_id: self.placement_id,
            created_at: self.created_at,
        }
    }
}

/// Node of the binary matrix
///
/// # Example
/// ```
/// use matrix_placement_core::models::{NewSlot, Position};
/// use uuid::Uuid;
///
/// let root = NewSlot::root("0xabc", Uuid::new_v4()).into_slot(0);
/// assert!(root.is_root());
/// assert_eq!(root.level(), 1);
///
/// let child = NewSlot::child("0xdef", &root, Position::Left, Uuid::new_v4()).into_slot(1);
/// assert_eq!(child.level(), 2);
/// assert_eq!(child.parent(), Some(root.id()));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    id: SlotId,

    /// Insertion sequence, strictly increasing in commit order
    seq: u64,

    owner: String,

    /// Side of the parent, `None` for the root
    position: Option<Position>,

    parent: Option<SlotId>,

    #[serde(default)]
    children: Children,

    level: u32,

    /// Purchase that created this slot; shared by every slot of one placement
    placement_id: Uuid,

    created_at: DateTime<Utc>,
}

impl Slot {
    pub fn id(&self) -> SlotId {
        self.id
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn position(&self) -> Option<Position> {
        self.position
    }

    pub fn parent(&self) -> Option<SlotId> {
        self.parent
    }

    pub fn children(&self) -> &Children {
        &self.children
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn placement_id(&self) -> Uuid {
        self.placement_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Whether the child at `position` is still empty
    pub fn has_free(&self, position: Position) -> bool {
        self.children.is_free(position)
    }

    pub(crate) fn link_child(&mut self, position: Position, child: SlotId) {
        self.children.set(position, child);
    }

    pub(crate) fn with_children(mut self, children: Children) -> Self {
        self.children = children;
        self
    }
}
