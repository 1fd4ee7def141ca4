//! Matrix position codes
//!
//! A code names where a slot sits: level letters followed by the slot's
//! 1-based breadth-first index within that level, e.g. `A1` for the root and
//! `C3` for the left child of the root's right child.
//!
//! - Letters are bijective base-26: `A`..`Z`, then `AA`, `AB`, ...
//! - The index is the heap index derived from the path from the root
//!   (left = 0, right = 1), so it never changes as the tree grows.
//!
//! Codes are for reporting only and never feed placement decisions.

use crate::models::{Position, Slot, SlotId};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Deepest level whose in-level index fits the code's integer range
pub const MAX_ENCODED_LEVEL: u32 = 128;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodeError {
    #[error("Level {0} exceeds the maximum encodable depth of {MAX_ENCODED_LEVEL}")]
    DepthExceeded(u32),

    #[error("Ancestor {0} is missing from the tree")]
    MissingAncestor(SlotId),

    #[error("Slot {id} claims level {level} but its root path has {path} steps")]
    InconsistentLevel { id: SlotId, level: u32, path: u32 },

    #[error("Malformed matrix code '{0}'")]
    Malformed(String),
}

/// Level + in-level index of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MatrixCode {
    level: u32,
    index: u128,
}

impl MatrixCode {
    /// Build a code from raw parts, checking the index fits the level
    pub fn new(level: u32, index: u128) -> Result<Self, CodeError> {
        if level == 0 || index == 0 {
            return Err(CodeError::Malformed(format!("level {} index {}", level, index)));
        }
        if level > MAX_ENCODED_LEVEL {
            return Err(CodeError::DepthExceeded(level));
        }
        let width = 1u128 << (level - 1);
        if index > width {
            return Err(CodeError::Malformed(format!(
                "index {} outside level {} (width {})",
                index, level, width
            )));
        }
        Ok(Self { level, index })
    }

    /// Encode `slot`, walking its ancestors through `lookup`
    ///
    /// # Example
    /// ```
    /// use matrix_placement_core::models::{NewSlot, Position};
    /// use matrix_placement_core::placement::code::MatrixCode;
    /// use uuid::Uuid;
    ///
    /// let root = NewSlot::root("A", Uuid::new_v4()).into_slot(0);
    /// let right = NewSlot::child("B", &root, Position::Right, Uuid::new_v4()).into_slot(1);
    ///
    /// let code = MatrixCode::encode(&right, |id| (id == root.id()).then(|| root.clone())).unwrap();
    /// assert_eq!(code.to_string(), "B2");
    /// ```
    pub fn encode<F>(slot: &Slot, mut lookup: F) -> Result<Self, CodeError>
    where
        F: FnMut(SlotId) -> Option<Slot>,
    {
        if slot.level() > MAX_ENCODED_LEVEL {
            return Err(CodeError::DepthExceeded(slot.level()));
        }

        let mut offset: u128 = 0;
        let mut steps: u32 = 0;
        let mut position = slot.position();
        let mut parent = slot.parent();

        while let Some(parent_id) = parent {
            if steps + 1 >= slot.level() {
                return Err(CodeError::InconsistentLevel {
                    id: slot.id(),
                    level: slot.level(),
                    path: steps + 1,
                });
            }
            if position == Some(Position::Right) {
                offset |= 1u128 << steps;
            }
            steps += 1;

            let ancestor = lookup(parent_id).ok_or(CodeError::MissingAncestor(parent_id))?;
            position = ancestor.position();
            parent = ancestor.parent();
        }

        if steps + 1 != slot.level() {
            return Err(CodeError::InconsistentLevel {
                id: slot.id(),
                level: slot.level(),
                path: steps,
            });
        }

        Ok(Self {
            level: slot.level(),
            index: offset + 1,
        })
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    /// 1-based index within the level
    pub fn index(&self) -> u128 {
        self.index
    }

    /// Bijective base-26 letters for a level
    pub fn level_letters(level: u32) -> String {
        let mut n = level;
        let mut letters = Vec::new();
        while n > 0 {
            n -= 1;
            letters.push(b'A' + (n % 26) as u8);
            n /= 26;
        }
        letters.reverse();
        String::from_utf8(letters).unwrap_or_default()
    }

    fn parse_letters(letters: &str) -> Option<u32> {
        letters.bytes().try_fold(0u32, |acc, b| {
            if b.is_ascii_uppercase() {
                acc.checked_mul(26)?.checked_add((b - b'A') as u32 + 1)
            } else {
                None
            }
        })
    }
}

impl fmt::Display for MatrixCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", Self::level_letters(self.level), self.index)
    }
}

impl FromStr for MatrixCode {
    type Err = CodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let split_at = s
            .find(|c: char| c.is_ascii_digit())
            .ok_or_else(|| CodeError::Malformed(s.to_string()))?;
        let (letters, digits) = s.split_at(split_at);

        if letters.is_empty() {
            return Err(CodeError::Malformed(s.to_string()));
        }
        let level = Self::parse_letters(letters).ok_or_else(|| CodeError::Malformed(s.to_string()))?;
        let index = digits
            .parse::<u128>()
            .map_err(|_| CodeError::Malformed(s.to_string()))?;

        Self::new(level, index)
    }
}

impl Serialize for MatrixCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MatrixCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
