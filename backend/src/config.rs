//! Engine configuration
//!
//! Defaults mirror the production purchase flow: a slot costs 2000 naira
//! (200_000 kobo) and each leftover naira converts to 0.0015 tokens. Prices
//! are held in minor units; the token rate is per major unit.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const DEFAULT_SLOT_PRICE: i64 = 200_000;
pub const DEFAULT_TOKEN_RATE: f64 = 0.0015;
pub const DEFAULT_MAX_ATTEMPTS: usize = 5;
pub const DEFAULT_MAX_SLOTS_PER_PURCHASE: usize = 10_000;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("slot_price must be positive, got {0}")]
    SlotPrice(i64),

    #[error("token_rate must be finite and non-negative, got {0}")]
    TokenRate(f64),

    #[error("max_attempts must be at least 1")]
    MaxAttempts,

    #[error("max_slots_per_purchase must be at least 1")]
    MaxSlots,

    #[error("Config serialization failed: {0}")]
    Serialization(String),
}

/// Placement engine configuration
///
/// `slot_price` and `token_rate` are defaults; a request may carry its own
/// values (the rate is usually fetched by the caller per purchase).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    /// Price of one slot in minor units
    pub slot_price: i64,

    /// Tokens credited per leftover major currency unit
    pub token_rate: f64,

    /// Plan/commit attempts before giving up with `PlacementConflict`
    pub max_attempts: usize,

    /// Upper bound on slots bought in one purchase
    ///
    /// Caps the size of one atomic commit and of the planning read. Larger
    /// purchases fail with `TooManySlots` before any work; raise the limit
    /// here when bulk purchases are expected.
    pub max_slots_per_purchase: usize,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            slot_price: DEFAULT_SLOT_PRICE,
            token_rate: DEFAULT_TOKEN_RATE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_slots_per_purchase: DEFAULT_MAX_SLOTS_PER_PURCHASE,
        }
    }
}

impl PlacementConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slot_price <= 0 {
            return Err(ConfigError::SlotPrice(self.slot_price));
        }
        if !self.token_rate.is_finite() || self.token_rate < 0.0 {
            return Err(ConfigError::TokenRate(self.token_rate));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::MaxAttempts);
        }
        if self.max_slots_per_purchase == 0 {
            return Err(ConfigError::MaxSlots);
        }
        Ok(())
    }

    /// Fingerprint of the effective configuration
    pub fn hash(&self) -> Result<String, ConfigError> {
        canonical_hash(self)
    }
}

/// SHA-256 (hex) of a value's canonical JSON form
///
/// Object keys are written in sorted order at every depth, so equal values
/// hash equally whatever their map iteration order.
pub fn canonical_hash<T: Serialize>(value: &T) -> Result<String, ConfigError> {
    let value =
        serde_json::to_value(value).map_err(|e| ConfigError::Serialization(e.to_string()))?;

    let mut canonical = String::new();
    write_canonical(&mut canonical, &value);

    Ok(format!("{:x}", Sha256::digest(canonical.as_bytes())))
}

fn write_canonical(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::from(key.as_str()).to_string());
                out.push(':');
                write_canonical(out, item);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
