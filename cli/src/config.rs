//! Config loading for the CLI
//!
//! Precedence: built-in defaults < TOML file < environment < flags.
//! File and environment prices are in kobo, like `PlacementConfig`.

use anyhow::{Context, Result};
use matrix_placement_core::PlacementConfig;
use std::fs;
use std::path::Path;

pub const SLOT_PRICE_ENV: &str = "MATRIX_SLOT_PRICE";
pub const TOKEN_RATE_ENV: &str = "MATRIX_TOKEN_RATE";

/// Read a TOML config file; missing keys fall back to defaults
pub fn load_file(path: &Path) -> Result<PlacementConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    parse(&raw).with_context(|| format!("parsing config {}", path.display()))
}

pub fn parse(raw: &str) -> Result<PlacementConfig> {
    let config: PlacementConfig = toml::from_str(raw)?;
    Ok(config)
}

/// Apply environment overrides read through `lookup`
pub fn apply_env<F>(config: &mut PlacementConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(SLOT_PRICE_ENV) {
        config.slot_price = raw
            .trim()
            .parse()
            .with_context(|| format!("{} is not an integer: {:?}", SLOT_PRICE_ENV, raw))?;
    }
    if let Some(raw) = lookup(TOKEN_RATE_ENV) {
        config.token_rate = raw
            .trim()
            .parse()
            .with_context(|| format!("{} is not a number: {:?}", TOKEN_RATE_ENV, raw))?;
    }
    Ok(())
}

/// Defaults, then file, then process environment
pub fn resolve(path: Option<&Path>) -> Result<PlacementConfig> {
    let mut config = match path {
        Some(path) => load_file(path)?,
        None => PlacementConfig::default(),
    };
    apply_env(&mut config, |key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_partial_toml() {
        let config = parse("slot_price = 5000\nmax_attempts = 3\n").unwrap();
        assert_eq!(config.slot_price, 5000);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.token_rate, PlacementConfig::default().token_rate);
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = parse("slot_price = 5000").unwrap();
        let env: HashMap<&str, &str> = [(SLOT_PRICE_ENV, "2500"), (TOKEN_RATE_ENV, "0.01")].into();
        apply_env(&mut config, |k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.slot_price, 2500);
        assert_eq!(config.token_rate, 0.01);
    }

    #[test]
    fn test_bad_env_value_is_reported() {
        let mut config = PlacementConfig::default();
        let err = apply_env(&mut config, |k| (k == SLOT_PRICE_ENV).then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains(SLOT_PRICE_ENV));
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matrix.toml");
        fs::write(&path, "token_rate = 0.5\n").unwrap();

        let config = load_file(&path).unwrap();
        assert_eq!(config.token_rate, 0.5);
    }
}
