//! Configuration types.

use crate::error::ConfigError;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Trailing history window consulted by the rotation resolver, in days.
    /// The window is half-open: `[as_of - lookback_days, as_of)`.
    pub lookback_days: u32,
    /// How many times the batch driver retries a pass that lost a
    /// concurrent-generation race.
    pub conflict_retries: u32,
    /// Whether the batch driver runs independent domains concurrently.
    pub parallel_domains: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lookback_days: 30,
            conflict_retries: 1,
            parallel_domains: true,
        }
    }
}

impl EngineConfig {
    /// Defaults with overrides from `ROTA_LOOKBACK_DAYS` and
    /// `ROTA_CONFLICT_RETRIES`. Unset variables keep the default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var("ROTA_LOOKBACK_DAYS") {
            config.lookback_days = parse_env_u32("ROTA_LOOKBACK_DAYS", &raw)?;
        }
        if let Ok(raw) = std::env::var("ROTA_CONFLICT_RETRIES") {
            config.conflict_retries = parse_env_u32("ROTA_CONFLICT_RETRIES", &raw)?;
        }
        Ok(config)
    }
}

fn parse_env_u32(key: &str, raw: &str) -> Result<u32, ConfigError> {
    raw.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("'{raw}' is not a whole number"),
    })
}
