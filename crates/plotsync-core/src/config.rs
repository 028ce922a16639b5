//! Engine timing policy.
//!
//! All four windows are policy constants rather than correctness-critical
//! values, with one caveat: the echo TTL must exceed the real propagation
//! delay of the store's notification channel, otherwise a context can
//! mistake its own write for a foreign update.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default quiet period after the last mutation before a durable write fires.
pub const DEFAULT_DEBOUNCE_WINDOW_MS: u64 = 500;
/// Default display window for the `saved` status before it decays to `idle`.
pub const DEFAULT_SAVED_DECAY_MS: u64 = 2_000;
/// Default display window for the "synced from elsewhere" flag.
pub const DEFAULT_SYNC_FLAG_WINDOW_MS: u64 = 3_000;
/// Default TTL for recent-write echo entries.
pub const DEFAULT_ECHO_TTL_MS: u64 = 1_000;

/// Timing configuration for a [`crate::engine::RecordEngine`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Quiet period after the last `set` before the debounced write fires.
    pub debounce_window_ms: u64,
    /// How long the `saved` status is displayed before reverting to `idle`.
    pub saved_decay_ms: u64,
    /// How long the sync flag stays raised after accepting a foreign update.
    pub sync_flag_window_ms: u64,
    /// TTL for echo-filter entries. Must outlast notification propagation.
    pub echo_ttl_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce_window_ms: DEFAULT_DEBOUNCE_WINDOW_MS,
            saved_decay_ms: DEFAULT_SAVED_DECAY_MS,
            sync_flag_window_ms: DEFAULT_SYNC_FLAG_WINDOW_MS,
            echo_ttl_ms: DEFAULT_ECHO_TTL_MS,
        }
    }
}

impl EngineConfig {
    /// Parse from a TOML string and validate ranges.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the configured windows are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.debounce_window_ms == 0 {
            return Err(ConfigError::Invalid(
                "debounce_window_ms must be greater than zero".into(),
            ));
        }
        if self.echo_ttl_ms == 0 {
            return Err(ConfigError::Invalid(
                "echo_ttl_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Debounce window as a [`Duration`].
    #[must_use]
    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_window_ms)
    }

    /// `saved` decay window as a [`Duration`].
    #[must_use]
    pub fn saved_decay(&self) -> Duration {
        Duration::from_millis(self.saved_decay_ms)
    }

    /// Sync-flag display window as a [`Duration`].
    #[must_use]
    pub fn sync_flag_window(&self) -> Duration {
        Duration::from_millis(self.sync_flag_window_ms)
    }

    /// Echo-entry TTL as a [`Duration`].
    #[must_use]
    pub fn echo_ttl(&self) -> Duration {
        Duration::from_millis(self.echo_ttl_ms)
    }
}

/// Errors produced while loading or validating an [`EngineConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The TOML input failed to parse.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A window value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy_constants() {
        let config = EngineConfig::default();
        assert_eq!(config.debounce_window(), Duration::from_millis(500));
        assert_eq!(config.saved_decay(), Duration::from_millis(2_000));
        assert_eq!(config.sync_flag_window(), Duration::from_millis(3_000));
        assert_eq!(config.echo_ttl(), Duration::from_millis(1_000));
    }

    #[test]
    fn toml_overrides_single_field() {
        let config = EngineConfig::from_toml_str("debounce_window_ms = 250\n").unwrap();
        assert_eq!(config.debounce_window_ms, 250);
        // Unspecified fields keep their defaults.
        assert_eq!(config.echo_ttl_ms, DEFAULT_ECHO_TTL_MS);
    }

    #[test]
    fn zero_debounce_rejected() {
        let err = EngineConfig::from_toml_str("debounce_window_ms = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn zero_echo_ttl_rejected() {
        let err = EngineConfig::from_toml_str("echo_ttl_ms = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let err = EngineConfig::from_toml_str("debounce_window_ms = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn serde_roundtrip() {
        let config = EngineConfig {
            debounce_window_ms: 100,
            saved_decay_ms: 200,
            sync_flag_window_ms: 300,
            echo_ttl_ms: 400,
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
