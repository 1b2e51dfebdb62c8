//! Configuration for the Shepherd data layer.
//!
//! All fields are required; `validate()` rejects values that would disable
//! a subsystem by accident (zero timeouts, empty cache).

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration surface for the data-access layer.
///
/// Durations are carried as milliseconds so the struct stays plain-serde
/// and TOML-friendly; accessor methods hand out `Duration`s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataLayerConfig {
    /// Maximum probe retries before `initialize` fails fatally.
    pub max_retries: u32,
    /// Base delay for exponential backoff; attempt n waits `retry_delay * 2^n`.
    pub retry_delay_ms: u64,
    /// Hard ceiling on total time spent inside `initialize`.
    pub connection_timeout_ms: u64,
    /// Random jitter added to each backoff delay (0 disables).
    pub backoff_jitter_ms: u64,
    /// LRU capacity of the query cache.
    pub cache_max_entries: usize,
    /// Default TTL for cache entries that do not specify one.
    pub cache_default_ttl_ms: u64,
    /// Age past which a live cache entry is reported stale
    /// (stale-while-revalidate threshold). Must not exceed the TTL.
    pub stale_time_ms: u64,
    /// Whether reading an entry slides its insertion time forward.
    pub touch_on_read: bool,
}

impl Default for DataLayerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1_000,
            connection_timeout_ms: 30_000,
            backoff_jitter_ms: 0,
            cache_max_entries: 500,
            cache_default_ttl_ms: 300_000, // 5 minutes
            stale_time_ms: 60_000,
            touch_on_read: false,
        }
    }
}

impl DataLayerConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn cache_default_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_default_ttl_ms)
    }

    pub fn stale_time(&self) -> Duration {
        Duration::from_millis(self.stale_time_ms)
    }

    /// Load from a TOML file and validate.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: DataLayerConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry_delay_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retry_delay_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.connection_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "connection_timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.cache_max_entries == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache_max_entries",
                reason: "must be > 0".to_string(),
            });
        }
        if self.cache_default_ttl_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache_default_ttl_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.stale_time_ms > self.cache_default_ttl_ms {
            return Err(ConfigError::InvalidValue {
                field: "stale_time_ms",
                reason: "must not exceed cache_default_ttl_ms".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

// =============================================================================
// TESTS
// =============================================================================
