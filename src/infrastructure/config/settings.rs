//! Persistence configuration loading and validation.
//!
//! Provides the main [`PersistenceConfig`] struct that aggregates the global
//! persistence settings and the ordered list of stores.
//!
//! # Example
//!
//! ```no_run
//! use cache_persistence::infrastructure::config::settings::PersistenceConfig;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PersistenceConfig::load("persistence.toml")?;
//!     config.init_logging();
//!     Ok(())
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use super::logging::LoggingConfig;
use super::store::StoreConfig;
use crate::error::{ConfigError, Result};

/// Global persistence configuration.
///
/// Load from a TOML file using [`PersistenceConfig::load`] or parse directly
/// with [`PersistenceConfig::parse_toml`].
#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Number of keyspace segments.
    #[serde(default = "default_num_segments")]
    pub num_segments: u32,

    /// Interval between store availability polls (milliseconds).
    ///
    /// Zero disables the availability monitor.
    #[serde(default = "default_availability_interval_ms")]
    pub availability_interval_ms: u64,

    /// Attempts made by write-behind stores before a batch fails.
    #[serde(default = "default_connection_attempts")]
    pub connection_attempts: u32,

    /// Memory eviction bound. `None` means eviction is disabled.
    #[serde(default)]
    pub eviction_max_count: Option<u64>,

    /// The cache is transactional; preload wraps each insert in a transaction.
    #[serde(default)]
    pub transactional: bool,

    /// Indexes are held in memory only and must be rebuilt by preload.
    #[serde(default)]
    pub volatile_indexing: bool,

    /// Clear every store before stopping it.
    #[serde(default)]
    pub clear_on_stop: bool,

    /// Logging and tracing configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Stores in routing order.
    #[serde(default, rename = "store")]
    pub stores: Vec<StoreConfig>,
}

const fn default_num_segments() -> u32 {
    256
}

const fn default_availability_interval_ms() -> u64 {
    1000
}

const fn default_connection_attempts() -> u32 {
    10
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            num_segments: default_num_segments(),
            availability_interval_ms: default_availability_interval_ms(),
            connection_attempts: default_connection_attempts(),
            eviction_max_count: None,
            transactional: false,
            volatile_indexing: false,
            clear_on_stop: false,
            logging: LoggingConfig::default(),
            stores: Vec::new(),
        }
    }
}

impl PersistenceConfig {
    /// Parse configuration from TOML content.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML content is malformed or validation fails.
    pub fn parse_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read
    /// - The TOML content is malformed
    /// - Validation fails
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::parse_toml(&content)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.num_segments == 0 {
            return Err(ConfigError::InvalidValue {
                field: "num_segments",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        if self.connection_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "connection_attempts",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        if self.eviction_max_count == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "eviction_max_count",
                reason: "must be greater than 0 when set".to_string(),
            }
            .into());
        }

        for store in &self.stores {
            if store.store_type.trim().is_empty() {
                return Err(ConfigError::MissingField { field: "type" }.into());
            }
            if store.ignore_modifications && store.write_only {
                return Err(ConfigError::InvalidValue {
                    field: "write_only",
                    reason: format!(
                        "store '{}' cannot be both read-only and write-only",
                        store.store_type
                    ),
                }
                .into());
            }
            if store.async_config.enabled && store.async_config.modification_queue_size == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "modification_queue_size",
                    reason: "must be greater than 0".to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// True when at least one store is configured.
    #[must_use]
    pub fn using_stores(&self) -> bool {
        !self.stores.is_empty()
    }

    /// Availability poll interval, if the monitor is enabled.
    #[must_use]
    pub fn availability_interval(&self) -> Option<Duration> {
        (self.availability_interval_ms > 0)
            .then(|| Duration::from_millis(self.availability_interval_ms))
    }

    /// Append a store to the routing order.
    #[must_use]
    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.stores.push(store);
        self
    }

    /// Initialize logging with the configured settings.
    pub fn init_logging(&self) {
        self.logging.init();
    }
}
