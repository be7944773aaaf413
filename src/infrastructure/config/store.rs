//! Per-store configuration.

use std::path::PathBuf;

use serde::Deserialize;

/// Write-behind settings for a store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AsyncStoreConfig {
    /// Wrap the store in a write-behind queue.
    #[serde(default)]
    pub enabled: bool,
    /// Pending modifications allowed before writers wait for the running batch.
    #[serde(default = "default_modification_queue_size")]
    pub modification_queue_size: usize,
    /// Report the store as available while the delegate is down, as long as
    /// the queue has room.
    #[serde(default)]
    pub fail_silently: bool,
}

const fn default_modification_queue_size() -> usize {
    1024
}

impl Default for AsyncStoreConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            modification_queue_size: default_modification_queue_size(),
            fail_silently: false,
        }
    }
}

/// Configuration of a single backing store.
///
/// Stores are started and consulted in the order they are declared.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreConfig {
    /// Factory key, e.g. `"memory"` or `"file"`.
    #[serde(rename = "type")]
    pub store_type: String,
    /// Address the store with real segment ids.
    #[serde(default = "default_true")]
    pub segmented: bool,
    /// The store is shared between cluster nodes.
    #[serde(default)]
    pub shared: bool,
    /// Populate memory from this store on startup.
    #[serde(default)]
    pub preload: bool,
    /// Clear the store once it has started.
    #[serde(default)]
    pub purge_on_startup: bool,
    /// Never write to this store.
    #[serde(default, alias = "read_only")]
    pub ignore_modifications: bool,
    /// Never read from this store.
    #[serde(default)]
    pub write_only: bool,
    /// Skip this store for loads that did not originate locally.
    #[serde(default)]
    pub local_only: bool,
    /// Filesystem location for file-backed stores.
    #[serde(default)]
    pub location: Option<PathBuf>,
    #[serde(default, rename = "async")]
    pub async_config: AsyncStoreConfig,
}

fn default_true() -> bool {
    true
}

impl StoreConfig {
    /// A synchronous, segmented, private store of the given type.
    pub fn new(store_type: impl Into<String>) -> Self {
        Self {
            store_type: store_type.into(),
            segmented: true,
            shared: false,
            preload: false,
            purge_on_startup: false,
            ignore_modifications: false,
            write_only: false,
            local_only: false,
            location: None,
            async_config: AsyncStoreConfig::default(),
        }
    }

    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.ignore_modifications = true;
        self
    }

    #[must_use]
    pub fn write_only(mut self) -> Self {
        self.write_only = true;
        self
    }

    #[must_use]
    pub fn shared(mut self) -> Self {
        self.shared = true;
        self
    }

    #[must_use]
    pub fn preload(mut self) -> Self {
        self.preload = true;
        self
    }

    #[must_use]
    pub fn unsegmented(mut self) -> Self {
        self.segmented = false;
        self
    }

    #[must_use]
    pub fn purge_on_startup(mut self) -> Self {
        self.purge_on_startup = true;
        self
    }

    #[must_use]
    pub fn local_only(mut self) -> Self {
        self.local_only = true;
        self
    }

    #[must_use]
    pub fn with_location(mut self, location: impl Into<PathBuf>) -> Self {
        self.location = Some(location.into());
        self
    }

    #[must_use]
    pub fn asynchronous(mut self, modification_queue_size: usize) -> Self {
        self.async_config.enabled = true;
        self.async_config.modification_queue_size = modification_queue_size;
        self
    }
}
