//! In-memory data container port.
//!
//! The container and its eviction policy live outside this crate. The
//! persistence layer only needs an atomic per-key inspection primitive,
//! a way to reinsert preloaded entries and a hook for store-side expiry.

use async_trait::async_trait;

use crate::domain::{Entry, Key};
use crate::error::Result;

/// Side effects to suppress when reinserting an entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertFlags {
    /// Apply on this node only.
    pub local_only: bool,
    pub skip_ownership_check: bool,
    pub ignore_return_values: bool,
    /// Do not write the entry back to the stores it came from.
    pub skip_cache_store: bool,
    pub skip_locking: bool,
    /// Do not replicate to backup sites.
    pub skip_backup: bool,
    /// Marks the write as state transfer rather than a user update.
    pub state_insertion: bool,
    pub skip_indexing: bool,
}

impl InsertFlags {
    /// Flags used when reinserting preloaded entries.
    ///
    /// Indexing is skipped unless a shared store is configured and the index
    /// is volatile, in which case the index must be rebuilt from the preload.
    #[must_use]
    pub fn for_preload(has_shared_store: bool, volatile_indexing: bool) -> Self {
        Self {
            local_only: true,
            skip_ownership_check: true,
            ignore_return_values: true,
            skip_cache_store: true,
            skip_locking: true,
            skip_backup: true,
            state_insertion: true,
            skip_indexing: !has_shared_store || !volatile_indexing,
        }
    }
}

#[async_trait]
pub trait DataContainer: Send + Sync {
    /// Run `f` against the in-memory entry for `key` while the container
    /// holds that key's lock, so nothing can replace the entry meanwhile.
    fn compute(&self, key: &Key, f: &mut (dyn FnMut(Option<&Entry>) + Send));

    /// Reinsert an entry, preserving its metadata timestamps.
    async fn insert(&self, entry: Entry, flags: InsertFlags) -> Result<()>;

    /// A store reported `entry` as expired during a purge.
    async fn on_store_expired(&self, entry: Entry) -> Result<()>;
}
