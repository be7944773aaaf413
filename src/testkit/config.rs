//! Canonical test configurations.
//!
//! Single source of truth for config structs used across tests.

use crate::infrastructure::config::{PersistenceConfig, StoreConfig};

/// Segment count used by test configs. Small enough to enumerate.
pub const SEGMENTS: u32 = 4;

/// Persistence config without stores: four segments, no availability
/// monitor and three write-behind attempts.
pub fn persistence() -> PersistenceConfig {
    PersistenceConfig {
        num_segments: SEGMENTS,
        availability_interval_ms: 0,
        connection_attempts: 3,
        ..PersistenceConfig::default()
    }
}

/// [`persistence`] with `stores` in declared order.
pub fn persistence_with(stores: impl IntoIterator<Item = StoreConfig>) -> PersistenceConfig {
    stores
        .into_iter()
        .fold(persistence(), PersistenceConfig::with_store)
}

/// A store config for a read-only store.
pub fn read_only(store_type: &str) -> StoreConfig {
    StoreConfig::new(store_type).read_only()
}

/// A write-behind store with a small queue.
pub fn write_behind(store_type: &str, queue: usize) -> StoreConfig {
    StoreConfig::new(store_type).asynchronous(queue)
}
