//! Store port: the contract every backing store implements.
//!
//! Stores are non-blocking: every operation returns a future or a lazy
//! stream, and the persistence layer never waits on a store from a
//! steady-state code path.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};

use crate::domain::{Characteristics, Entry, Key, SegmentGroup, SegmentSet};
use crate::error::Result;
use crate::infrastructure::config::store::StoreConfig;
use crate::port::partitioner::KeyPartitioner;

/// Size reported when a count cannot be produced without iterating.
pub const SIZE_UNKNOWN: i64 = -1;

/// Lazy, finite stream of entries. Each call to a publishing method
/// produces a fresh stream.
pub type EntryStream = BoxStream<'static, Result<Entry>>;

/// Lazy, finite stream of keys.
pub type KeyStream = BoxStream<'static, Result<Key>>;

/// Key predicate applied by stores while publishing.
pub type KeyFilter = Arc<dyn Fn(&Key) -> bool + Send + Sync>;

/// Everything a store needs to start.
#[derive(Clone)]
pub struct InitContext {
    pub config: StoreConfig,
    pub segment_count: u32,
    pub partitioner: Arc<dyn KeyPartitioner>,
}

impl InitContext {
    /// Number of segments this store is addressed with: the cache's
    /// segment count when segmented, otherwise one.
    #[must_use]
    pub fn effective_segments(&self) -> u32 {
        if self.config.segmented {
            self.segment_count
        } else {
            1
        }
    }
}

/// A pluggable backing store.
///
/// Only `load`, `write`, `delete` and `clear` are mandatory. Bulk operations
/// default to per-entry calls; publishing defaults to an empty stream and is
/// only invoked on stores reporting [`Characteristic::BulkRead`].
///
/// [`Characteristic::BulkRead`]: crate::domain::Characteristic::BulkRead
#[async_trait]
pub trait NonBlockingStore: Send + Sync {
    /// Type tag used to find stores when disabling them.
    fn store_type(&self) -> &str;

    async fn start(&self, ctx: &InitContext) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    /// Self-reported capabilities, refined later by configuration.
    fn characteristics(&self) -> Characteristics;

    /// Local-only loaders are skipped for remotely originated loads.
    fn is_local_only(&self) -> bool {
        false
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn load(&self, segment: u32, key: &Key) -> Result<Option<Entry>>;

    async fn write(&self, segment: u32, entry: Entry) -> Result<()>;

    /// Returns whether an entry was actually removed.
    async fn delete(&self, segment: u32, key: &Key) -> Result<bool>;

    async fn clear(&self) -> Result<()>;

    async fn bulk_write(&self, _segment_count: u32, groups: Vec<SegmentGroup<Entry>>) -> Result<()> {
        for group in groups {
            for entry in group.items {
                self.write(group.segment, entry).await?;
            }
        }
        Ok(())
    }

    async fn bulk_delete(&self, _segment_count: u32, groups: Vec<SegmentGroup<Key>>) -> Result<()> {
        for group in groups {
            for key in &group.items {
                self.delete(group.segment, key).await?;
            }
        }
        Ok(())
    }

    fn publish_entries(
        &self,
        _segments: &SegmentSet,
        _filter: Option<KeyFilter>,
        _fetch_value: bool,
    ) -> EntryStream {
        stream::empty().boxed()
    }

    fn publish_keys(&self, segments: &SegmentSet, filter: Option<KeyFilter>) -> KeyStream {
        self.publish_entries(segments, filter, false)
            .map_ok(|entry| entry.key)
            .boxed()
    }

    /// Number of entries in `segments`, or [`SIZE_UNKNOWN`].
    async fn size(&self, segments: &SegmentSet) -> Result<i64> {
        self.publish_keys(segments, None)
            .try_fold(0i64, |count, _| async move { Ok(count + 1) })
            .await
    }

    /// Removes expired entries and yields them.
    fn purge_expired(&self) -> EntryStream {
        stream::empty().boxed()
    }

    async fn add_segments(&self, _segments: &SegmentSet) -> Result<()> {
        Ok(())
    }

    async fn remove_segments(&self, _segments: &SegmentSet) -> Result<()> {
        Ok(())
    }
}
