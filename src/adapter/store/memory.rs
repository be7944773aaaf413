//! In-memory store implementation.
//!
//! Keeps one map per segment. Unsegmented stores keep everything under
//! segment 0 and filter by the partitioner when publishing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use parking_lot::RwLock;

use crate::domain::{Characteristic, Characteristics, Entry, Key, SegmentSet};
use crate::error::Result;
use crate::port::partitioner::KeyPartitioner;
use crate::port::store::{EntryStream, InitContext, KeyFilter, NonBlockingStore};

type Segments = HashMap<u32, HashMap<Key, Entry>>;

struct Layout {
    segmented: bool,
    partitioner: Option<Arc<dyn KeyPartitioner>>,
}

/// In-memory store, mainly for tests and as a reference implementation.
pub struct MemoryStore {
    segments: Arc<RwLock<Segments>>,
    layout: Arc<RwLock<Layout>>,
}

impl MemoryStore {
    pub const TYPE: &'static str = "memory";

    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            segments: Arc::new(RwLock::new(HashMap::new())),
            layout: Arc::new(RwLock::new(Layout {
                segmented: true,
                partitioner: None,
            })),
        }
    }

    /// Number of live entries across all segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.read().values().map(HashMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries matching `segments` and `filter`, skipping expired ones.
    fn snapshot(
        segments: &RwLock<Segments>,
        layout: &RwLock<Layout>,
        wanted: &SegmentSet,
        filter: Option<&KeyFilter>,
    ) -> Vec<Entry> {
        let now = Utc::now();
        let layout = layout.read();
        let data = segments.read();
        let in_scope = |segment: u32, key: &Key| -> bool {
            if layout.segmented {
                return wanted.contains(segment);
            }
            match &layout.partitioner {
                Some(partitioner) => wanted.contains(partitioner.segment(key)),
                None => true,
            }
        };
        data.iter()
            .flat_map(|(segment, entries)| entries.values().map(move |e| (*segment, e)))
            .filter(|(segment, e)| in_scope(*segment, &e.key))
            .filter(|(_, e)| !e.metadata.is_expired(now))
            .filter(|(_, e)| filter.map_or(true, |f| f(&e.key)))
            .map(|(_, e)| e.clone())
            .collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NonBlockingStore for MemoryStore {
    fn store_type(&self) -> &str {
        Self::TYPE
    }

    async fn start(&self, ctx: &InitContext) -> Result<()> {
        let mut layout = self.layout.write();
        layout.segmented = ctx.config.segmented;
        layout.partitioner = Some(Arc::clone(&ctx.partitioner));
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    fn characteristics(&self) -> Characteristics {
        Characteristics::of(&[
            Characteristic::BulkRead,
            Characteristic::Segmentable,
            Characteristic::ExpirationAware,
        ])
    }

    async fn load(&self, segment: u32, key: &Key) -> Result<Option<Entry>> {
        let data = self.segments.read();
        Ok(data
            .get(&segment)
            .and_then(|entries| entries.get(key))
            .filter(|e| !e.metadata.is_expired(Utc::now()))
            .cloned())
    }

    async fn write(&self, segment: u32, entry: Entry) -> Result<()> {
        self.segments
            .write()
            .entry(segment)
            .or_default()
            .insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn delete(&self, segment: u32, key: &Key) -> Result<bool> {
        Ok(self
            .segments
            .write()
            .get_mut(&segment)
            .is_some_and(|entries| entries.remove(key).is_some()))
    }

    async fn clear(&self) -> Result<()> {
        self.segments.write().values_mut().for_each(HashMap::clear);
        Ok(())
    }

    fn publish_entries(
        &self,
        segments: &SegmentSet,
        filter: Option<KeyFilter>,
        fetch_value: bool,
    ) -> EntryStream {
        let data = Arc::clone(&self.segments);
        let layout = Arc::clone(&self.layout);
        let wanted = segments.clone();
        stream::once(async move { Self::snapshot(&data, &layout, &wanted, filter.as_ref()) })
            .flat_map(move |entries| {
                stream::iter(entries.into_iter().map(move |e| {
                    Ok(if fetch_value { e } else { e.without_value() })
                }))
            })
            .boxed()
    }

    async fn size(&self, segments: &SegmentSet) -> Result<i64> {
        let count = Self::snapshot(&self.segments, &self.layout, segments, None).len();
        Ok(count as i64)
    }

    fn purge_expired(&self) -> EntryStream {
        let data = Arc::clone(&self.segments);
        stream::once(async move {
            let now = Utc::now();
            let mut purged = Vec::new();
            for entries in data.write().values_mut() {
                entries.retain(|_, e| {
                    if e.metadata.is_expired(now) {
                        purged.push(e.clone());
                        false
                    } else {
                        true
                    }
                });
            }
            purged
        })
        .flat_map(|purged| stream::iter(purged.into_iter().map(Ok)))
        .boxed()
    }

    async fn add_segments(&self, segments: &SegmentSet) -> Result<()> {
        if self.layout.read().segmented {
            let mut data = self.segments.write();
            for segment in segments.iter() {
                data.entry(segment).or_default();
            }
        }
        Ok(())
    }

    async fn remove_segments(&self, segments: &SegmentSet) -> Result<()> {
        if self.layout.read().segmented {
            let mut data = self.segments.write();
            for segment in segments.iter() {
                data.remove(&segment);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Metadata;
    use futures_util::TryStreamExt;

    fn expired(key: &str) -> Entry {
        Entry::new(key, "old")
            .with_metadata(Metadata::default().with_expiry(Utc::now() - chrono::Duration::hours(1)))
    }

    #[tokio::test]
    async fn write_load_delete_round() {
        let store = MemoryStore::new();
        store.write(3, Entry::new("k", "v")).await.unwrap();

        let loaded = store.load(3, &Key::from("k")).await.unwrap().unwrap();
        assert_eq!(loaded.value.unwrap().as_bytes(), b"v");
        assert!(store.load(4, &Key::from("k")).await.unwrap().is_none());

        assert!(store.delete(3, &Key::from("k")).await.unwrap());
        assert!(!store.delete(3, &Key::from("k")).await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn publish_respects_segments_and_filter() {
        let store = MemoryStore::new();
        store.write(0, Entry::new("a", "1")).await.unwrap();
        store.write(1, Entry::new("b", "2")).await.unwrap();
        store.write(1, Entry::new("c", "3")).await.unwrap();

        let only_one: SegmentSet = [1].into_iter().collect();
        let filter: KeyFilter = Arc::new(|k: &Key| k.as_str() != "c");
        let entries: Vec<Entry> = store
            .publish_entries(&only_one, Some(filter), false)
            .try_collect()
            .await
            .unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key.as_str(), "b");
        assert!(entries[0].value.is_none());
    }

    #[tokio::test]
    async fn publishing_is_restartable() {
        let store = MemoryStore::new();
        store.write(0, Entry::new("a", "1")).await.unwrap();
        let all = SegmentSet::range(1);

        let stream = store.publish_keys(&all, None);
        store.write(0, Entry::new("b", "2")).await.unwrap();
        let first: Vec<Key> = stream.try_collect().await.unwrap();
        let second: Vec<Key> = store.publish_keys(&all, None).try_collect().await.unwrap();

        // The snapshot is taken when the stream is first polled.
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
    }

    #[tokio::test]
    async fn purge_expired_removes_and_yields() {
        let store = MemoryStore::new();
        store.write(0, expired("old")).await.unwrap();
        store.write(0, Entry::new("fresh", "v")).await.unwrap();

        assert!(store.load(0, &Key::from("old")).await.unwrap().is_none());
        assert_eq!(store.size(&SegmentSet::range(1)).await.unwrap(), 1);

        let purged: Vec<Entry> = store.purge_expired().try_collect().await.unwrap();
        assert_eq!(purged.len(), 1);
        assert_eq!(purged[0].key.as_str(), "old");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn remove_segments_drops_data() {
        let store = MemoryStore::new();
        store.write(2, Entry::new("k", "v")).await.unwrap();
        store
            .remove_segments(&[2].into_iter().collect())
            .await
            .unwrap();
        assert!(store.is_empty());
    }
}
