//! Mock [`NonBlockingStore`] with failure injection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;

use crate::domain::{Characteristic, Characteristics, Entry, Key, SegmentSet};
use crate::error::{Error, Result};
use crate::port::store::{EntryStream, InitContext, KeyFilter, NonBlockingStore};

/// Call counters, shared so they can be read after the store is moved.
#[derive(Debug, Default)]
pub struct StoreCalls {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub loads: AtomicUsize,
    pub writes: AtomicUsize,
    pub deletes: AtomicUsize,
    pub clears: AtomicUsize,
    pub availability_checks: AtomicUsize,
}

impl StoreCalls {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// A store with scripted behavior.
///
/// Entries live in a map keyed by key; the segment they were written with is
/// kept for publishing. Failures are injected per call kind.
pub struct ScriptedStore {
    store_type: String,
    characteristics: Characteristics,
    local_only: bool,
    latency: Option<Duration>,
    entries: Arc<Mutex<HashMap<Key, (u32, Entry)>>>,
    history: Mutex<Vec<Entry>>,
    available: AtomicBool,
    fail_start: AtomicBool,
    fail_writes: AtomicU32,
    fail_deletes: AtomicU32,
    fail_clear: AtomicBool,
    calls: Arc<StoreCalls>,
}

impl ScriptedStore {
    /// A healthy bulk-readable, segmentable store.
    pub fn new(store_type: impl Into<String>) -> Self {
        Self {
            store_type: store_type.into(),
            characteristics: Characteristics::of(&[
                Characteristic::BulkRead,
                Characteristic::Segmentable,
            ]),
            local_only: false,
            latency: None,
            entries: Arc::new(Mutex::new(HashMap::new())),
            history: Mutex::new(Vec::new()),
            available: AtomicBool::new(true),
            fail_start: AtomicBool::new(false),
            fail_writes: AtomicU32::new(0),
            fail_deletes: AtomicU32::new(0),
            fail_clear: AtomicBool::new(false),
            calls: Arc::new(StoreCalls::default()),
        }
    }

    pub fn with_characteristics(mut self, characteristics: &[Characteristic]) -> Self {
        self.characteristics = Characteristics::of(characteristics);
        self
    }

    /// Delay every load, write, delete and clear.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn local_only(mut self) -> Self {
        self.local_only = true;
        self
    }

    pub fn failing_start(self) -> Self {
        self.fail_start.store(true, Ordering::SeqCst);
        self
    }

    /// Seed an entry without counting a write.
    pub fn with_entry(self, segment: u32, entry: Entry) -> Self {
        self.entries
            .lock()
            .insert(entry.key.clone(), (segment, entry));
        self
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Fail the next `n` writes.
    pub fn fail_next_writes(&self, n: u32) {
        self.fail_writes.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` deletes.
    pub fn fail_next_deletes(&self, n: u32) {
        self.fail_deletes.store(n, Ordering::SeqCst);
    }

    pub fn fail_clear(&self, fail: bool) {
        self.fail_clear.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Arc<StoreCalls> {
        Arc::clone(&self.calls)
    }

    pub fn entry_count(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn get(&self, key: &str) -> Option<Entry> {
        self.entries
            .lock()
            .get(&Key::from(key))
            .map(|(_, e)| e.clone())
    }

    /// Segment the key was last written with.
    pub fn segment_of(&self, key: &str) -> Option<u32> {
        self.entries.lock().get(&Key::from(key)).map(|(s, _)| *s)
    }

    /// Every entry written, in order.
    pub fn history(&self) -> Vec<Entry> {
        self.history.lock().clone()
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl NonBlockingStore for ScriptedStore {
    fn store_type(&self) -> &str {
        &self.store_type
    }

    async fn start(&self, _ctx: &InitContext) -> Result<()> {
        self.calls.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(Error::store(&self.store_type, "scripted start failure"));
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.calls.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn characteristics(&self) -> Characteristics {
        self.characteristics
    }

    fn is_local_only(&self) -> bool {
        self.local_only
    }

    async fn is_available(&self) -> bool {
        self.calls.availability_checks.fetch_add(1, Ordering::SeqCst);
        self.available.load(Ordering::SeqCst)
    }

    async fn load(&self, _segment: u32, key: &Key) -> Result<Option<Entry>> {
        self.calls.loads.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        Ok(self.entries.lock().get(key).map(|(_, e)| e.clone()))
    }

    async fn write(&self, segment: u32, entry: Entry) -> Result<()> {
        self.calls.writes.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        if Self::take_failure(&self.fail_writes) {
            return Err(Error::store(&self.store_type, "scripted write failure"));
        }
        self.history.lock().push(entry.clone());
        self.entries
            .lock()
            .insert(entry.key.clone(), (segment, entry));
        Ok(())
    }

    async fn delete(&self, _segment: u32, key: &Key) -> Result<bool> {
        self.calls.deletes.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        if Self::take_failure(&self.fail_deletes) {
            return Err(Error::store(&self.store_type, "scripted delete failure"));
        }
        Ok(self.entries.lock().remove(key).is_some())
    }

    async fn clear(&self) -> Result<()> {
        self.calls.clears.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        if self.fail_clear.load(Ordering::SeqCst) {
            return Err(Error::store(&self.store_type, "scripted clear failure"));
        }
        self.entries.lock().clear();
        Ok(())
    }

    fn publish_entries(
        &self,
        segments: &SegmentSet,
        filter: Option<KeyFilter>,
        fetch_value: bool,
    ) -> EntryStream {
        let entries = Arc::clone(&self.entries);
        let segments = segments.clone();
        let segmented = self.characteristics.contains(Characteristic::Segmentable);
        stream::once(async move {
            let mut matching: Vec<Entry> = entries
                .lock()
                .values()
                .filter(|(segment, _)| !segmented || segments.contains(*segment))
                .map(|(_, e)| e)
                .filter(|e| filter.as_ref().map_or(true, |f| f(&e.key)))
                .map(|e| if fetch_value { e.clone() } else { e.without_value() })
                .collect();
            matching.sort_by(|a, b| a.key.cmp(&b.key));
            matching
        })
        .flat_map(|entries| stream::iter(entries.into_iter().map(Ok)))
        .boxed()
    }

    fn purge_expired(&self) -> EntryStream {
        let entries = Arc::clone(&self.entries);
        stream::once(async move {
            let now = Utc::now();
            let mut purged = Vec::new();
            entries.lock().retain(|_, (_, e)| {
                let expired = e.metadata.is_expired(now);
                if expired {
                    purged.push(e.clone());
                }
                !expired
            });
            purged
        })
        .flat_map(|purged| stream::iter(purged.into_iter().map(Ok)))
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::TryStreamExt;

    #[tokio::test]
    async fn injected_write_failures_are_consumed() {
        let store = ScriptedStore::new("s");
        store.fail_next_writes(1);
        assert!(store.write(0, Entry::new("k", "v")).await.is_err());
        assert!(store.write(0, Entry::new("k", "v")).await.is_ok());
        assert_eq!(StoreCalls::get(&store.calls().writes), 2);
        assert_eq!(store.history().len(), 1);
    }

    #[tokio::test]
    async fn publishes_seeded_entries_in_key_order() {
        let store = ScriptedStore::new("s")
            .with_entry(1, Entry::new("b", "2"))
            .with_entry(1, Entry::new("a", "1"))
            .with_entry(2, Entry::new("c", "3"));
        let keys: Vec<Key> = store
            .publish_keys(&[1].into_iter().collect(), None)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(keys, vec![Key::from("a"), Key::from("b")]);
    }
}
