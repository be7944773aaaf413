//! Overlay masking the gap between eviction and the durable store write.
//!
//! A passivated entry is visible in the overlay from the moment it is
//! handed over until its private-store write settles, whatever the outcome.
//! Reads consult the overlay first and publishing drains a point-in-time
//! overlay snapshot before the store's stream, which is filtered so no key
//! is emitted twice.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use futures_util::stream::{self, StreamExt};
use futures_util::FutureExt;
use tracing::{debug, warn};

use super::{LoadOptions, PersistenceManager, StopListener, StorePredicate};
use crate::domain::{Entry, Key, SegmentSet};
use crate::error::{Error, Result};
use crate::port::store::{EntryStream, KeyFilter, KeyStream, SIZE_UNKNOWN};

type Overlay = DashMap<Key, Entry>;

impl StopListener for Overlay {
    fn persistence_stopped(&self) {
        let dropped = self.len();
        self.clear();
        debug!(dropped, "Passivation overlay cleared on persistence stop");
    }
}

/// Routes passivated entries to private stores through an overlay.
///
/// The overlay is cleared when the [`PersistenceManager`] stops.
#[derive(Clone)]
pub struct PassivationManager {
    persistence: PersistenceManager,
    overlay: Arc<Overlay>,
}

impl PassivationManager {
    #[must_use]
    pub fn new(persistence: PersistenceManager) -> Self {
        let overlay = Arc::new(Overlay::new());
        let listener: Weak<dyn StopListener> = Arc::downgrade(&overlay) as Weak<Overlay>;
        persistence.inner.add_stop_listener(listener);
        Self { persistence, overlay }
    }

    #[must_use]
    pub fn persistence(&self) -> &PersistenceManager {
        &self.persistence
    }

    /// Place `entry` in the overlay and start writing it to every private
    /// store. Must be called from within a tokio runtime.
    ///
    /// The write is issued immediately; the returned future reports its
    /// outcome. The overlay entry is dropped once the write settles, unless
    /// a later passivation of the same key replaced it meanwhile.
    pub fn passivate(&self, entry: Entry, segment: u32) -> BoxFuture<'static, Result<()>> {
        let key = entry.key.clone();
        self.overlay.insert(key.clone(), entry.clone());

        let persistence = self.persistence.clone();
        let overlay = Arc::clone(&self.overlay);
        let write = tokio::spawn(async move {
            let snapshot = entry.clone();
            let result = persistence
                .write_to_all_stores(segment, entry, StorePredicate::private())
                .await;
            overlay.remove_if(&key, |_, current| *current == snapshot);
            match &result {
                Ok(()) => debug!(key = %key, segment, "Passivated entry"),
                Err(e) => warn!(key = %key, segment, error = %e, "Failed to passivate entry"),
            }
            result
        });

        async move {
            write
                .await
                .map_err(|e| Error::store("passivation", e.to_string()))?
        }
        .boxed()
    }

    /// Load `key`, preferring a passivation still in flight.
    pub async fn load(&self, segment: u32, key: &Key, options: LoadOptions) -> Result<Option<Entry>> {
        if let Some(entry) = self.overlay.get(key) {
            return Ok(Some(entry.value().clone()));
        }
        self.persistence.load(segment, key, options).await
    }

    pub fn publish_entries(
        &self,
        segments: &SegmentSet,
        filter: Option<KeyFilter>,
        fetch_value: bool,
        predicate: StorePredicate,
    ) -> EntryStream {
        let snapshot = self.snapshot(segments, filter.as_ref());
        if snapshot.is_empty() {
            return self
                .persistence
                .publish_entries(segments, filter, fetch_value, predicate);
        }
        let delegate =
            self.persistence
                .publish_entries(segments, excluding(&snapshot, filter), fetch_value, predicate);
        let overlay = snapshot.into_iter().map(move |entry| {
            Ok(if fetch_value {
                entry
            } else {
                entry.without_value()
            })
        });
        stream::iter(overlay).chain(delegate).boxed()
    }

    pub fn publish_keys(
        &self,
        segments: &SegmentSet,
        filter: Option<KeyFilter>,
        predicate: StorePredicate,
    ) -> KeyStream {
        let snapshot = self.snapshot(segments, filter.as_ref());
        if snapshot.is_empty() {
            return self.persistence.publish_keys(segments, filter, predicate);
        }
        let delegate = self
            .persistence
            .publish_keys(segments, excluding(&snapshot, filter), predicate);
        let overlay = snapshot.into_iter().map(|entry| Ok(entry.key));
        stream::iter(overlay).chain(delegate).boxed()
    }

    /// Store size, or [`SIZE_UNKNOWN`] while any passivation is in flight.
    pub async fn size(&self, segments: &SegmentSet, predicate: StorePredicate) -> Result<i64> {
        if !self.overlay.is_empty() {
            return Ok(SIZE_UNKNOWN);
        }
        self.persistence.size(segments, predicate).await
    }

    /// Number of passivations still in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.overlay.len()
    }

    pub fn stop(&self) {
        let dropped = self.overlay.len();
        self.overlay.clear();
        debug!(dropped, "Passivation overlay cleared");
    }

    fn snapshot(&self, segments: &SegmentSet, filter: Option<&KeyFilter>) -> Vec<Entry> {
        let partitioner = self.persistence.partitioner();
        let mut entries: Vec<Entry> = self
            .overlay
            .iter()
            .filter(|e| segments.contains(partitioner.segment(e.key())))
            .filter(|e| filter.map_or(true, |f| f(e.key())))
            .map(|e| e.value().clone())
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }
}

/// `filter` further narrowed to keys absent from `snapshot`.
fn excluding(snapshot: &[Entry], filter: Option<KeyFilter>) -> Option<KeyFilter> {
    let emitted: HashSet<Key> = snapshot.iter().map(|e| e.key.clone()).collect();
    Some(Arc::new(move |key: &Key| {
        !emitted.contains(key) && filter.as_ref().map_or(true, |f| f(key))
    }))
}
