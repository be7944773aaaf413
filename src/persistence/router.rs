//! Operation routing.
//!
//! Reads go to the first matching store in declared order. Writes, deletes
//! and clears fan out to every matching store concurrently and fail as a
//! whole if any store fails.

use std::fmt;
use std::sync::Arc;

use futures_util::future::{self, BoxFuture};
use futures_util::stream::{self, StreamExt, TryStreamExt};
use tracing::debug;

use super::status::{StoreHandle, StoreStatus};
use super::PersistenceManager;
use crate::domain::{group_by_segment, Characteristic, Entry, Key, SegmentSet};
use crate::error::{Error, Result};
use crate::infrastructure::config::store::StoreConfig;
use crate::port::store::{EntryStream, KeyFilter, KeyStream, SIZE_UNKNOWN};

/// Caller-supplied store filter, evaluated against each store's configuration.
#[derive(Clone)]
pub struct StorePredicate(Arc<dyn Fn(&StoreConfig) -> bool + Send + Sync>);

impl StorePredicate {
    pub fn new(predicate: impl Fn(&StoreConfig) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(predicate))
    }

    #[must_use]
    pub fn all() -> Self {
        Self::new(|_| true)
    }

    /// Stores not shared with other nodes.
    #[must_use]
    pub fn private() -> Self {
        Self::new(|config| !config.shared)
    }

    #[must_use]
    pub fn shared() -> Self {
        Self::new(|config| config.shared)
    }

    /// Stores flagged for preload.
    #[must_use]
    pub fn preload() -> Self {
        Self::new(|config| config.preload)
    }

    #[must_use]
    pub fn test(&self, config: &StoreConfig) -> bool {
        (self.0)(config)
    }
}

impl Default for StorePredicate {
    fn default() -> Self {
        Self::all()
    }
}

impl fmt::Debug for StorePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StorePredicate")
    }
}

/// Where a load came from and which stores it may consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    /// The load originated on this node. Local-only stores are skipped otherwise.
    pub local_invocation: bool,
    /// When false, only read-only stores are consulted.
    pub include_stores: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            local_invocation: true,
            include_stores: true,
        }
    }
}

impl LoadOptions {
    #[must_use]
    pub fn remote() -> Self {
        Self {
            local_invocation: false,
            ..Self::default()
        }
    }
}

fn allows_load(status: &StoreStatus, options: LoadOptions) -> bool {
    let Some(config) = status.config() else {
        return false;
    };
    let local_only = config.local_only || status.store().is_local_only();
    !status.has(Characteristic::WriteOnly)
        && (options.local_invocation || !local_only)
        && (options.include_stores
            || status.has(Characteristic::ReadOnly)
            || config.ignore_modifications)
}

fn allows_write(status: &StoreStatus, predicate: &StorePredicate) -> bool {
    status
        .config()
        .is_some_and(|config| !status.has(Characteristic::ReadOnly) && predicate.test(config))
}

fn allows_bulk_read(status: &StoreStatus, predicate: &StorePredicate) -> bool {
    status
        .config()
        .is_some_and(|config| status.has(Characteristic::BulkRead) && predicate.test(config))
}

type StoreCall<'a, T> = (String, BoxFuture<'a, Result<T>>);

/// Run per-store calls concurrently; the first failure fails the operation.
async fn fan_out<T>(operation: &'static str, calls: Vec<StoreCall<'_, T>>) -> Result<Vec<T>> {
    let calls = calls.into_iter().map(|(store, call)| async move {
        call.await.map_err(|source| Error::FanOut {
            operation,
            store,
            source: Box::new(source),
        })
    });
    future::try_join_all(calls).await
}

fn store_name(status: &StoreStatus) -> String {
    status.handle.underlying_type().to_string()
}

impl PersistenceManager {
    /// Fail fast while the availability monitor reports a store down.
    pub(crate) fn check_available(&self) -> Result<()> {
        match self.inner.unavailable.read().as_ref() {
            Some(reason) => Err(Error::StoreUnavailable(reason.clone())),
            None => Ok(()),
        }
    }

    /// Load `key`, consulting eligible stores in declared order until one
    /// has it.
    pub async fn load(
        &self,
        segment: u32,
        key: &Key,
        options: LoadOptions,
    ) -> Result<Option<Entry>> {
        self.check_available()?;
        let stores = self.inner.stores.read().await;
        for status in stores.iter().filter(|s| allows_load(s, options)) {
            let found = status.store().load(status.segment_for(segment), key).await?;
            if found.is_some() {
                debug!(store = status.handle.underlying_type(), segment, key = %key, "Loaded from store");
                return Ok(found);
            }
        }
        Ok(None)
    }

    /// Write `entry` to every writable store passing `predicate`.
    pub async fn write_to_all_stores(
        &self,
        segment: u32,
        entry: Entry,
        predicate: StorePredicate,
    ) -> Result<()> {
        self.check_available()?;
        let stores = self.inner.stores.read().await;
        let calls = stores
            .iter()
            .filter(|s| allows_write(s, &predicate))
            .map(|s| (store_name(s), s.store().write(s.segment_for(segment), entry.clone())))
            .collect();
        fan_out("write", calls).await?;
        Ok(())
    }

    /// Delete `key` from every writable store passing `predicate`. Returns
    /// true if any store removed it.
    pub async fn delete_from_all_stores(
        &self,
        segment: u32,
        key: &Key,
        predicate: StorePredicate,
    ) -> Result<bool> {
        self.check_available()?;
        let stores = self.inner.stores.read().await;
        let calls = stores
            .iter()
            .filter(|s| allows_write(s, &predicate))
            .map(|s| (store_name(s), s.store().delete(s.segment_for(segment), key)))
            .collect();
        let removed = fan_out("delete", calls).await?;
        Ok(removed.into_iter().any(|r| r))
    }

    pub async fn clear_all_stores(&self, predicate: StorePredicate) -> Result<()> {
        self.check_available()?;
        let stores = self.inner.stores.read().await;
        let calls = stores
            .iter()
            .filter(|s| allows_write(s, &predicate))
            .map(|s| (store_name(s), s.store().clear()))
            .collect();
        fan_out("clear", calls).await?;
        Ok(())
    }

    /// Write many entries, grouped by segment for segmentable stores.
    pub async fn write_batch(&self, entries: Vec<Entry>, predicate: StorePredicate) -> Result<()> {
        self.check_available()?;
        if entries.is_empty() {
            return Ok(());
        }
        let partitioner = Arc::clone(&self.inner.partitioner);
        let segment_count = self.inner.config.num_segments;
        let stores = self.inner.stores.read().await;
        let calls = stores
            .iter()
            .filter(|s| allows_write(s, &predicate))
            .map(|s| {
                let groups = group_by_segment(
                    entries.clone(),
                    s.has(Characteristic::Segmentable),
                    |e: &Entry| partitioner.segment(&e.key),
                );
                (store_name(s), s.store().bulk_write(segment_count, groups))
            })
            .collect();
        fan_out("bulk_write", calls).await?;
        Ok(())
    }

    /// Delete many keys, grouped by segment for segmentable stores.
    pub async fn delete_batch(&self, keys: Vec<Key>, predicate: StorePredicate) -> Result<()> {
        self.check_available()?;
        if keys.is_empty() {
            return Ok(());
        }
        let partitioner = Arc::clone(&self.inner.partitioner);
        let segment_count = self.inner.config.num_segments;
        let stores = self.inner.stores.read().await;
        let calls = stores
            .iter()
            .filter(|s| allows_write(s, &predicate))
            .map(|s| {
                let groups = group_by_segment(
                    keys.clone(),
                    s.has(Characteristic::Segmentable),
                    |k: &Key| partitioner.segment(k),
                );
                (store_name(s), s.store().bulk_delete(segment_count, groups))
            })
            .collect();
        fan_out("bulk_delete", calls).await?;
        Ok(())
    }

    /// Stream entries from the first bulk-readable store passing `predicate`.
    ///
    /// The store list stays read-locked until the stream is dropped, so a
    /// consumer must not wait on structural changes while holding it.
    pub fn publish_entries(
        &self,
        segments: &SegmentSet,
        filter: Option<KeyFilter>,
        fetch_value: bool,
        predicate: StorePredicate,
    ) -> EntryStream {
        if let Err(e) = self.check_available() {
            return stream::once(future::ready(Err(e))).boxed();
        }
        let inner = Arc::clone(&self.inner);
        let segments = segments.clone();
        stream::once(async move {
            let stores = inner.stores.read().await;
            let source = stores
                .iter()
                .find(|s| allows_bulk_read(s, &predicate))
                .map(|s| s.store().publish_entries(&segments, filter, fetch_value));
            match source {
                Some(entries) => entries
                    .map(move |item| {
                        let _held = &stores;
                        item
                    })
                    .boxed(),
                None => stream::empty().boxed(),
            }
        })
        .flatten()
        .boxed()
    }

    /// Stream keys from the first bulk-readable store passing `predicate`.
    pub fn publish_keys(
        &self,
        segments: &SegmentSet,
        filter: Option<KeyFilter>,
        predicate: StorePredicate,
    ) -> KeyStream {
        if let Err(e) = self.check_available() {
            return stream::once(future::ready(Err(e))).boxed();
        }
        let inner = Arc::clone(&self.inner);
        let segments = segments.clone();
        stream::once(async move {
            let stores = inner.stores.read().await;
            let source = stores
                .iter()
                .find(|s| allows_bulk_read(s, &predicate))
                .map(|s| s.store().publish_keys(&segments, filter));
            match source {
                Some(keys) => keys
                    .map(move |item| {
                        let _held = &stores;
                        item
                    })
                    .boxed(),
                None => stream::empty().boxed(),
            }
        })
        .flatten()
        .boxed()
    }

    /// Entry count of the first bulk-readable store, or [`SIZE_UNKNOWN`].
    pub async fn size(&self, segments: &SegmentSet, predicate: StorePredicate) -> Result<i64> {
        self.check_available()?;
        let stores = self.inner.stores.read().await;
        match stores.iter().find(|s| allows_bulk_read(s, &predicate)) {
            Some(status) => status.store().size(segments).await,
            None => Ok(SIZE_UNKNOWN),
        }
    }

    /// Size over every segment.
    pub async fn size_all(&self, predicate: StorePredicate) -> Result<i64> {
        self.size(&SegmentSet::range(self.inner.config.num_segments), predicate)
            .await
    }

    /// Purge expired entries from expiration-aware stores, handing each to
    /// the container. Returns how many were purged.
    pub async fn purge_expired(&self) -> Result<u64> {
        self.check_available()?;
        let stores = self.inner.stores.read().await;
        let mut purged = 0u64;
        for status in stores
            .iter()
            .filter(|s| s.is_routable() && s.has(Characteristic::ExpirationAware))
        {
            let mut expired = status.store().purge_expired();
            while let Some(entry) = expired.try_next().await? {
                self.inner.container.on_store_expired(entry).await?;
                purged += 1;
            }
        }
        debug!(purged, "Purged expired entries from stores");
        Ok(purged)
    }

    /// Add segments to segmentable stores. Returns false if any store
    /// could not take them, meaning the caller must load them another way.
    pub async fn add_segments(&self, segments: &SegmentSet) -> Result<bool> {
        self.change_segments(segments, true).await
    }

    pub async fn remove_segments(&self, segments: &SegmentSet) -> Result<bool> {
        self.change_segments(segments, false).await
    }

    async fn change_segments(&self, segments: &SegmentSet, add: bool) -> Result<bool> {
        self.check_available()?;
        let stores = self.inner.stores.read().await;
        let routable: Vec<&StoreStatus> = stores.iter().filter(|s| s.is_routable()).collect();
        let all_segmentable = routable.iter().all(|s| s.has(Characteristic::Segmentable));
        let calls = routable
            .iter()
            .filter(|s| s.has(Characteristic::Segmentable))
            .map(|s| {
                let call = if add {
                    s.store().add_segments(segments)
                } else {
                    s.store().remove_segments(segments)
                };
                (store_name(s), call)
            })
            .collect();
        fan_out(if add { "add_segments" } else { "remove_segments" }, calls).await?;
        Ok(all_segmentable)
    }

    /// True when no store accepts writes.
    pub async fn is_read_only(&self) -> bool {
        let stores = self.inner.stores.read().await;
        stores
            .iter()
            .filter(|s| s.is_routable())
            .all(|s| s.has(Characteristic::ReadOnly))
    }

    /// True when at least one store accepts writes.
    pub async fn has_writer(&self) -> bool {
        let stores = self.inner.stores.read().await;
        stores
            .iter()
            .any(|s| s.is_routable() && !s.has(Characteristic::ReadOnly))
    }

    pub async fn has_shared_store(&self) -> bool {
        let stores = self.inner.stores.read().await;
        stores
            .iter()
            .any(|s| s.config().is_some_and(|c| c.shared))
    }

    /// Handles of every store whose underlying type is `store_type`.
    pub async fn stores_of_type(&self, store_type: &str) -> Vec<StoreHandle> {
        let stores = self.inner.stores.read().await;
        stores
            .iter()
            .filter(|s| s.handle.underlying_type() == store_type)
            .map(|s| s.handle.clone())
            .collect()
    }

    /// One line per store: type, wrapping and resolved characteristics.
    pub async fn stores_as_string(&self) -> String {
        let stores = self.inner.stores.read().await;
        stores
            .iter()
            .map(|s| {
                let state = if s.is_routable() { "" } else { " (failed)" };
                format!("{:?} {:?}{}", s.handle, s.characteristics(), state)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
