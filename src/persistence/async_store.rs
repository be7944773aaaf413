//! Write-behind wrapper for stores configured with `async.enabled`.
//!
//! Modifications are collected in a pending map, newest per key wins, and
//! flushed by a single background batch at a time. While a batch runs, new
//! modifications accumulate into the next one. Reads see queued
//! modifications before falling back to the delegate.
//!
//! Once an availability check finds the delegate down, batches hold before
//! touching it until a later check finds it up again.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, error, trace, warn};

use crate::domain::{group_by_segment, Characteristics, Entry, Key, SegmentGroup, SegmentSet};
use crate::error::{Error, Result};
use crate::infrastructure::config::store::AsyncStoreConfig;
use crate::port::partitioner::KeyPartitioner;
use crate::port::store::{EntryStream, InitContext, KeyFilter, NonBlockingStore, SIZE_UNKNOWN};

#[derive(Debug, Clone)]
enum Modification {
    Put { segment: u32, entry: Entry },
    Remove { segment: u32 },
}

impl Modification {
    fn segment(&self) -> u32 {
        match self {
            Modification::Put { segment, .. } | Modification::Remove { segment } => *segment,
        }
    }
}

/// One generation of queued modifications.
#[derive(Debug, Default)]
struct Batch {
    /// Clear the delegate before applying `modifications`.
    clear: bool,
    modifications: HashMap<Key, Modification>,
}

impl Batch {
    fn is_empty(&self) -> bool {
        !self.clear && self.modifications.is_empty()
    }

    /// What this batch says about `key`: `Some(None)` when it was removed.
    fn find(&self, key: &Key) -> Option<Option<Entry>> {
        match self.modifications.get(key) {
            Some(Modification::Put { entry, .. }) => Some(Some(entry.clone())),
            Some(Modification::Remove { .. }) => Some(None),
            None if self.clear => Some(None),
            None => None,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    pending: Batch,
    replicating: Batch,
    batch_running: bool,
    stopped: bool,
    delegate_down: bool,
}

impl State {
    fn queued(&self) -> usize {
        self.pending.modifications.len() + self.replicating.modifications.len()
    }
}

struct Shared {
    delegate: Arc<dyn NonBlockingStore>,
    config: AsyncStoreConfig,
    attempts: u32,
    retry_delay: Duration,
    segment_count: Mutex<u32>,
    partitioner: Mutex<Option<Arc<dyn KeyPartitioner>>>,
    state: Mutex<State>,
    batch_done: Notify,
    delegate_up: Notify,
}

/// Write-behind store wrapper.
pub struct AsyncStore {
    shared: Arc<Shared>,
}

impl AsyncStore {
    pub fn new(
        delegate: Arc<dyn NonBlockingStore>,
        config: AsyncStoreConfig,
        attempts: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                delegate,
                config,
                attempts: attempts.max(1),
                retry_delay,
                segment_count: Mutex::new(1),
                partitioner: Mutex::new(None),
                state: Mutex::new(State::default()),
                batch_done: Notify::new(),
                delegate_up: Notify::new(),
            }),
        }
    }

    /// The wrapped store.
    #[must_use]
    pub fn delegate(&self) -> &Arc<dyn NonBlockingStore> {
        &self.shared.delegate
    }

    /// Modifications not yet applied to the delegate.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.shared.state.lock().queued()
    }

    /// Wait until every queued modification has been flushed.
    pub async fn flush(&self) {
        loop {
            let notified = {
                let state = self.shared.state.lock();
                if !state.batch_running {
                    return;
                }
                self.shared.batch_done.notified()
            };
            notified.await;
        }
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shared.state.lock().stopped {
            return Err(Error::store(
                self.shared.delegate.store_type(),
                "async store is stopped",
            ));
        }
        Ok(())
    }

    /// Queue a modification; `None` queues a clear.
    async fn submit(&self, modification: Option<(Key, Modification)>) -> Result<()> {
        self.ensure_running()?;
        let (start_batch, waiter) = {
            let mut state = self.shared.state.lock();
            match modification {
                Some((key, modification)) => {
                    state.pending.modifications.insert(key, modification);
                }
                None => {
                    state.pending.modifications.clear();
                    state.pending.clear = true;
                }
            }
            let start_batch = !state.batch_running;
            state.batch_running = true;
            // Registered under the lock so the batch cannot finish unnoticed.
            let waiter = (state.queued() > self.shared.config.modification_queue_size)
                .then(|| self.shared.batch_done.notified());
            (start_batch, waiter)
        };

        if start_batch {
            tokio::spawn(run_batches(Arc::clone(&self.shared)));
        }
        if let Some(waiter) = waiter {
            trace!(
                store = self.shared.delegate.store_type(),
                "Modification queue full, waiting for batch"
            );
            waiter.await;
        }
        Ok(())
    }

    fn queued_value(&self, key: &Key) -> Option<Option<Entry>> {
        let state = self.shared.state.lock();
        state
            .pending
            .find(key)
            .or_else(|| state.replicating.find(key))
    }
}

/// Drain pending modifications until none are left.
async fn run_batches(shared: Arc<Shared>) {
    loop {
        let batch = {
            let mut state = shared.state.lock();
            state.replicating = std::mem::take(&mut state.pending);
            if state.replicating.is_empty() {
                state.batch_running = false;
                drop(state);
                shared.batch_done.notify_waiters();
                return;
            }
            Batch {
                clear: state.replicating.clear,
                modifications: state.replicating.modifications.clone(),
            }
        };

        let store = shared.delegate.store_type().to_string();
        let size = batch.modifications.len();
        let mut outcome = Ok(());
        for attempt in 1..=shared.attempts {
            wait_for_delegate(&shared).await;
            outcome = apply(&shared, &batch).await;
            match &outcome {
                Ok(()) => break,
                Err(e) if attempt < shared.attempts => {
                    warn!(store = %store, attempt, error = %e, "Write-behind batch failed, retrying");
                    tokio::time::sleep(shared.retry_delay).await;
                }
                Err(_) => {}
            }
        }

        shared.state.lock().replicating = Batch::default();
        match outcome {
            Ok(()) => debug!(store = %store, modifications = size, "Write-behind batch flushed"),
            Err(e) if shared.config.fail_silently => {
                warn!(store = %store, modifications = size, error = %e, "Write-behind batch dropped");
            }
            Err(e) => {
                error!(store = %store, modifications = size, error = %e, "Write-behind batch lost");
            }
        }
        shared.batch_done.notify_waiters();
    }
}

/// Hold while the delegate is known to be down, unless `fail_silently`.
async fn wait_for_delegate(shared: &Shared) {
    if shared.config.fail_silently {
        return;
    }
    loop {
        let notified = {
            let state = shared.state.lock();
            if !state.delegate_down || state.stopped {
                return;
            }
            shared.delegate_up.notified()
        };
        trace!(store = shared.delegate.store_type(), "Batch waiting for delegate");
        notified.await;
    }
}

async fn apply(shared: &Shared, batch: &Batch) -> Result<()> {
    let delegate = &shared.delegate;
    if batch.clear {
        delegate.clear().await?;
    }

    let mut puts = Vec::new();
    let mut removes = Vec::new();
    for (key, modification) in &batch.modifications {
        match modification {
            Modification::Put { segment, entry } => puts.push((*segment, entry.clone())),
            Modification::Remove { segment } => removes.push((*segment, key.clone())),
        }
    }

    let segment_count = *shared.segment_count.lock();
    if !removes.is_empty() {
        delegate.bulk_delete(segment_count, regroup(removes)).await?;
    }
    if !puts.is_empty() {
        delegate.bulk_write(segment_count, regroup(puts)).await?;
    }
    Ok(())
}

/// Group items by the segment they were queued with.
fn regroup<T>(items: Vec<(u32, T)>) -> Vec<SegmentGroup<T>> {
    group_by_segment(items, true, |(segment, _)| *segment)
        .into_iter()
        .map(|group| SegmentGroup {
            segment: group.segment,
            items: group.items.into_iter().map(|(_, item)| item).collect(),
        })
        .collect()
}

#[async_trait]
impl NonBlockingStore for AsyncStore {
    fn store_type(&self) -> &str {
        self.shared.delegate.store_type()
    }

    async fn start(&self, ctx: &InitContext) -> Result<()> {
        *self.shared.segment_count.lock() = ctx.effective_segments();
        *self.shared.partitioner.lock() = Some(Arc::clone(&ctx.partitioner));
        self.shared.state.lock().stopped = false;
        self.shared.delegate.start(ctx).await
    }

    async fn stop(&self) -> Result<()> {
        self.flush().await;
        self.shared.state.lock().stopped = true;
        debug!(store = self.store_type(), "Async store quiesced, stopping delegate");
        self.shared.delegate.stop().await
    }

    fn characteristics(&self) -> Characteristics {
        self.shared.delegate.characteristics()
    }

    fn is_local_only(&self) -> bool {
        self.shared.delegate.is_local_only()
    }

    /// Never available once stopped; always available with `fail_silently`.
    /// Otherwise a down delegate is masked until the pending queue is full
    /// while a batch is still replicating.
    async fn is_available(&self) -> bool {
        if self.shared.state.lock().stopped {
            return false;
        }
        if self.shared.config.fail_silently {
            return true;
        }

        let store = self.shared.delegate.store_type();
        if self.shared.delegate.is_available().await {
            let recovered = std::mem::take(&mut self.shared.state.lock().delegate_down);
            if recovered {
                debug!(store = %store, "Write-behind delegate available again");
                self.shared.delegate_up.notify_waiters();
            }
            return true;
        }

        let mut state = self.shared.state.lock();
        if !state.delegate_down {
            state.delegate_down = true;
            debug!(store = %store, "Write-behind delegate unavailable");
        }
        state.pending.modifications.len() < self.shared.config.modification_queue_size
            || state.replicating.is_empty()
    }

    async fn load(&self, segment: u32, key: &Key) -> Result<Option<Entry>> {
        self.ensure_running()?;
        match self.queued_value(key) {
            Some(queued) => Ok(queued),
            None => self.shared.delegate.load(segment, key).await,
        }
    }

    async fn write(&self, segment: u32, entry: Entry) -> Result<()> {
        let key = entry.key.clone();
        self.submit(Some((key, Modification::Put { segment, entry })))
            .await
    }

    /// Always reports `false`: whether the delegate held the key is unknown.
    async fn delete(&self, segment: u32, key: &Key) -> Result<bool> {
        self.submit(Some((key.clone(), Modification::Remove { segment })))
            .await?;
        Ok(false)
    }

    async fn clear(&self) -> Result<()> {
        self.submit(None).await
    }

    fn publish_entries(
        &self,
        segments: &SegmentSet,
        filter: Option<KeyFilter>,
        fetch_value: bool,
    ) -> EntryStream {
        // Snapshot queued state now; the delegate only sees untouched keys.
        let (cleared, queued) = {
            let state = self.shared.state.lock();
            let cleared = state.pending.clear || state.replicating.clear;
            let mut merged = state.replicating.modifications.clone();
            if state.pending.clear {
                merged.clear();
            }
            merged.extend(state.pending.modifications.clone());
            (cleared, merged)
        };

        let partitioner = self.shared.partitioner.lock().clone();
        let in_scope = |segment: u32, key: &Key| match &partitioner {
            Some(p) => segments.contains(p.segment(key)),
            None => segments.contains(segment),
        };
        let touched: HashSet<Key> = queued.keys().cloned().collect();
        let queued_entries: Vec<Result<Entry>> = queued
            .into_values()
            .filter_map(|m| match m {
                Modification::Put { segment, entry } => {
                    in_scope(segment, &entry.key).then_some(entry)
                }
                Modification::Remove { .. } => None,
            })
            .filter(|e| filter.as_ref().map_or(true, |f| f(&e.key)))
            .map(|e| Ok(if fetch_value { e } else { e.without_value() }))
            .collect();

        if cleared {
            return stream::iter(queued_entries).boxed();
        }

        let delegate_filter: KeyFilter = Arc::new(move |key: &Key| {
            !touched.contains(key) && filter.as_ref().map_or(true, |f| f(key))
        });
        stream::iter(queued_entries)
            .chain(
                self.shared
                    .delegate
                    .publish_entries(segments, Some(delegate_filter), fetch_value),
            )
            .boxed()
    }

    async fn size(&self, segments: &SegmentSet) -> Result<i64> {
        if self.queued() > 0 {
            return Ok(SIZE_UNKNOWN);
        }
        self.shared.delegate.size(segments).await
    }

    fn purge_expired(&self) -> EntryStream {
        self.shared.delegate.purge_expired()
    }

    async fn add_segments(&self, segments: &SegmentSet) -> Result<()> {
        self.shared.delegate.add_segments(segments).await
    }

    async fn remove_segments(&self, segments: &SegmentSet) -> Result<()> {
        self.shared
            .state
            .lock()
            .pending
            .modifications
            .retain(|_, m| !segments.contains(m.segment()));
        self.shared.delegate.remove_segments(segments).await
    }
}
