//! Per-key ordering of store updates.
//!
//! A replicated write and a concurrent invalidation of the same key may reach
//! the stores in any order. [`OrderedUpdatesManager`] keeps at most one store
//! mutation in flight per key and drops writes whose version has already been
//! superseded in memory.
//!
//! Tokens are plain map entries, not locks: the map shard is only held while
//! inserting or removing a token, never while a store is being called. The
//! in-memory check and the token insert happen in one container `compute`,
//! so no newer write can slip in between them. Lock order is container key,
//! then token map.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use futures_util::future;
use tokio::sync::watch;
use tracing::{debug, error, trace};

use super::{PersistenceManager, StopListener, StorePredicate};
use crate::domain::{Entry, EntryVersion, Key, VersionOrdering};
use crate::error::{Error, Result};

/// How long to wait for another writer's pending update of the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitPolicy {
    #[default]
    Unbounded,
    /// Give up with [`Error::Timeout`] once the limit elapses.
    Bounded(Duration),
}

struct PendingToken {
    id: u64,
    epoch: u64,
    done: watch::Sender<bool>,
}

/// Outcome of checking a key against memory and its pending token.
enum Step<'a> {
    Absent,
    Resident,
    Stale,
    Violation(VersionOrdering),
    Owner(TokenGuard<'a>),
    Waiting(watch::Receiver<bool>),
}

/// Releases the token on drop so a cancelled owner never strands waiters.
struct TokenGuard<'a> {
    manager: &'a OrderedUpdatesManager,
    key: Key,
    token: Arc<PendingToken>,
    released: bool,
}

impl TokenGuard<'_> {
    fn release(mut self) -> Result<()> {
        self.released = true;
        self.finish()
    }

    fn finish(&self) -> Result<()> {
        let tokens = &self.manager.tokens;
        let removed = tokens
            .pending
            .remove_if(&self.key, |_, current| current.id == self.token.id);
        self.token.done.send_replace(true);

        if removed.is_some() || self.token.epoch != tokens.epoch.load(Ordering::Acquire) {
            return Ok(());
        }
        error!(key = %self.key, token = self.token.id, "Pending update token missing on release");
        Err(Error::Invariant(format!(
            "pending update token {} for key {} was removed by another owner",
            self.token.id, self.key
        )))
    }
}

impl Drop for TokenGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            let _ = self.finish();
        }
    }
}

#[derive(Default)]
struct Tokens {
    pending: DashMap<Key, Arc<PendingToken>>,
    /// Advanced by `clear()`; tokens from an older epoch may vanish freely.
    epoch: AtomicU64,
}

impl Tokens {
    /// Drop every token and wake their waiters.
    fn clear(&self) -> usize {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        let tokens: Vec<Arc<PendingToken>> = self.pending.iter().map(|t| Arc::clone(t.value())).collect();
        self.pending.clear();
        for token in &tokens {
            token.done.send_replace(true);
        }
        tokens.len()
    }
}

impl StopListener for Tokens {
    fn persistence_stopped(&self) {
        let dropped = self.clear();
        debug!(dropped, "Pending update tokens dropped on persistence stop");
    }
}

/// Serializes store mutations per key.
///
/// Stopping the [`PersistenceManager`] it was built on drops every pending
/// token, the same as [`OrderedUpdatesManager::stop`].
pub struct OrderedUpdatesManager {
    persistence: PersistenceManager,
    tokens: Arc<Tokens>,
    next_id: AtomicU64,
}

impl OrderedUpdatesManager {
    #[must_use]
    pub fn new(persistence: PersistenceManager) -> Self {
        let tokens = Arc::new(Tokens::default());
        let listener: Weak<dyn StopListener> = Arc::downgrade(&tokens) as Weak<Tokens>;
        persistence.inner.add_stop_listener(listener);
        Self {
            persistence,
            tokens,
            next_id: AtomicU64::new(0),
        }
    }

    /// Run `store_fn` for `key` unless the in-memory entry shows the update
    /// is no longer wanted.
    ///
    /// The update proceeds when the in-memory entry carries no version, when
    /// `version` is `None`, or when the two versions are equal. It is dropped
    /// when the entry is gone or its version is newer. Any other relation is
    /// an invariant violation. If another update of the key is in flight, the
    /// call waits for it under `policy` and then decides again.
    ///
    /// Returns whether `store_fn` ran.
    pub async fn check_lock_and_store<F, Fut>(
        &self,
        key: &Key,
        version: Option<&EntryVersion>,
        policy: WaitPolicy,
        store_fn: F,
    ) -> Result<bool>
    where
        F: FnOnce(Key) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        loop {
            match self.acquire_for_update(key, version)? {
                Step::Absent | Step::Resident => {
                    trace!(key = %key, "Entry gone from memory, skipping store update");
                    return Ok(false);
                }
                Step::Stale => {
                    debug!(key = %key, "Newer version in memory, dropping stale store update");
                    return Ok(false);
                }
                Step::Violation(ordering) => {
                    error!(key = %key, ?ordering, "Store update is newer than the in-memory entry");
                    return Err(Error::Invariant(format!(
                        "update for key {key} compares {ordering:?} to the in-memory version"
                    )));
                }
                Step::Owner(guard) => {
                    let result = store_fn(key.clone()).await;
                    guard.release()?;
                    result?;
                    return Ok(true);
                }
                Step::Waiting(done) => wait(key, done, policy).await?,
            }
        }
    }

    /// Run `delete_fn` for every key that is no longer held in memory,
    /// one in-flight mutation per key. Waits are unbounded since deleting
    /// twice is harmless.
    ///
    /// Returns how many keys were handed to `delete_fn`.
    pub async fn invalidate<F, Fut>(&self, keys: Vec<Key>, delete_fn: F) -> Result<usize>
    where
        F: Fn(Key) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let outcomes =
            future::try_join_all(keys.iter().map(|key| self.invalidate_key(key, &delete_fn))).await?;
        Ok(outcomes.into_iter().filter(|invalidated| *invalidated).count())
    }

    async fn invalidate_key<F, Fut>(&self, key: &Key, delete_fn: &F) -> Result<bool>
    where
        F: Fn(Key) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        loop {
            let step = self.with_entry(key, |current| match current {
                Some(_) => Step::Resident,
                None => self.try_acquire(key),
            })?;
            match step {
                Step::Owner(guard) => {
                    let result = delete_fn(key.clone()).await;
                    guard.release()?;
                    result?;
                    return Ok(true);
                }
                Step::Waiting(done) => wait(key, done, WaitPolicy::Unbounded).await?,
                _ => {
                    trace!(key = %key, "Entry back in memory, skipping invalidation");
                    return Ok(false);
                }
            }
        }
    }

    /// Write the current in-memory entry for `key` to every store, ordered
    /// against other updates of the key.
    pub async fn store_entry(
        &self,
        segment: u32,
        key: &Key,
        version: Option<&EntryVersion>,
        policy: WaitPolicy,
    ) -> Result<bool> {
        self.check_lock_and_store(key, version, policy, |key| async move {
            match self.snapshot(&key) {
                Some(entry) => {
                    self.persistence
                        .write_to_all_stores(segment, entry, StorePredicate::all())
                        .await
                }
                None => Ok(()),
            }
        })
        .await
    }

    /// Delete `keys` from every store once they have left memory.
    pub async fn invalidate_stores(&self, keys: Vec<Key>) -> Result<usize> {
        let partitioner = Arc::clone(self.persistence.partitioner());
        self.invalidate(keys, |key| {
            let segment = partitioner.segment(&key);
            async move {
                self.persistence
                    .delete_from_all_stores(segment, &key, StorePredicate::all())
                    .await
                    .map(|_| ())
            }
        })
        .await
    }

    /// True while an update of `key` is in flight.
    #[must_use]
    pub fn is_pending(&self, key: &Key) -> bool {
        self.tokens.pending.contains_key(key)
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.tokens.pending.len()
    }

    /// Drop every token and wake their waiters.
    pub fn stop(&self) {
        let dropped = self.tokens.clear();
        debug!(dropped, "Ordered updates stopped");
    }

    fn acquire_for_update(&self, key: &Key, version: Option<&EntryVersion>) -> Result<Step<'_>> {
        self.with_entry(key, |current| match current.map(Entry::version) {
            None => Step::Absent,
            Some(None) => self.try_acquire(key),
            Some(Some(in_memory)) => match version {
                None => self.try_acquire(key),
                Some(requested) => match in_memory.compare(requested) {
                    VersionOrdering::Equal => self.try_acquire(key),
                    VersionOrdering::After => Step::Stale,
                    other => Step::Violation(other),
                },
            },
        })
    }

    /// Run `f` once under the container's lock for `key`.
    fn with_entry<T, F>(&self, key: &Key, f: F) -> Result<T>
    where
        T: Send,
        F: FnOnce(Option<&Entry>) -> T + Send,
    {
        let mut f = Some(f);
        let mut outcome = None;
        self.persistence.container().compute(key, &mut |current| {
            if let Some(f) = f.take() {
                outcome = Some(f(current));
            }
        });
        outcome.ok_or_else(|| Error::Invariant(format!("container skipped compute for key {key}")))
    }

    fn snapshot(&self, key: &Key) -> Option<Entry> {
        let mut snapshot = None;
        self.persistence
            .container()
            .compute(key, &mut |current| snapshot = current.cloned());
        snapshot
    }

    fn try_acquire(&self, key: &Key) -> Step<'_> {
        match self.tokens.pending.entry(key.clone()) {
            MapEntry::Occupied(existing) => Step::Waiting(existing.get().done.subscribe()),
            MapEntry::Vacant(slot) => {
                let (done, _) = watch::channel(false);
                let token = Arc::new(PendingToken {
                    id: self.next_id.fetch_add(1, Ordering::Relaxed),
                    epoch: self.tokens.epoch.load(Ordering::Acquire),
                    done,
                });
                slot.insert(Arc::clone(&token));
                Step::Owner(TokenGuard {
                    manager: self,
                    key: key.clone(),
                    token,
                    released: false,
                })
            }
        }
    }
}

async fn wait(key: &Key, mut done: watch::Receiver<bool>, policy: WaitPolicy) -> Result<()> {
    trace!(key = %key, "Waiting for pending store update");
    match policy {
        WaitPolicy::Unbounded => {
            let _ = done.wait_for(|done| *done).await;
        }
        WaitPolicy::Bounded(limit) => {
            if tokio::time::timeout(limit, done.wait_for(|done| *done))
                .await
                .is_err()
            {
                return Err(Error::Timeout {
                    key: key.to_string(),
                    waited: limit,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    use super::*;
    use crate::infrastructure::config::PersistenceConfig;
    use crate::testkit::container::MemoryContainer;

    fn manager(container: Arc<MemoryContainer>) -> OrderedUpdatesManager {
        let persistence = PersistenceManager::builder(PersistenceConfig::default())
            .container(container)
            .build()
            .unwrap();
        OrderedUpdatesManager::new(persistence)
    }

    fn versioned(key: &str, counter: u64) -> Entry {
        Entry::new(key, "v").with_version(EntryVersion::new("a", counter))
    }

    #[tokio::test]
    async fn absent_entry_skips_store() {
        let ordered = manager(Arc::new(MemoryContainer::new()));
        let ran = ordered
            .check_lock_and_store(&Key::new("k"), None, WaitPolicy::Unbounded, |_| async { Ok(()) })
            .await
            .unwrap();
        assert!(!ran);
    }

    #[tokio::test]
    async fn stale_version_is_dropped() {
        let container = Arc::new(MemoryContainer::new());
        container.put(versioned("k", 2));
        let ordered = manager(container);

        let calls = AtomicUsize::new(0);
        let old = EntryVersion::new("a", 1);
        let ran = ordered
            .check_lock_and_store(&Key::new("k"), Some(&old), WaitPolicy::Unbounded, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await
            .unwrap();
        assert!(!ran);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn matching_version_runs_and_releases() {
        let container = Arc::new(MemoryContainer::new());
        container.put(versioned("k", 2));
        let ordered = manager(container);

        let version = EntryVersion::new("a", 2);
        let ran = ordered
            .check_lock_and_store(&Key::new("k"), Some(&version), WaitPolicy::Unbounded, |_| async {
                Ok(())
            })
            .await
            .unwrap();
        assert!(ran);
        assert_eq!(ordered.pending_count(), 0);
    }

    #[tokio::test]
    async fn newer_update_than_memory_is_an_invariant_violation() {
        let container = Arc::new(MemoryContainer::new());
        container.put(versioned("k", 1));
        let ordered = manager(container);

        let newer = EntryVersion::new("a", 5);
        let err = ordered
            .check_lock_and_store(&Key::new("k"), Some(&newer), WaitPolicy::Unbounded, |_| async {
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(err.is_invariant());
    }

    #[tokio::test]
    async fn token_is_held_by_the_time_the_key_is_released() {
        let container = Arc::new(MemoryContainer::new());
        container.put(versioned("k", 1));
        let ordered = Arc::new(manager(Arc::clone(&container)));
        let pending_after_check = Arc::new(AtomicBool::new(false));
        {
            let ordered = Arc::clone(&ordered);
            let pending_after_check = Arc::clone(&pending_after_check);
            container.after_next_compute(move || {
                pending_after_check.store(ordered.is_pending(&Key::new("k")), Ordering::SeqCst);
            });
        }

        let v1 = EntryVersion::new("a", 1);
        let stored = ordered
            .check_lock_and_store(&Key::new("k"), Some(&v1), WaitPolicy::Unbounded, |_| async { Ok(()) })
            .await
            .unwrap();
        assert!(stored);
        assert!(pending_after_check.load(Ordering::SeqCst));
        assert!(!ordered.is_pending(&Key::new("k")));
    }

    #[tokio::test]
    async fn store_failure_still_releases_token() {
        let container = Arc::new(MemoryContainer::new());
        container.put(Entry::new("k", "v"));
        let ordered = manager(container);

        let result = ordered
            .check_lock_and_store(&Key::new("k"), None, WaitPolicy::Unbounded, |_| async {
                Err(Error::store("scripted", "boom"))
            })
            .await;
        assert!(matches!(result, Err(Error::Store { .. })));
        assert!(!ordered.is_pending(&Key::new("k")));
    }

    #[tokio::test]
    async fn concurrent_updates_of_one_key_never_overlap() {
        let container = Arc::new(MemoryContainer::new());
        container.put(Entry::new("k", "v"));
        let ordered = Arc::new(manager(container));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let tasks = (0..8).map(|_| {
            let ordered = Arc::clone(&ordered);
            let in_flight = Arc::clone(&in_flight);
            let max_seen = Arc::clone(&max_seen);
            tokio::spawn(async move {
                ordered
                    .check_lock_and_store(&Key::new("k"), None, WaitPolicy::Unbounded, |_| async {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            })
        });
        for result in future::join_all(tasks).await {
            assert!(result.unwrap().unwrap());
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(ordered.pending_count(), 0);
    }

    #[tokio::test]
    async fn bounded_wait_times_out() {
        let container = Arc::new(MemoryContainer::new());
        container.put(Entry::new("k", "v"));
        let ordered = Arc::new(manager(container));
        let (release, released) = tokio::sync::oneshot::channel::<()>();

        let holder = {
            let ordered = Arc::clone(&ordered);
            tokio::spawn(async move {
                ordered
                    .check_lock_and_store(&Key::new("k"), None, WaitPolicy::Unbounded, |_| async {
                        let _ = released.await;
                        Ok(())
                    })
                    .await
            })
        };
        while !ordered.is_pending(&Key::new("k")) {
            tokio::task::yield_now().await;
        }

        let err = ordered
            .check_lock_and_store(
                &Key::new("k"),
                None,
                WaitPolicy::Bounded(Duration::from_millis(20)),
                |_| async { Ok(()) },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));

        release.send(()).unwrap();
        assert!(holder.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn invalidate_only_deletes_keys_gone_from_memory() {
        let container = Arc::new(MemoryContainer::new());
        container.put(Entry::new("kept", "v"));
        let ordered = manager(container);
        let deleted = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let count = ordered
            .invalidate(vec![Key::new("kept"), Key::new("gone")], |key| {
                let deleted = Arc::clone(&deleted);
                async move {
                    deleted.lock().push(key);
                    Ok(())
                }
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(*deleted.lock(), vec![Key::new("gone")]);
    }

    #[tokio::test]
    async fn stop_wakes_waiters_and_forgets_tokens() {
        let container = Arc::new(MemoryContainer::new());
        container.put(Entry::new("k", "v"));
        let ordered = Arc::new(manager(container));
        let (release, released) = tokio::sync::oneshot::channel::<()>();

        let holder = {
            let ordered = Arc::clone(&ordered);
            tokio::spawn(async move {
                ordered
                    .check_lock_and_store(&Key::new("k"), None, WaitPolicy::Unbounded, |_| async {
                        let _ = released.await;
                        Ok(())
                    })
                    .await
            })
        };
        while !ordered.is_pending(&Key::new("k")) {
            tokio::task::yield_now().await;
        }

        ordered.stop();
        assert_eq!(ordered.pending_count(), 0);
        release.send(()).unwrap();
        assert!(holder.await.unwrap().unwrap());
    }
}
