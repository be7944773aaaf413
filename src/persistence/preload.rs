//! Startup population of the in-memory container from preload stores.

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use futures_util::{StreamExt, TryStreamExt};
use tracing::{debug, info, warn};

use super::{PersistenceManager, StorePredicate};
use crate::domain::{Entry, SegmentSet};
use crate::error::{Error, Result};
use crate::port::container::InsertFlags;
use crate::port::notifier::PersistenceEvent;
use crate::port::transaction::TransactionManager;

/// What a preload run inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreloadOutcome {
    pub entries: u64,
    /// False when the run stopped at the eviction bound.
    pub fully_preloaded: bool,
    pub elapsed: Duration,
}

/// Reinserts entries from stores flagged `preload`.
pub struct PreloadManager {
    persistence: PersistenceManager,
}

impl PreloadManager {
    #[must_use]
    pub fn new(persistence: PersistenceManager) -> Self {
        Self { persistence }
    }

    /// Stream every preload entry into the container, up to the eviction
    /// bound when one is configured.
    ///
    /// Each reinsertion suppresses the side effects of a regular write, and
    /// runs in its own transaction when the cache is transactional.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotStarted`] if stores are configured but persistence
    /// has not started, or the first store, container or transaction error.
    pub async fn start(&self) -> Result<PreloadOutcome> {
        let config = self.persistence.config();
        let started = Instant::now();
        if !config.using_stores() {
            return Ok(self.finish(0, true, started));
        }
        if !self.persistence.is_enabled() {
            return Err(Error::NotStarted);
        }

        let max_entries = config.eviction_max_count.unwrap_or(u64::MAX);
        let flags = InsertFlags::for_preload(
            self.persistence.has_shared_store().await,
            config.volatile_indexing,
        );
        let transactions = if config.transactional {
            self.persistence.inner.transactions.clone()
        } else {
            None
        };
        if config.transactional && transactions.is_none() {
            warn!("Transactional cache without a transaction manager, preloading without transactions");
        }

        debug!(max_entries, "Preloading from stores");
        let take = usize::try_from(max_entries).unwrap_or(usize::MAX);
        let mut entries = self
            .persistence
            .publish_entries(
                &SegmentSet::range(config.num_segments),
                None,
                true,
                StorePredicate::preload(),
            )
            .take(take);

        let mut inserted = 0u64;
        while let Some(entry) = entries.try_next().await? {
            match &transactions {
                Some(tm) => self.insert_in_transaction(tm.as_ref(), entry, flags).await?,
                None => self.persistence.container().insert(entry, flags).await?,
            }
            inserted += 1;
        }

        Ok(self.finish(inserted, inserted < max_entries, started))
    }

    /// True when the last preload exhausted its source before the bound.
    #[must_use]
    pub fn is_fully_preloaded(&self) -> bool {
        self.persistence.is_preloaded()
    }

    async fn insert_in_transaction(
        &self,
        tm: &dyn TransactionManager,
        entry: Entry,
        flags: InsertFlags,
    ) -> Result<()> {
        let ambient = tm.suspend()?;
        let result = self.insert_transactionally(tm, entry, flags).await;
        if let Some(transaction) = ambient {
            tm.resume(transaction)?;
        }
        result
    }

    async fn insert_transactionally(
        &self,
        tm: &dyn TransactionManager,
        entry: Entry,
        flags: InsertFlags,
    ) -> Result<()> {
        tm.begin()?;
        match self.persistence.container().insert(entry, flags).await {
            Ok(()) => tm.commit(),
            Err(e) => {
                if let Err(rollback) = tm.rollback() {
                    warn!(error = %rollback, "Rollback of preload transaction failed");
                }
                Err(e)
            }
        }
    }

    fn finish(&self, entries: u64, fully_preloaded: bool, started: Instant) -> PreloadOutcome {
        let elapsed = started.elapsed();
        self.persistence
            .inner
            .preloaded
            .store(fully_preloaded, Ordering::Release);
        info!(
            entries,
            fully_preloaded,
            elapsed_ms = elapsed.as_millis() as u64,
            "Preload finished"
        );
        self.persistence.inner.notify(PersistenceEvent::PreloadCompleted {
            entries,
            fully_preloaded,
        });
        PreloadOutcome {
            entries,
            fully_preloaded,
            elapsed,
        }
    }
}

impl From<&PersistenceManager> for PreloadManager {
    fn from(persistence: &PersistenceManager) -> Self {
        Self::new(persistence.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::infrastructure::config::{PersistenceConfig, StoreConfig};
    use crate::infrastructure::factory::StoreFactoryRegistry;
    use crate::port::transaction::Transaction;
    use crate::testkit::container::MemoryContainer;
    use crate::testkit::recording::{RecordingTransactionManager, TxOp};
    use crate::testkit::store::ScriptedStore;

    fn seeded(count: usize) -> Arc<ScriptedStore> {
        let store = (0..count).fold(ScriptedStore::new("scripted"), |store, i| {
            store.with_entry(0, Entry::new(format!("k{i:02}"), "v"))
        });
        Arc::new(store)
    }

    async fn preload(
        store: Arc<ScriptedStore>,
        config: PersistenceConfig,
        transactions: Option<RecordingTransactionManager>,
    ) -> (PreloadManager, Arc<MemoryContainer>) {
        let mut factories = StoreFactoryRegistry::empty();
        factories.register_instance("scripted", store);
        let container = Arc::new(MemoryContainer::new());
        let mut builder = PersistenceManager::builder(config.with_store(StoreConfig::new("scripted").preload()))
            .container(container.clone())
            .factories(factories);
        if let Some(tm) = transactions {
            builder = builder.transactions(Arc::new(tm));
        }
        let persistence = builder.build().unwrap();
        persistence.start().await.unwrap();
        (PreloadManager::new(persistence), container)
    }

    fn base_config() -> PersistenceConfig {
        PersistenceConfig {
            availability_interval_ms: 0,
            ..PersistenceConfig::default()
        }
    }

    #[tokio::test]
    async fn unbounded_preload_exhausts_source() {
        let (preload, container) = preload(seeded(5), base_config(), None).await;
        let outcome = preload.start().await.unwrap();

        assert_eq!(outcome.entries, 5);
        assert!(outcome.fully_preloaded);
        assert!(preload.is_fully_preloaded());
        assert_eq!(container.len(), 5);
    }

    #[tokio::test]
    async fn bounded_preload_stops_at_limit() {
        let config = PersistenceConfig {
            eviction_max_count: Some(3),
            ..base_config()
        };
        let (preload, container) = preload(seeded(5), config, None).await;
        let outcome = preload.start().await.unwrap();

        assert_eq!(outcome.entries, 3);
        assert!(!outcome.fully_preloaded);
        assert!(!preload.is_fully_preloaded());
        assert_eq!(container.len(), 3);
    }

    #[tokio::test]
    async fn reinsertion_suppresses_write_side_effects() {
        let (preload, container) = preload(seeded(1), base_config(), None).await;
        preload.start().await.unwrap();

        let (_, flags) = container.inserted().pop().unwrap();
        assert_eq!(flags, InsertFlags::for_preload(false, false));
        assert!(flags.skip_cache_store);
    }

    #[tokio::test]
    async fn transactional_preload_wraps_each_insert() {
        let ambient = Transaction::new();
        let tm = RecordingTransactionManager::with_ambient(ambient);
        let config = PersistenceConfig {
            transactional: true,
            ..base_config()
        };
        let (preload, _) = preload(seeded(1), config, Some(tm.clone())).await;
        preload.start().await.unwrap();

        assert_eq!(
            tm.ops(),
            vec![TxOp::Suspend, TxOp::Begin, TxOp::Commit, TxOp::Resume(ambient)]
        );
        assert_eq!(tm.ambient(), Some(ambient));
    }

    #[tokio::test]
    async fn failed_insert_rolls_back_and_fails() {
        let tm = RecordingTransactionManager::new();
        let config = PersistenceConfig {
            transactional: true,
            ..base_config()
        };
        let (preload, container) = preload(seeded(2), config, Some(tm.clone())).await;
        container.fail_next_inserts(1);

        assert!(preload.start().await.is_err());
        assert_eq!(tm.ops(), vec![TxOp::Suspend, TxOp::Begin, TxOp::Rollback]);
    }

    #[tokio::test]
    async fn preload_before_start_is_rejected() {
        let config = base_config().with_store(StoreConfig::new("memory").preload());
        let persistence = PersistenceManager::builder(config)
            .container(Arc::new(MemoryContainer::new()))
            .build()
            .unwrap();
        let err = PreloadManager::new(persistence).start().await.unwrap_err();
        assert!(matches!(err, Error::NotStarted));
    }
}
