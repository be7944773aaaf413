//! Persistence orchestration.
//!
//! [`PersistenceManager`] owns the ordered store list and routes every
//! operation to the stores whose characteristics allow it. The remaining
//! units compose around it:
//!
//! - [`OrderedUpdatesManager`] serializes store mutations per key.
//! - [`PassivationManager`] masks the window between eviction and the
//!   durable write.
//! - [`PreloadManager`] populates memory from the preload store on startup.
//! - The availability monitor polls stores in the background and fails
//!   operations fast while one is down.
//!
//! The manager is a cheap handle; clones share the same state.

mod availability;
pub mod async_store;
mod lifecycle;
mod lock;
pub mod ordered;
pub mod passivation;
pub mod preload;
mod router;
pub mod status;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::error::{ConfigError, Error, Result};
use crate::infrastructure::config::PersistenceConfig;
use crate::infrastructure::factory::{build_notifier_registry, StoreFactoryRegistry};
use crate::port::container::DataContainer;
use crate::port::interceptor::InterceptorChain;
use crate::port::notifier::{NotifierRegistry, PersistenceEvent};
use crate::port::partitioner::{HashPartitioner, KeyPartitioner};
use crate::port::transaction::TransactionManager;

pub use async_store::AsyncStore;
pub use lock::StoresReadGuard;
pub use ordered::{OrderedUpdatesManager, WaitPolicy};
pub use passivation::PassivationManager;
pub use preload::{PreloadManager, PreloadOutcome};
pub use router::{LoadOptions, StorePredicate};
pub use status::{resolve_characteristics, StoreHandle, StoreStatus};

use lock::StoreList;

/// Per-key state owned by a unit built on the manager, dropped when the
/// manager stops.
pub(crate) trait StopListener: Send + Sync {
    fn persistence_stopped(&self);
}

/// Routes cache operations to the configured stores.
#[derive(Clone)]
pub struct PersistenceManager {
    pub(crate) inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) config: PersistenceConfig,
    pub(crate) stores: StoreList,
    pub(crate) factories: StoreFactoryRegistry,
    pub(crate) partitioner: Arc<dyn KeyPartitioner>,
    pub(crate) container: Arc<dyn DataContainer>,
    pub(crate) notifiers: NotifierRegistry,
    pub(crate) interceptors: Option<Arc<dyn InterceptorChain>>,
    pub(crate) transactions: Option<Arc<dyn TransactionManager>>,
    pub(crate) enabled: AtomicBool,
    pub(crate) clear_on_stop: AtomicBool,
    pub(crate) preloaded: AtomicBool,
    /// Set while a store is reported down; operations fail fast with it.
    pub(crate) unavailable: RwLock<Option<String>>,
    pub(crate) monitor: Mutex<Option<JoinHandle<()>>>,
    pub(crate) stop_listeners: Mutex<Vec<Weak<dyn StopListener>>>,
}

impl Inner {
    pub(crate) fn notify(&self, event: PersistenceEvent) {
        self.notifiers.notify_all(event);
    }

    pub(crate) fn stop_monitor(&self) {
        if let Some(handle) = self.monitor.lock().take() {
            handle.abort();
        }
    }

    pub(crate) fn add_stop_listener(&self, listener: Weak<dyn StopListener>) {
        let mut listeners = self.stop_listeners.lock();
        listeners.retain(|l| l.strong_count() > 0);
        listeners.push(listener);
    }

    pub(crate) fn notify_stop_listeners(&self) {
        let live: Vec<Arc<dyn StopListener>> = {
            let mut listeners = self.stop_listeners.lock();
            listeners.retain(|l| l.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in live {
            listener.persistence_stopped();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.stop_monitor();
    }
}

impl PersistenceManager {
    /// Create a builder for the given configuration.
    #[must_use]
    pub fn builder(config: PersistenceConfig) -> PersistenceManagerBuilder {
        PersistenceManagerBuilder::new(config)
    }

    #[must_use]
    pub fn config(&self) -> &PersistenceConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn partitioner(&self) -> &Arc<dyn KeyPartitioner> {
        &self.inner.partitioner
    }

    #[must_use]
    pub fn container(&self) -> &Arc<dyn DataContainer> {
        &self.inner.container
    }

    /// True between a successful `start()` and `stop()`, while stores remain.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    /// False while the availability monitor reports a store down.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.inner.unavailable.read().is_none()
    }

    /// True when the last preload exhausted its source.
    #[must_use]
    pub fn is_preloaded(&self) -> bool {
        self.inner.preloaded.load(Ordering::Acquire)
    }

    pub fn set_clear_on_stop(&self, clear: bool) {
        self.inner.clear_on_stop.store(clear, Ordering::Release);
    }

    /// Number of structural changes applied to the store list.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.stores.generation()
    }
}

impl fmt::Debug for PersistenceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistenceManager")
            .field("enabled", &self.is_enabled())
            .field("available", &self.is_available())
            .field("stores", &self.inner.config.stores.len())
            .finish()
    }
}

/// Builder for [`PersistenceManager`].
///
/// # Example
///
/// ```ignore
/// let manager = PersistenceManager::builder(config)
///     .container(container)
///     .interceptors(chain)
///     .build()?;
/// manager.start().await?;
/// ```
pub struct PersistenceManagerBuilder {
    config: PersistenceConfig,
    container: Option<Arc<dyn DataContainer>>,
    partitioner: Option<Arc<dyn KeyPartitioner>>,
    factories: StoreFactoryRegistry,
    notifiers: Option<NotifierRegistry>,
    interceptors: Option<Arc<dyn InterceptorChain>>,
    transactions: Option<Arc<dyn TransactionManager>>,
}

impl PersistenceManagerBuilder {
    #[must_use]
    pub fn new(config: PersistenceConfig) -> Self {
        Self {
            config,
            container: None,
            partitioner: None,
            factories: StoreFactoryRegistry::default(),
            notifiers: None,
            interceptors: None,
            transactions: None,
        }
    }

    /// The in-memory container stores feed into. Required.
    #[must_use]
    pub fn container(mut self, container: Arc<dyn DataContainer>) -> Self {
        self.container = Some(container);
        self
    }

    /// Key to segment mapping. Defaults to hashing over `num_segments`.
    #[must_use]
    pub fn partitioner(mut self, partitioner: Arc<dyn KeyPartitioner>) -> Self {
        self.partitioner = Some(partitioner);
        self
    }

    #[must_use]
    pub fn factories(mut self, factories: StoreFactoryRegistry) -> Self {
        self.factories = factories;
        self
    }

    /// Replace the default notifiers (a single log notifier).
    #[must_use]
    pub fn notifiers(mut self, notifiers: NotifierRegistry) -> Self {
        self.notifiers = Some(notifiers);
        self
    }

    #[must_use]
    pub fn interceptors(mut self, interceptors: Arc<dyn InterceptorChain>) -> Self {
        self.interceptors = Some(interceptors);
        self
    }

    #[must_use]
    pub fn transactions(mut self, transactions: Arc<dyn TransactionManager>) -> Self {
        self.transactions = Some(transactions);
        self
    }

    /// Validate the configuration and build the manager. Stores are not
    /// started until [`PersistenceManager::start`].
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or no container was
    /// supplied.
    pub fn build(self) -> Result<PersistenceManager> {
        self.config.validate()?;
        let container = self
            .container
            .ok_or(Error::Config(ConfigError::MissingField { field: "container" }))?;
        let partitioner = self
            .partitioner
            .unwrap_or_else(|| Arc::new(HashPartitioner::new(self.config.num_segments)));
        let notifiers = self
            .notifiers
            .unwrap_or_else(|| build_notifier_registry(Vec::new()));
        let clear_on_stop = self.config.clear_on_stop;

        Ok(PersistenceManager {
            inner: Arc::new(Inner {
                config: self.config,
                stores: StoreList::new(),
                factories: self.factories,
                partitioner,
                container,
                notifiers,
                interceptors: self.interceptors,
                transactions: self.transactions,
                enabled: AtomicBool::new(false),
                clear_on_stop: AtomicBool::new(clear_on_stop),
                preloaded: AtomicBool::new(false),
                unavailable: RwLock::new(None),
                monitor: Mutex::new(None),
                stop_listeners: Mutex::new(Vec::new()),
            }),
        })
    }
}
