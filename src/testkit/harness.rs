//! A [`PersistenceManager`] wired to recording collaborators.

use std::sync::Arc;

use crate::infrastructure::config::PersistenceConfig;
use crate::infrastructure::factory::StoreFactoryRegistry;
use crate::persistence::PersistenceManager;
use crate::port::notifier::NotifierRegistry;
use crate::port::store::NonBlockingStore;

use super::container::MemoryContainer;
use super::recording::{RecordingInterceptorChain, RecordingNotifier, RecordingTransactionManager};

/// Manager plus handles on everything it talks to.
pub struct Harness {
    pub manager: PersistenceManager,
    pub container: Arc<MemoryContainer>,
    pub notifier: RecordingNotifier,
    pub interceptors: RecordingInterceptorChain,
    pub transactions: RecordingTransactionManager,
}

impl Harness {
    pub fn builder(config: PersistenceConfig) -> HarnessBuilder {
        HarnessBuilder {
            config,
            factories: StoreFactoryRegistry::default(),
            transactions: RecordingTransactionManager::new(),
        }
    }
}

pub struct HarnessBuilder {
    config: PersistenceConfig,
    factories: StoreFactoryRegistry,
    transactions: RecordingTransactionManager,
}

impl HarnessBuilder {
    /// Make `store_type` resolve to this exact instance.
    pub fn store(mut self, store_type: &str, store: Arc<dyn NonBlockingStore>) -> Self {
        self.factories.register_instance(store_type, store);
        self
    }

    pub fn transactions(mut self, transactions: RecordingTransactionManager) -> Self {
        self.transactions = transactions;
        self
    }

    pub fn build(self) -> Harness {
        let container = Arc::new(MemoryContainer::new());
        let notifier = RecordingNotifier::new();
        let interceptors = RecordingInterceptorChain::new();
        let mut notifiers = NotifierRegistry::new();
        notifiers.register(Arc::new(notifier.clone()));

        let manager = PersistenceManager::builder(self.config)
            .container(container.clone())
            .factories(self.factories)
            .notifiers(notifiers)
            .interceptors(Arc::new(interceptors.clone()))
            .transactions(Arc::new(self.transactions.clone()))
            .build()
            .expect("harness config must be valid");

        Harness {
            manager,
            container,
            notifier,
            interceptors,
            transactions: self.transactions,
        }
    }

    /// Build and start the manager.
    pub async fn start(self) -> Harness {
        let harness = self.build();
        harness
            .manager
            .start()
            .await
            .expect("harness stores must start");
        harness
    }
}
