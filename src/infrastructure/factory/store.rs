//! Store construction by type tag.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::adapter::store::{FileStore, MemoryStore};
use crate::error::{ConfigError, Result};
use crate::infrastructure::config::store::StoreConfig;
use crate::port::store::NonBlockingStore;

/// Factory function for creating a store instance from its configuration.
pub type StoreFactory =
    Arc<dyn Fn(&StoreConfig) -> Result<Arc<dyn NonBlockingStore>> + Send + Sync>;

/// Maps store type tags to factories.
///
/// A default registry knows the built-in `memory` and `file` stores.
#[derive(Clone)]
pub struct StoreFactoryRegistry {
    factories: HashMap<String, StoreFactory>,
}

impl StoreFactoryRegistry {
    /// A registry without any factories.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register or replace the factory for `store_type`.
    pub fn register(&mut self, store_type: impl Into<String>, factory: StoreFactory) {
        self.factories.insert(store_type.into(), factory);
    }

    /// Register a factory that hands out clones of an existing store.
    ///
    /// Useful when the caller needs to keep a handle on the instance.
    pub fn register_instance(
        &mut self,
        store_type: impl Into<String>,
        store: Arc<dyn NonBlockingStore>,
    ) {
        self.register(store_type, Arc::new(move |_: &StoreConfig| Ok(Arc::clone(&store))));
    }

    #[must_use]
    pub fn contains(&self, store_type: &str) -> bool {
        self.factories.contains_key(store_type)
    }

    /// Create a store for `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownStoreType`] when no factory is
    /// registered, or whatever the factory itself reports.
    pub fn create(&self, config: &StoreConfig) -> Result<Arc<dyn NonBlockingStore>> {
        let factory = self
            .factories
            .get(&config.store_type)
            .ok_or_else(|| ConfigError::UnknownStoreType(config.store_type.clone()))?;
        factory(config)
    }
}

impl Default for StoreFactoryRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(
            MemoryStore::TYPE,
            Arc::new(|_: &StoreConfig| Ok(Arc::new(MemoryStore::new()) as Arc<dyn NonBlockingStore>)),
        );
        registry.register(
            FileStore::TYPE,
            Arc::new(|config: &StoreConfig| -> Result<Arc<dyn NonBlockingStore>> {
                let location = config
                    .location
                    .clone()
                    .ok_or(ConfigError::MissingField { field: "location" })?;
                Ok(Arc::new(FileStore::new(location)) as Arc<dyn NonBlockingStore>)
            }),
        );
        registry
    }
}

impl fmt::Debug for StoreFactoryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.factories.keys().collect();
        types.sort();
        f.debug_struct("StoreFactoryRegistry")
            .field("types", &types)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn default_registry_knows_builtin_types() {
        let registry = StoreFactoryRegistry::default();
        assert!(registry.contains("memory"));
        assert!(registry.contains("file"));

        let store = registry.create(&StoreConfig::new("memory")).unwrap();
        assert_eq!(store.store_type(), "memory");
    }

    #[test]
    fn file_store_requires_location() {
        let registry = StoreFactoryRegistry::default();
        let err = registry.create(&StoreConfig::new("file")).err().unwrap();
        assert!(matches!(
            err,
            Error::Config(ConfigError::MissingField { field: "location" })
        ));
    }

    #[test]
    fn unknown_type_is_a_config_error() {
        let registry = StoreFactoryRegistry::empty();
        let err = registry.create(&StoreConfig::new("jdbc")).err().unwrap();
        assert!(matches!(
            err,
            Error::Config(ConfigError::UnknownStoreType(ref t)) if t == "jdbc"
        ));
    }

    #[test]
    fn registered_instance_is_shared() {
        let store: Arc<dyn NonBlockingStore> = Arc::new(MemoryStore::new());
        let mut registry = StoreFactoryRegistry::empty();
        registry.register_instance("custom", Arc::clone(&store));

        let created = registry.create(&StoreConfig::new("custom")).unwrap();
        assert!(Arc::ptr_eq(&created, &store));
    }
}
