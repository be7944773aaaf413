//! Cache persistence - store orchestration for a distributed in-memory cache.
//!
//! This crate sits between the cache's in-memory data container and any
//! number of pluggable backing stores, and presents them as one non-blocking
//! storage facade.
//!
//! # Architecture
//!
//! - **`persistence::PersistenceManager`** - Ordered store registry and router
//!   - reads go to the first capable store, writes fan out to all of them
//!   - `start`/`stop`/`disable_store` own the store lifecycle
//!   - a background monitor fails operations fast while a store is down
//! - **`persistence::OrderedUpdatesManager`** - One in-flight store update per key
//! - **`persistence::PassivationManager`** - Overlay for in-flight evictions
//! - **`persistence::PreloadManager`** - Bounded startup preload
//! - **`persistence::AsyncStore`** - Write-behind wrapper for async stores
//!
//! # Modules
//!
//! - [`domain`] - Keys, entries, versions, characteristics and segments
//! - [`port`] - Store contract and hooks into the surrounding cache
//! - [`adapter`] - Built-in memory and file stores
//! - [`infrastructure`] - Configuration and factories
//! - [`persistence`] - Orchestration
//! - [`error`] - Error types for the crate
//!
//! # Example
//!
//! ```no_run
//! # async fn run(container: std::sync::Arc<dyn cache_persistence::port::DataContainer>)
//! # -> cache_persistence::error::Result<()> {
//! use cache_persistence::infrastructure::config::{PersistenceConfig, StoreConfig};
//! use cache_persistence::persistence::PersistenceManager;
//!
//! let config = PersistenceConfig::default()
//!     .with_store(StoreConfig::new("file").with_location("/var/lib/cache/store.json"));
//! let manager = PersistenceManager::builder(config)
//!     .container(container)
//!     .build()?;
//! manager.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod persistence;
pub mod port;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;
