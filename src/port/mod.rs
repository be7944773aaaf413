//! Trait definitions (hexagonal ports). Depend only on domain.
//!
//! Ports define the extension points of the persistence layer. They are
//! traits that adapters implement to integrate with the stores and the
//! surrounding cache.
//!
//! # Architecture
//!
//! ```text
//!                    ┌─────────────────────────┐
//!                    │   PersistenceManager    │
//!                    │                         │
//!     ┌──────────────┤  Domain + Port          ├──────────────┐
//!     │              │                         │              │
//!     │              └─────────────────────────┘              │
//!     │                         │                             │
//!     ▼                         ▼                             ▼
//! ┌─────────┐            ┌─────────────┐              ┌───────────┐
//! │  Store  │            │  Container  │              │ Notifier  │
//! │ Adapter │            │ (external)  │              │  Adapter  │
//! └─────────┘            └─────────────┘              └───────────┘
//! ```
//!
//! # Available Ports
//!
//! - [`NonBlockingStore`] - Backing store contract
//! - [`DataContainer`] - In-memory container hooks (compute, reinsert, expiry)
//! - [`KeyPartitioner`] - Key to segment mapping
//! - [`Notifier`] - Persistence event notifications
//! - [`InterceptorChain`] - Request pipeline mutation
//! - [`TransactionManager`] - Transaction hooks for preload

pub mod container;
pub mod interceptor;
pub mod notifier;
pub mod partitioner;
pub mod store;
pub mod transaction;

pub use container::{DataContainer, InsertFlags};
pub use interceptor::{InterceptorChain, InterceptorKind};
pub use notifier::{LogNotifier, Notifier, NotifierRegistry, NullNotifier, PersistenceEvent};
pub use partitioner::{HashPartitioner, KeyPartitioner};
pub use store::{
    EntryStream, InitContext, KeyFilter, KeyStream, NonBlockingStore, SIZE_UNKNOWN,
};
pub use transaction::{Transaction, TransactionManager};
