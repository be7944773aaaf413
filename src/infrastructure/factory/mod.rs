//! Factory modules for building infrastructure components.
//!
//! Provides factory functions that construct fully-configured components
//! from configuration.
//!
//! # Submodules
//!
//! - [`notifier`] - Notification registry construction
//! - [`store`] - Store construction by type tag

pub mod notifier;
pub mod store;

pub use notifier::build_notifier_registry;
pub use store::{StoreFactory, StoreFactoryRegistry};
