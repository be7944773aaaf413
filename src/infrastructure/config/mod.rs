//! Infrastructure configuration modules.

pub mod logging;
pub mod settings;
pub mod store;

pub use logging::LoggingConfig;
pub use settings::PersistenceConfig;
pub use store::{AsyncStoreConfig, StoreConfig};
