use std::time::Duration;

use thiserror::Error;

use crate::domain::characteristic::Characteristic;

/// Configuration-related errors with structured variants.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),

    #[error("store {store} is configured with both {present:?} and {requested:?}")]
    ConflictingCharacteristics {
        store: String,
        present: Characteristic,
        requested: Characteristic,
    },

    #[error("no store factory registered for type '{0}'")]
    UnknownStoreType(String),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A store was reported down by the availability monitor.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// One store of a fanned-out operation failed; the whole operation fails.
    #[error("{operation} failed on store {store}: {source}")]
    FanOut {
        operation: &'static str,
        store: String,
        #[source]
        source: Box<Error>,
    },

    /// Internal bookkeeping went wrong. Never recovered from.
    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("timed out after {waited:?} waiting for pending update of key {key}")]
    Timeout { key: String, waited: Duration },

    #[error("store {store} failed: {reason}")]
    Store { store: String, reason: String },

    #[error("persistence is not started")]
    NotStarted,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a store-originated failure.
    pub fn store(store: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Store {
            store: store.into(),
            reason: reason.into(),
        }
    }

    /// True for errors that indicate a logic defect rather than an I/O problem.
    #[must_use]
    pub fn is_invariant(&self) -> bool {
        match self {
            Error::Invariant(_) => true,
            Error::FanOut { source, .. } => source.is_invariant(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
