//! Entries as exchanged with stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::key::{Key, Value};
use super::version::EntryVersion;

/// Metadata stored alongside a value.
///
/// Timestamps are preserved across store round trips so that preloaded
/// entries keep their original creation and access times.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub version: Option<EntryVersion>,
    pub created: Option<DateTime<Utc>>,
    pub last_used: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Metadata {
    #[must_use]
    pub fn with_version(mut self, version: EntryVersion) -> Self {
        self.version = Some(version);
        self
    }

    #[must_use]
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// True when the entry carries an expiry that has passed at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// A key with its (optionally fetched) value and metadata.
///
/// `value` is `None` when a store was asked to publish entries without
/// fetching values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub key: Key,
    pub value: Option<Value>,
    pub metadata: Metadata,
}

impl Entry {
    /// Create an entry stamped with the current time as creation time.
    pub fn new(key: impl Into<Key>, value: impl Into<Value>) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            value: Some(value.into()),
            metadata: Metadata {
                created: Some(now),
                last_used: Some(now),
                ..Metadata::default()
            },
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn with_version(mut self, version: EntryVersion) -> Self {
        self.metadata.version = Some(version);
        self
    }

    #[must_use]
    pub fn version(&self) -> Option<&EntryVersion> {
        self.metadata.version.as_ref()
    }

    /// Copy without the value, as published for key-only or metadata scans.
    #[must_use]
    pub fn without_value(&self) -> Self {
        Self {
            key: self.key.clone(),
            value: None,
            metadata: self.metadata.clone(),
        }
    }
}
