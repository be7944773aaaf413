//! Per-store records kept in the store list.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::domain::{Characteristic, Characteristics};
use crate::error::{ConfigError, Result};
use crate::infrastructure::config::store::StoreConfig;
use crate::persistence::async_store::AsyncStore;
use crate::port::store::NonBlockingStore;

/// A started store, tagged with how it is wrapped.
///
/// The tag replaces runtime type inspection when stores are disabled by type.
#[derive(Clone)]
pub enum StoreHandle {
    Direct(Arc<dyn NonBlockingStore>),
    /// Write-behind wrapper around the delegate store.
    Async(Arc<AsyncStore>),
}

impl StoreHandle {
    #[must_use]
    pub fn store(&self) -> &dyn NonBlockingStore {
        match self {
            StoreHandle::Direct(store) => store.as_ref(),
            StoreHandle::Async(store) => store.as_ref(),
        }
    }

    /// Type tag of the store doing the actual I/O.
    #[must_use]
    pub fn underlying_type(&self) -> &str {
        match self {
            StoreHandle::Direct(store) => store.store_type(),
            StoreHandle::Async(store) => store.delegate().store_type(),
        }
    }

    #[must_use]
    pub fn is_async(&self) -> bool {
        matches!(self, StoreHandle::Async(_))
    }
}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreHandle::Direct(_) => write!(f, "Direct({})", self.underlying_type()),
            StoreHandle::Async(_) => write!(f, "Async({})", self.underlying_type()),
        }
    }
}

/// One entry of the store list.
///
/// `config` is `None` when the store failed to start. Such entries are only
/// kept so `stop()` can try to close them; they never take part in routing.
#[derive(Debug)]
pub struct StoreStatus {
    pub(crate) handle: StoreHandle,
    pub(crate) config: Option<StoreConfig>,
    pub(crate) characteristics: Characteristics,
    available: AtomicBool,
}

impl StoreStatus {
    pub(crate) fn started(
        handle: StoreHandle,
        config: StoreConfig,
        characteristics: Characteristics,
    ) -> Self {
        Self {
            handle,
            config: Some(config),
            characteristics,
            available: AtomicBool::new(true),
        }
    }

    pub(crate) fn failed(handle: StoreHandle) -> Self {
        Self {
            handle,
            config: None,
            characteristics: Characteristics::empty(),
            available: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn store(&self) -> &dyn NonBlockingStore {
        self.handle.store()
    }

    #[must_use]
    pub fn config(&self) -> Option<&StoreConfig> {
        self.config.as_ref()
    }

    #[must_use]
    pub fn characteristics(&self) -> Characteristics {
        self.characteristics
    }

    #[must_use]
    pub fn has(&self, characteristic: Characteristic) -> bool {
        self.characteristics.contains(characteristic)
    }

    /// Routable stores started successfully.
    #[must_use]
    pub fn is_routable(&self) -> bool {
        self.config.is_some()
    }

    /// Availability as last observed by the monitor.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    pub(crate) fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    /// Segment a store is addressed with: the real one only when segmentable.
    #[must_use]
    pub fn segment_for(&self, segment: u32) -> u32 {
        if self.has(Characteristic::Segmentable) {
            segment
        } else {
            0
        }
    }
}

/// Refine a store's self-reported characteristics with its configuration.
///
/// # Errors
///
/// Returns [`ConfigError::ConflictingCharacteristics`] when configuration
/// asks for read-only on a write-only store or the other way around.
pub fn resolve_characteristics(
    reported: Characteristics,
    config: &StoreConfig,
) -> Result<Characteristics> {
    let mut resolved = reported;

    if config.ignore_modifications {
        if resolved.contains(Characteristic::WriteOnly) {
            return Err(conflict(config, Characteristic::WriteOnly, Characteristic::ReadOnly));
        }
        resolved = resolved
            .with(Characteristic::ReadOnly)
            .without(Characteristic::Transactional);
    }

    if config.write_only {
        if resolved.contains(Characteristic::ReadOnly) {
            return Err(conflict(config, Characteristic::ReadOnly, Characteristic::WriteOnly));
        }
        resolved = resolved
            .with(Characteristic::WriteOnly)
            .without(Characteristic::BulkRead);
    }

    if !config.segmented {
        resolved = resolved.without(Characteristic::Segmentable);
    }

    if resolved.contains(Characteristic::ReadOnly) && resolved.contains(Characteristic::WriteOnly) {
        return Err(conflict(config, Characteristic::ReadOnly, Characteristic::WriteOnly));
    }

    Ok(resolved)
}

fn conflict(
    config: &StoreConfig,
    present: Characteristic,
    requested: Characteristic,
) -> crate::error::Error {
    ConfigError::ConflictingCharacteristics {
        store: config.store_type.clone(),
        present,
        requested,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn full() -> Characteristics {
        Characteristics::of(&[
            Characteristic::BulkRead,
            Characteristic::Transactional,
            Characteristic::Segmentable,
        ])
    }

    #[test]
    fn ignore_modifications_forces_read_only() {
        let resolved = resolve_characteristics(full(), &StoreConfig::new("s").read_only()).unwrap();
        assert!(resolved.contains(Characteristic::ReadOnly));
        assert!(!resolved.contains(Characteristic::Transactional));
        assert!(resolved.contains(Characteristic::BulkRead));
    }

    #[test]
    fn write_only_strips_bulk_read() {
        let resolved = resolve_characteristics(full(), &StoreConfig::new("s").write_only()).unwrap();
        assert!(resolved.contains(Characteristic::WriteOnly));
        assert!(!resolved.contains(Characteristic::BulkRead));
    }

    #[test]
    fn unsegmented_config_strips_segmentable() {
        let resolved = resolve_characteristics(full(), &StoreConfig::new("s").unsegmented()).unwrap();
        assert!(!resolved.contains(Characteristic::Segmentable));
    }

    #[test]
    fn read_only_config_on_write_only_store_is_fatal() {
        let reported = Characteristics::of(&[Characteristic::WriteOnly]);
        let err = resolve_characteristics(reported, &StoreConfig::new("s").read_only()).unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::ConflictingCharacteristics {
                present: Characteristic::WriteOnly,
                requested: Characteristic::ReadOnly,
                ..
            })
        ));
    }

    #[test]
    fn write_only_config_on_read_only_store_is_fatal() {
        let reported = Characteristics::of(&[Characteristic::ReadOnly]);
        assert!(resolve_characteristics(reported, &StoreConfig::new("s").write_only()).is_err());
    }

    #[test]
    fn store_reporting_both_is_fatal() {
        let reported = Characteristics::of(&[Characteristic::ReadOnly, Characteristic::WriteOnly]);
        assert!(resolve_characteristics(reported, &StoreConfig::new("s")).is_err());
    }

    #[test]
    fn non_segmentable_store_uses_segment_zero() {
        let store: Arc<dyn NonBlockingStore> = Arc::new(crate::adapter::store::MemoryStore::new());
        let status = StoreStatus::started(
            StoreHandle::Direct(store),
            StoreConfig::new("memory"),
            Characteristics::of(&[Characteristic::BulkRead]),
        );
        assert_eq!(status.segment_for(7), 0);
        assert!(status.is_routable());
        assert!(status.is_available());
    }
}
