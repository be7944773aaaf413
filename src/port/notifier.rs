//! Notifier port for persistence events.
//!
//! This module defines the trait for sending notifications about
//! persistence state changes such as store availability flips.

use std::sync::Arc;

/// Events that can trigger notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceEvent {
    /// The shared availability state flipped.
    AvailabilityChanged {
        /// True when every store is reachable again.
        available: bool,
    },
    /// Stores of a type were removed from routing.
    StoreDisabled {
        /// The type tag that was disabled.
        store_type: String,
        /// Number of stores still configured.
        remaining: usize,
    },
    /// Startup preload finished.
    PreloadCompleted {
        /// Entries reinserted into memory.
        entries: u64,
        /// False when preload stopped at the eviction bound.
        fully_preloaded: bool,
    },
}

/// Trait for notification handlers.
///
/// Notifications are fire-and-forget.
///
/// # Implementation Notes
///
/// - Implementations must be thread-safe (`Send + Sync`)
/// - The `notify` method should not block or perform slow I/O synchronously
pub trait Notifier: Send + Sync {
    /// Handle an event.
    fn notify(&self, event: PersistenceEvent);
}

/// Registry of notifiers (composite pattern).
///
/// Broadcasts events to all registered notifiers.
#[derive(Clone, Default)]
pub struct NotifierRegistry {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl NotifierRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { notifiers: vec![] }
    }

    /// Register a notifier.
    pub fn register(&mut self, notifier: Arc<dyn Notifier>) {
        self.notifiers.push(notifier);
    }

    /// Notify all registered notifiers.
    pub fn notify_all(&self, event: PersistenceEvent) {
        for notifier in &self.notifiers {
            notifier.notify(event.clone());
        }
    }

    /// Number of registered notifiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    /// Check if registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

/// A no-op notifier for when notifications are disabled.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _event: PersistenceEvent) {}
}

/// A logging notifier that logs events via tracing.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: PersistenceEvent) {
        use tracing::{info, warn};
        match event {
            PersistenceEvent::AvailabilityChanged { available: true } => {
                info!("Persistence available again");
            }
            PersistenceEvent::AvailabilityChanged { available: false } => {
                warn!("Persistence unavailable");
            }
            PersistenceEvent::StoreDisabled {
                store_type,
                remaining,
            } => {
                info!(store_type = %store_type, remaining, "Store disabled");
            }
            PersistenceEvent::PreloadCompleted {
                entries,
                fully_preloaded,
            } => {
                info!(entries, fully_preloaded, "Preload completed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(Arc<AtomicUsize>);

    impl Notifier for Counting {
        fn notify(&self, _event: PersistenceEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn registry_broadcasts_to_every_notifier() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut registry = NotifierRegistry::new();
        registry.register(Arc::new(Counting(count.clone())));
        registry.register(Arc::new(Counting(count.clone())));
        registry.register(Arc::new(NullNotifier));

        registry.notify_all(PersistenceEvent::AvailabilityChanged { available: false });

        assert_eq!(registry.len(), 3);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn empty_registry() {
        let registry = NotifierRegistry::default();
        assert!(registry.is_empty());
        registry.notify_all(PersistenceEvent::AvailabilityChanged { available: true });
    }
}
