//! Notifier registry factory.

use std::sync::Arc;

use crate::port::notifier::{LogNotifier, Notifier, NotifierRegistry};

/// Build the notifier registry.
///
/// Always includes the log notifier, followed by `extra` in order.
pub fn build_notifier_registry(extra: Vec<Arc<dyn Notifier>>) -> NotifierRegistry {
    let mut registry = NotifierRegistry::new();
    registry.register(Arc::new(LogNotifier));
    for notifier in extra {
        registry.register(notifier);
    }
    registry
}
