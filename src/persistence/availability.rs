//! Background store availability monitor.
//!
//! Polls on a fixed interval from a single task, so a poll never overlaps
//! the previous one. The task holds only a weak reference and exits once the
//! manager is gone.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::{Inner, PersistenceManager};
use crate::port::notifier::PersistenceEvent;

pub(crate) fn spawn_monitor(inner: &Arc<Inner>, interval: Duration) -> JoinHandle<()> {
    let weak: Weak<Inner> = Arc::downgrade(inner);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; stores were just started.
        ticker.tick().await;

        debug!(interval_ms = interval.as_millis() as u64, "Availability monitor started");
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            poll(&inner).await;
        }
    })
}

/// Check stores in order, stopping at the first one that is down.
async fn poll(inner: &Inner) {
    let stores = inner.stores.read().await;
    let mut down = None;
    for status in stores.iter().filter(|s| s.is_routable()) {
        let available = status.store().is_available().await;
        status.set_available(available);
        if !available {
            down = Some(status.handle.underlying_type().to_string());
            break;
        }
    }

    match down {
        Some(store) => {
            let newly_down = {
                let mut slot = inner.unavailable.write();
                let newly_down = slot.is_none();
                if newly_down {
                    *slot = Some(format!("store {store} is unavailable"));
                }
                newly_down
            };
            if newly_down {
                warn!(store = %store, "Store became unavailable, failing operations fast");
                inner.notify(PersistenceEvent::AvailabilityChanged { available: false });
            }
        }
        None => {
            let recovered = inner.unavailable.write().take().is_some();
            if recovered {
                info!("All stores available again");
                inner.notify(PersistenceEvent::AvailabilityChanged { available: true });
            }
        }
    }
}

impl PersistenceManager {
    /// Run one availability poll now, as the monitor does on every tick.
    pub async fn poll_store_availability(&self) {
        poll(&self.inner).await;
    }

    /// True while the background monitor task is running.
    #[must_use]
    pub fn is_monitoring(&self) -> bool {
        self.inner
            .monitor
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::{PersistenceConfig, StoreConfig};
    use crate::infrastructure::factory::StoreFactoryRegistry;
    use crate::testkit::container::MemoryContainer;
    use crate::testkit::recording::RecordingNotifier;
    use crate::testkit::store::ScriptedStore;
    use crate::port::notifier::NotifierRegistry;

    async fn manager_with(store: Arc<ScriptedStore>, interval_ms: u64) -> (PersistenceManager, RecordingNotifier) {
        let mut factories = StoreFactoryRegistry::empty();
        factories.register_instance("scripted", store);
        let recorder = RecordingNotifier::new();
        let mut notifiers = NotifierRegistry::new();
        notifiers.register(Arc::new(recorder.clone()));

        let config = PersistenceConfig {
            availability_interval_ms: interval_ms,
            ..PersistenceConfig::default()
        }
        .with_store(StoreConfig::new("scripted"));
        let manager = PersistenceManager::builder(config)
            .container(Arc::new(MemoryContainer::new()))
            .factories(factories)
            .notifiers(notifiers)
            .build()
            .unwrap();
        manager.start().await.unwrap();
        (manager, recorder)
    }

    #[tokio::test]
    async fn poll_flips_availability_once_per_transition() {
        let store = Arc::new(ScriptedStore::new("scripted"));
        let (manager, recorder) = manager_with(Arc::clone(&store), 0).await;

        store.set_available(false);
        manager.poll_store_availability().await;
        manager.poll_store_availability().await;
        assert!(!manager.is_available());

        store.set_available(true);
        manager.poll_store_availability().await;
        manager.poll_store_availability().await;
        assert!(manager.is_available());

        assert_eq!(recorder.availability_changes(), vec![false, true]);
    }

    #[tokio::test]
    async fn monitor_is_not_spawned_without_interval() {
        let store = Arc::new(ScriptedStore::new("scripted"));
        let (manager, _) = manager_with(store, 0).await;
        assert!(!manager.is_monitoring());
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_polls_on_interval() {
        let store = Arc::new(ScriptedStore::new("scripted"));
        let calls = store.calls();
        let (manager, _) = manager_with(Arc::clone(&store), 100).await;
        assert!(manager.is_monitoring());

        store.set_available(false);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!manager.is_available());
        assert!(crate::testkit::store::StoreCalls::get(&calls.availability_checks) >= 2);

        manager.stop().await.unwrap();
        assert!(!manager.is_monitoring());
    }
}
