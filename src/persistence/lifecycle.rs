//! Starting, stopping and disabling stores.
//!
//! These are the only operations taking the store list exclusively, and the
//! only ones that wait for whole chains of store operations to settle before
//! returning. Steady-state operations never do.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future;
use tracing::{debug, info, warn};

use super::async_store::AsyncStore;
use super::availability;
use super::status::{resolve_characteristics, StoreHandle, StoreStatus};
use super::PersistenceManager;
use crate::domain::Characteristic;
use crate::error::Result;
use crate::infrastructure::config::store::StoreConfig;
use crate::port::interceptor::InterceptorKind;
use crate::port::notifier::PersistenceEvent;
use crate::port::store::InitContext;

/// Delay between write-behind retries when the monitor is disabled.
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

impl PersistenceManager {
    /// Start every configured store in declared order.
    ///
    /// Stores are started concurrently but recorded in configuration order.
    /// A store that fails to start is still recorded so [`stop`] can close
    /// it; it never takes part in routing, and the first failure is
    /// returned once every store has settled.
    ///
    /// Does nothing when no store is configured or when already started.
    ///
    /// [`stop`]: PersistenceManager::stop
    pub async fn start(&self) -> Result<()> {
        let config = &self.inner.config;
        if !config.using_stores() {
            debug!("No stores configured, persistence stays disabled");
            return Ok(());
        }
        if self.is_enabled() {
            return Ok(());
        }

        let mut stores = self.inner.stores.write().await;
        if !stores.is_empty() {
            // A failed start left records behind; they are released by stop().
            warn!(stores = stores.len(), "Stores already registered, stop before restarting");
            return Ok(());
        }
        let retry_delay = config.availability_interval().unwrap_or(DEFAULT_RETRY_DELAY);

        let mut handles = Vec::with_capacity(config.stores.len());
        for store_config in &config.stores {
            let store = self.inner.factories.create(store_config)?;
            let handle = if store_config.async_config.enabled {
                StoreHandle::Async(Arc::new(AsyncStore::new(
                    store,
                    store_config.async_config.clone(),
                    config.connection_attempts,
                    retry_delay,
                )))
            } else {
                StoreHandle::Direct(store)
            };
            handles.push((handle, store_config.clone()));
        }

        let contexts: Vec<InitContext> = handles
            .iter()
            .map(|(_, store_config)| self.init_context(store_config))
            .collect();
        let results = future::join_all(
            handles
                .iter()
                .zip(&contexts)
                .map(|((handle, _), ctx)| handle.store().start(ctx)),
        )
        .await;

        let mut first_error = None;
        for ((handle, store_config), result) in handles.into_iter().zip(results) {
            let resolved = result.and_then(|()| {
                resolve_characteristics(handle.store().characteristics(), &store_config)
            });
            match resolved {
                Ok(characteristics) => {
                    debug!(store = %store_config.store_type, ?characteristics, "Store started");
                    stores.push(StoreStatus::started(handle, store_config, characteristics));
                }
                Err(e) => {
                    warn!(store = %store_config.store_type, error = %e, "Store failed to start");
                    stores.push(StoreStatus::failed(handle));
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        let purges = stores
            .iter()
            .filter(|s| s.config().is_some_and(|c| c.purge_on_startup))
            .filter_map(|s| {
                if s.has(Characteristic::ReadOnly) {
                    warn!(store = s.handle.underlying_type(), "Skipping purge of read-only store");
                    None
                } else {
                    Some(s.store().clear())
                }
            });
        future::try_join_all(purges).await?;

        *self.inner.unavailable.write() = None;
        self.inner.preloaded.store(false, Ordering::Release);
        self.inner.enabled.store(true, Ordering::Release);
        info!(stores = stores.len(), "Persistence started");
        drop(stores);

        if let Some(interval) = config.availability_interval() {
            let handle = availability::spawn_monitor(&self.inner, interval);
            if let Some(previous) = self.inner.monitor.lock().replace(handle) {
                previous.abort();
            }
        }
        Ok(())
    }

    /// Stop every store, clearing them first when `clear_on_stop` is set.
    ///
    /// All stores are stopped even if some fail; the first failure is
    /// returned afterwards. Nothing survives a stop except what the stores
    /// persisted themselves: ordered-update tokens and passivation overlays
    /// of units built on this manager are dropped too.
    pub async fn stop(&self) -> Result<()> {
        self.inner.stop_monitor();
        let mut stores = self.inner.stores.write().await;

        if self.inner.clear_on_stop.load(Ordering::Acquire) {
            let clears = future::join_all(
                stores
                    .iter()
                    .filter(|s| s.is_routable() && !s.has(Characteristic::ReadOnly))
                    .map(|s| s.store().clear()),
            )
            .await;
            for e in clears.into_iter().filter_map(|r| r.err()) {
                warn!(error = %e, "Failed to clear store on stop");
            }
        }

        let stops = future::join_all(stores.iter().map(|s| s.store().stop())).await;
        let mut first_error = None;
        for (status, result) in stores.iter().zip(stops) {
            if let Err(e) = result {
                warn!(store = status.handle.underlying_type(), error = %e, "Failed to stop store");
                first_error.get_or_insert(e);
            }
        }

        let stopped = stores.len();
        stores.clear();
        self.inner.enabled.store(false, Ordering::Release);
        self.inner.preloaded.store(false, Ordering::Release);
        *self.inner.unavailable.write() = None;
        drop(stores);
        self.inner.notify_stop_listeners();

        info!(stores = stopped, "Persistence stopped");
        first_error.map_or(Ok(()), Err)
    }

    /// Remove every store whose underlying type is `store_type` and stop it.
    ///
    /// When no store remains, persistence is disabled and the loader and
    /// writer interceptors are removed from the request pipeline.
    pub async fn disable_store(&self, store_type: &str) -> Result<()> {
        if !self.is_enabled() {
            debug!(store = store_type, "Persistence not enabled, nothing to disable");
            return Ok(());
        }

        let (removed, remaining) = {
            let mut stores = self.inner.stores.write().await;
            let (removed, kept): (Vec<StoreStatus>, Vec<StoreStatus>) = std::mem::take(&mut *stores)
                .into_iter()
                .partition(|s| s.handle.underlying_type() == store_type);
            *stores = kept;

            let all_available = stores
                .iter()
                .filter(|s| s.is_routable())
                .all(StoreStatus::is_available);
            if !removed.is_empty() && all_available {
                *self.inner.unavailable.write() = None;
            }
            if stores.is_empty() {
                self.inner.enabled.store(false, Ordering::Release);
            }
            (removed, stores.len())
        };

        if removed.is_empty() {
            debug!(store = store_type, "No store of this type configured");
            return Ok(());
        }

        let stops = future::join_all(removed.iter().map(|s| s.store().stop())).await;
        for e in stops.into_iter().filter_map(|r| r.err()) {
            warn!(store = store_type, error = %e, "Failed to stop disabled store");
        }

        if remaining == 0 {
            self.inner.stop_monitor();
            self.remove_interceptors();
        }

        info!(store = store_type, disabled = removed.len(), remaining, "Store disabled");
        self.inner.notify(PersistenceEvent::StoreDisabled {
            store_type: store_type.to_string(),
            remaining,
        });
        Ok(())
    }

    fn remove_interceptors(&self) {
        let Some(chain) = &self.inner.interceptors else {
            debug!("No interceptor chain attached");
            return;
        };
        if !chain.remove(InterceptorKind::Loader) {
            warn!(interceptor = %InterceptorKind::Loader, "Interceptor not found while disabling persistence");
        }
        if !chain.remove(InterceptorKind::Writer) && !chain.remove(InterceptorKind::TransactionalWriter) {
            warn!(
                interceptor = %InterceptorKind::Writer,
                "Neither writer interceptor found while disabling persistence"
            );
        }
    }

    fn init_context(&self, config: &StoreConfig) -> InitContext {
        InitContext {
            config: config.clone(),
            segment_count: self.inner.config.num_segments,
            partitioner: Arc::clone(&self.inner.partitioner),
        }
    }
}
