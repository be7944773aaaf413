//! The store list and its read/write discipline.
//!
//! Steady-state operations take a shared guard, first trying the
//! uncontended fast path and only awaiting when a structural change is in
//! progress. Structural changes (`start`, `stop`, `disable_store`) take the
//! exclusive guard. Every completed structural change bumps a generation
//! counter, which readers use to detect that the list changed under them.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use super::status::StoreStatus;

/// Shared guard over the store list. Owned, so it can live inside streams.
pub type StoresReadGuard = OwnedRwLockReadGuard<Vec<StoreStatus>>;

#[derive(Debug, Default)]
pub(crate) struct StoreList {
    stores: Arc<RwLock<Vec<StoreStatus>>>,
    /// Even when idle, odd while a writer holds the list.
    generation: Arc<AtomicU64>,
}

impl StoreList {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Shared access to the list.
    pub(crate) async fn read(&self) -> StoresReadGuard {
        let before = self.generation.load(Ordering::Acquire);
        if before % 2 == 0 {
            if let Ok(guard) = Arc::clone(&self.stores).try_read_owned() {
                if self.generation.load(Ordering::Acquire) == before {
                    return guard;
                }
                drop(guard);
            }
        }
        Arc::clone(&self.stores).read_owned().await
    }

    /// Exclusive access to the list.
    pub(crate) async fn write(&self) -> StoresWriteGuard {
        let guard = Arc::clone(&self.stores).write_owned().await;
        self.generation.fetch_add(1, Ordering::AcqRel);
        StoresWriteGuard {
            guard,
            generation: Arc::clone(&self.generation),
        }
    }

    /// Number of structural changes completed so far.
    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire) / 2
    }
}

/// Exclusive guard; completes the generation bump when dropped.
pub(crate) struct StoresWriteGuard {
    guard: OwnedRwLockWriteGuard<Vec<StoreStatus>>,
    generation: Arc<AtomicU64>,
}

impl Deref for StoresWriteGuard {
    type Target = Vec<StoreStatus>;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for StoresWriteGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl Drop for StoresWriteGuard {
    fn drop(&mut self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}
