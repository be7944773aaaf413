//! In-memory [`DataContainer`] recording what the persistence layer did.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::{Entry, Key};
use crate::error::{Error, Result};
use crate::port::container::{DataContainer, InsertFlags};

type ComputeHook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
pub struct MemoryContainer {
    entries: Mutex<HashMap<Key, Entry>>,
    inserted: Mutex<Vec<(Entry, InsertFlags)>>,
    expired: Mutex<Vec<Entry>>,
    fail_inserts: AtomicU32,
    after_compute: Mutex<Option<ComputeHook>>,
}

impl MemoryContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put an entry in memory directly, as a user write would.
    pub fn put(&self, entry: Entry) {
        self.entries.lock().insert(entry.key.clone(), entry);
    }

    pub fn remove(&self, key: &str) -> Option<Entry> {
        self.entries.lock().remove(&Key::from(key))
    }

    pub fn get(&self, key: &str) -> Option<Entry> {
        self.entries.lock().get(&Key::from(key)).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries reinserted through [`DataContainer::insert`], with their flags.
    pub fn inserted(&self) -> Vec<(Entry, InsertFlags)> {
        self.inserted.lock().clone()
    }

    /// Entries reported expired by stores.
    pub fn expired(&self) -> Vec<Entry> {
        self.expired.lock().clone()
    }

    /// Run `hook` once, right after the next `compute` releases the key.
    /// Lets a test interleave another writer at the narrowest point.
    pub fn after_next_compute(&self, hook: impl FnOnce() + Send + 'static) {
        *self.after_compute.lock() = Some(Box::new(hook));
    }

    /// Fail the next `n` inserts.
    pub fn fail_next_inserts(&self, n: u32) {
        self.fail_inserts.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl DataContainer for MemoryContainer {
    fn compute(&self, key: &Key, f: &mut (dyn FnMut(Option<&Entry>) + Send)) {
        {
            let entries = self.entries.lock();
            f(entries.get(key));
        }
        let hook = self.after_compute.lock().take();
        if let Some(hook) = hook {
            hook();
        }
    }

    async fn insert(&self, entry: Entry, flags: InsertFlags) -> Result<()> {
        let fail = self
            .fail_inserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(Error::store(
                "container",
                format!("scripted insert failure for {}", entry.key),
            ));
        }
        self.inserted.lock().push((entry.clone(), flags));
        self.entries.lock().insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn on_store_expired(&self, entry: Entry) -> Result<()> {
        self.entries.lock().remove(&entry.key);
        self.expired.lock().push(entry);
        Ok(())
    }
}
