//! Single-file JSON store.
//!
//! Keeps the full content in memory and rewrites the file after every
//! modification using write-to-temp-then-rename. A change is applied to a
//! copy of the map and only becomes visible once that copy is on disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::{Characteristic, Characteristics, Entry, Key, SegmentGroup, SegmentSet};
use crate::error::Result;
use crate::port::partitioner::KeyPartitioner;
use crate::port::store::{EntryStream, InitContext, KeyFilter, NonBlockingStore};

/// Current file format version.
const FILE_VERSION: &str = "1";

#[derive(Debug, Serialize, Deserialize)]
struct FileContent {
    version: String,
    entries: Vec<Entry>,
}

type EntryMap = HashMap<Key, Entry>;

struct Files {
    path: PathBuf,
    entries: RwLock<EntryMap>,
    /// Held across every modification so copies never race each other.
    flush: tokio::sync::Mutex<()>,
}

impl Files {
    async fn read_file(&self) -> Result<EntryMap> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e.into()),
        };
        let content: FileContent = serde_json::from_slice(&bytes)?;
        Ok(content
            .entries
            .into_iter()
            .map(|e| (e.key.clone(), e))
            .collect())
    }

    async fn write_file(&self, entries: &EntryMap) -> Result<()> {
        let mut sorted: Vec<&Entry> = entries.values().collect();
        sorted.sort_by(|a, b| a.key.cmp(&b.key));
        let json = serde_json::to_vec_pretty(&FileContent {
            version: FILE_VERSION.to_string(),
            entries: sorted.into_iter().cloned().collect(),
        })?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp_path = self.path.with_extension("tmp");
        if let Err(e) = tokio::fs::write(&temp_path, &json).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&temp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        debug!(path = %self.path.display(), bytes = json.len(), "File store flushed");
        Ok(())
    }

    /// Apply `change` to a copy of the entries, write the copy, then swap it
    /// in. `change` reports whether it touched anything; an untouched copy
    /// is neither written nor swapped.
    async fn modify<T>(&self, change: impl FnOnce(&mut EntryMap) -> (T, bool)) -> Result<T> {
        let _guard = self.flush.lock().await;
        let mut next = self.entries.read().clone();
        let (outcome, changed) = change(&mut next);
        if changed {
            if let Err(e) = self.write_file(&next).await {
                warn!(path = %self.path.display(), error = %e, "File store write failed, change discarded");
                return Err(e);
            }
            *self.entries.write() = next;
        }
        Ok(outcome)
    }

    async fn persist(&self) -> Result<()> {
        let _guard = self.flush.lock().await;
        let snapshot = self.entries.read().clone();
        self.write_file(&snapshot).await
    }
}

/// Store persisting all entries into one JSON file.
pub struct FileStore {
    files: Arc<Files>,
    partitioner: Arc<Mutex<Option<Arc<dyn KeyPartitioner>>>>,
}

impl FileStore {
    pub const TYPE: &'static str = "file";

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            files: Arc::new(Files {
                path: path.into(),
                entries: RwLock::new(HashMap::new()),
                flush: tokio::sync::Mutex::new(()),
            }),
            partitioner: Arc::new(Mutex::new(None)),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.files.path
    }
}

#[async_trait]
impl NonBlockingStore for FileStore {
    fn store_type(&self) -> &str {
        Self::TYPE
    }

    async fn start(&self, ctx: &InitContext) -> Result<()> {
        *self.partitioner.lock() = Some(Arc::clone(&ctx.partitioner));

        if ctx.config.purge_on_startup {
            self.files
                .modify(|entries| {
                    entries.clear();
                    ((), true)
                })
                .await?;
            info!(path = %self.path().display(), "File store purged on startup");
            return Ok(());
        }

        let loaded = self.files.read_file().await?;
        info!(path = %self.path().display(), entries = loaded.len(), "File store opened");
        *self.files.entries.write() = loaded;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.files.persist().await
    }

    fn characteristics(&self) -> Characteristics {
        Characteristics::of(&[Characteristic::BulkRead, Characteristic::ExpirationAware])
    }

    async fn load(&self, _segment: u32, key: &Key) -> Result<Option<Entry>> {
        Ok(self
            .files
            .entries
            .read()
            .get(key)
            .filter(|e| !e.metadata.is_expired(Utc::now()))
            .cloned())
    }

    async fn write(&self, _segment: u32, entry: Entry) -> Result<()> {
        self.files
            .modify(|entries| {
                entries.insert(entry.key.clone(), entry);
                ((), true)
            })
            .await
    }

    async fn delete(&self, _segment: u32, key: &Key) -> Result<bool> {
        self.files
            .modify(|entries| {
                let removed = entries.remove(key).is_some();
                (removed, removed)
            })
            .await
    }

    async fn clear(&self) -> Result<()> {
        self.files
            .modify(|entries| {
                entries.clear();
                ((), true)
            })
            .await
    }

    async fn bulk_write(&self, _segment_count: u32, groups: Vec<SegmentGroup<Entry>>) -> Result<()> {
        self.files
            .modify(|entries| {
                for entry in groups.into_iter().flat_map(|g| g.items) {
                    entries.insert(entry.key.clone(), entry);
                }
                ((), true)
            })
            .await
    }

    async fn bulk_delete(&self, _segment_count: u32, groups: Vec<SegmentGroup<Key>>) -> Result<()> {
        self.files
            .modify(|entries| {
                let before = entries.len();
                for key in groups.iter().flat_map(|g| g.items.iter()) {
                    entries.remove(key);
                }
                ((), entries.len() != before)
            })
            .await
    }

    fn publish_entries(
        &self,
        segments: &SegmentSet,
        filter: Option<KeyFilter>,
        fetch_value: bool,
    ) -> EntryStream {
        let files = Arc::clone(&self.files);
        let partitioner = Arc::clone(&self.partitioner);
        let wanted = segments.clone();
        stream::once(async move {
            let now = Utc::now();
            let partitioner = partitioner.lock().clone();
            let entries = files.entries.read();
            entries
                .values()
                .filter(|e| !e.metadata.is_expired(now))
                .filter(|e| match &partitioner {
                    Some(p) => wanted.contains(p.segment(&e.key)),
                    None => true,
                })
                .filter(|e| filter.as_ref().map_or(true, |f| f(&e.key)))
                .map(|e| if fetch_value { e.clone() } else { e.without_value() })
                .collect::<Vec<_>>()
        })
        .flat_map(|entries| stream::iter(entries.into_iter().map(Ok)))
        .boxed()
    }

    /// Expired entries are dropped from the file too; nothing is yielded if
    /// that rewrite fails.
    fn purge_expired(&self) -> EntryStream {
        let files = Arc::clone(&self.files);
        stream::once(async move {
            let now = Utc::now();
            let purged = files
                .modify(|entries| {
                    let mut purged = Vec::new();
                    entries.retain(|_, e| {
                        if e.metadata.is_expired(now) {
                            purged.push(e.clone());
                            false
                        } else {
                            true
                        }
                    });
                    let changed = !purged.is_empty();
                    (purged, changed)
                })
                .await;
            match purged {
                Ok(purged) => purged.into_iter().map(Ok).collect(),
                Err(e) => vec![Err(e)],
            }
        })
        .flat_map(stream::iter)
        .boxed()
    }
}
