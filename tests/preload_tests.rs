use std::sync::Arc;

use cache_persistence::domain::{Entry, Key};
use cache_persistence::error::Error;
use cache_persistence::infrastructure::config::{PersistenceConfig, StoreConfig};
use cache_persistence::persistence::{PreloadManager, StorePredicate};
use cache_persistence::port::PersistenceEvent;
use cache_persistence::testkit::config;
use cache_persistence::testkit::harness::Harness;
use cache_persistence::testkit::recording::{RecordingTransactionManager, TxOp};
use cache_persistence::testkit::store::ScriptedStore;
use tempfile::TempDir;

fn seeded(store_type: &str, count: usize) -> Arc<ScriptedStore> {
    let store = (0..count).fold(ScriptedStore::new(store_type), |store, i| {
        store.with_entry(0, Entry::new(format!("k{i:02}"), "v"))
    });
    Arc::new(store)
}

#[tokio::test]
async fn file_store_contents_are_preloaded_after_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cache.json");
    let store = || StoreConfig::new("file").with_location(&path).preload();

    let writer = Harness::builder(config::persistence_with([store()])).start().await;
    let entries: Vec<Entry> = (0..6).map(|i| Entry::new(format!("k{i}"), "v")).collect();
    writer
        .manager
        .write_batch(entries, StorePredicate::all())
        .await
        .unwrap();
    writer.manager.stop().await.unwrap();

    let reader = Harness::builder(config::persistence_with([store()])).start().await;
    let outcome = PreloadManager::from(&reader.manager).start().await.unwrap();

    assert_eq!(outcome.entries, 6);
    assert!(outcome.fully_preloaded);
    assert!(reader.manager.is_preloaded());
    assert_eq!(reader.container.len(), 6);
    assert!(reader.container.get("k5").is_some());
}

#[tokio::test]
async fn only_the_preload_store_is_read() {
    let source = seeded("source", 3);
    let other = seeded("other", 5);
    let harness = Harness::builder(config::persistence_with([
        StoreConfig::new("other"),
        StoreConfig::new("source").preload(),
    ]))
    .store("source", source)
    .store("other", other)
    .start()
    .await;

    let outcome = PreloadManager::new(harness.manager.clone()).start().await.unwrap();
    assert_eq!(outcome.entries, 3);
    assert_eq!(harness.container.len(), 3);
}

#[tokio::test]
async fn eviction_bound_limits_the_preload_and_is_reported() {
    let config = PersistenceConfig {
        eviction_max_count: Some(4),
        ..config::persistence()
    }
    .with_store(StoreConfig::new("source").preload());
    let harness = Harness::builder(config)
        .store("source", seeded("source", 10))
        .start()
        .await;

    let preload = PreloadManager::new(harness.manager.clone());
    let outcome = preload.start().await.unwrap();

    assert_eq!(outcome.entries, 4);
    assert!(!outcome.fully_preloaded);
    assert!(!preload.is_fully_preloaded());
    assert_eq!(harness.container.len(), 4);
    assert_eq!(
        harness.notifier.events().last(),
        Some(&PersistenceEvent::PreloadCompleted {
            entries: 4,
            fully_preloaded: false,
        })
    );
}

#[tokio::test]
async fn bound_equal_to_the_source_size_counts_as_partial() {
    let config = PersistenceConfig {
        eviction_max_count: Some(3),
        ..config::persistence()
    }
    .with_store(StoreConfig::new("source").preload());
    let harness = Harness::builder(config)
        .store("source", seeded("source", 3))
        .start()
        .await;

    let outcome = PreloadManager::new(harness.manager.clone()).start().await.unwrap();
    assert_eq!(outcome.entries, 3);
    assert!(!outcome.fully_preloaded);
}

#[tokio::test]
async fn volatile_index_behind_a_shared_store_is_rebuilt_from_preload() {
    let config = PersistenceConfig {
        volatile_indexing: true,
        ..config::persistence()
    }
    .with_store(StoreConfig::new("source").preload().shared());
    let harness = Harness::builder(config)
        .store("source", seeded("source", 1))
        .start()
        .await;

    PreloadManager::new(harness.manager.clone()).start().await.unwrap();
    let (entry, flags) = harness.container.inserted().pop().unwrap();
    assert_eq!(entry.key, Key::new("k00"));
    assert!(!flags.skip_indexing);
    assert!(flags.skip_cache_store);
    assert!(flags.state_insertion);
}

#[tokio::test]
async fn transactional_preload_commits_each_entry() {
    let config = PersistenceConfig {
        transactional: true,
        ..config::persistence()
    }
    .with_store(StoreConfig::new("source").preload());
    let transactions = RecordingTransactionManager::new();
    let harness = Harness::builder(config)
        .store("source", seeded("source", 2))
        .transactions(transactions.clone())
        .start()
        .await;

    PreloadManager::new(harness.manager.clone()).start().await.unwrap();
    assert_eq!(
        transactions.ops(),
        vec![
            TxOp::Suspend,
            TxOp::Begin,
            TxOp::Commit,
            TxOp::Suspend,
            TxOp::Begin,
            TxOp::Commit,
        ]
    );
}

#[tokio::test]
async fn preload_without_started_persistence_is_rejected() {
    let harness = Harness::builder(config::persistence_with([StoreConfig::new("memory").preload()])).build();
    let err = PreloadManager::new(harness.manager.clone())
        .start()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotStarted));
}
