mod support;

use std::time::Duration;

use futures_util::StreamExt;

use cache_persistence::domain::{Entry, Key, SegmentSet};
use cache_persistence::error::Error;
use cache_persistence::infrastructure::config::{PersistenceConfig, StoreConfig};
use cache_persistence::persistence::{LoadOptions, StorePredicate};
use cache_persistence::testkit::config::{self, SEGMENTS};
use cache_persistence::testkit::harness::Harness;
use cache_persistence::testkit::store::StoreCalls;
use tokio_test::{assert_err, assert_ok};

use support::stores::scripted;

#[tokio::test]
async fn down_store_fails_every_operation_fast() {
    let a = scripted("a");
    let harness = Harness::builder(config::persistence_with([StoreConfig::new("a")]))
        .store("a", a.clone())
        .start()
        .await;
    let manager = &harness.manager;
    let key = Key::new("k");

    a.set_available(false);
    manager.poll_store_availability().await;
    assert!(!manager.is_available());

    let err = manager.load(0, &key, LoadOptions::default()).await.unwrap_err();
    assert!(matches!(err, Error::StoreUnavailable(_)));
    assert_err!(
        manager
            .write_to_all_stores(0, Entry::new("k", "v"), StorePredicate::all())
            .await
    );
    assert_err!(manager.delete_from_all_stores(0, &key, StorePredicate::all()).await);
    assert_err!(manager.size_all(StorePredicate::all()).await);

    let mut keys = manager.publish_keys(&SegmentSet::range(SEGMENTS), None, StorePredicate::all());
    assert!(matches!(keys.next().await, Some(Err(Error::StoreUnavailable(_)))));

    assert_eq!(StoreCalls::get(&a.calls().loads), 0);
    assert_eq!(StoreCalls::get(&a.calls().writes), 0);
}

#[tokio::test]
async fn recovery_restores_operations_and_notifies_each_transition() {
    let a = scripted("a");
    let harness = Harness::builder(config::persistence_with([StoreConfig::new("a")]))
        .store("a", a.clone())
        .start()
        .await;
    let manager = &harness.manager;

    a.set_available(false);
    manager.poll_store_availability().await;
    a.set_available(true);
    manager.poll_store_availability().await;

    assert!(manager.is_available());
    assert_ok!(
        manager
            .write_to_all_stores(0, Entry::new("k", "v"), StorePredicate::all())
            .await
    );
    assert_eq!(harness.notifier.availability_changes(), vec![false, true]);
}

#[tokio::test]
async fn poll_stops_at_the_first_down_store() {
    let a = scripted("a");
    let b = scripted("b");
    let harness = Harness::builder(config::persistence_with([
        StoreConfig::new("a"),
        StoreConfig::new("b"),
    ]))
    .store("a", a.clone())
    .store("b", b.clone())
    .start()
    .await;

    a.set_available(false);
    harness.manager.poll_store_availability().await;

    assert_eq!(StoreCalls::get(&a.calls().availability_checks), 1);
    assert_eq!(StoreCalls::get(&b.calls().availability_checks), 0);
    let err = harness
        .manager
        .size_all(StorePredicate::all())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("store a is unavailable"));
}

#[tokio::test(start_paused = true)]
async fn background_monitor_detects_and_clears_outages() {
    let a = scripted("a");
    let config = PersistenceConfig {
        availability_interval_ms: 1_000,
        ..config::persistence()
    }
    .with_store(StoreConfig::new("a"));
    let harness = Harness::builder(config).store("a", a.clone()).start().await;
    let manager = &harness.manager;
    assert!(manager.is_monitoring());

    a.set_available(false);
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert!(!manager.is_available());

    a.set_available(true);
    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert!(manager.is_available());
    assert_eq!(harness.notifier.availability_changes(), vec![false, true]);

    manager.stop().await.unwrap();
    assert!(!manager.is_monitoring());
}
