mod support;

use std::sync::Arc;
use std::time::Duration;

use cache_persistence::domain::{Entry, Key, SegmentSet};
use cache_persistence::infrastructure::config::StoreConfig;
use cache_persistence::persistence::{LoadOptions, PassivationManager, StorePredicate};
use cache_persistence::port::SIZE_UNKNOWN;
use cache_persistence::testkit::config::{self, SEGMENTS};
use cache_persistence::testkit::harness::Harness;
use cache_persistence::testkit::store::{ScriptedStore, StoreCalls};
use tokio_test::assert_ok;

use support::stores::scripted;

#[tokio::test]
async fn passivated_entries_land_in_the_memory_store() {
    let harness = Harness::builder(config::persistence_with([StoreConfig::new("memory")]))
        .start()
        .await;
    let passivation = PassivationManager::new(harness.manager.clone());

    for i in 0..8 {
        let entry = Entry::new(format!("k{i}"), format!("v{i}"));
        let segment = harness.manager.partitioner().segment(&entry.key);
        assert_ok!(passivation.passivate(entry, segment).await);
    }
    assert_eq!(passivation.in_flight(), 0);

    let all = SegmentSet::range(SEGMENTS);
    assert_eq!(passivation.size(&all, StorePredicate::all()).await.unwrap(), 8);
    let key = Key::new("k3");
    let loaded = passivation
        .load(harness.manager.partitioner().segment(&key), &key, LoadOptions::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.value, Some("v3".into()));
}

#[tokio::test]
async fn in_flight_entries_are_visible_to_loads_and_publishes() {
    let slow = Arc::new(
        ScriptedStore::new("slow")
            .with_latency(Duration::from_millis(40))
            .with_entry(0, Entry::new("stored", "v")),
    );
    let harness = Harness::builder(config::persistence_with([StoreConfig::new("slow")]))
        .store("slow", slow.clone())
        .start()
        .await;
    let passivation = PassivationManager::new(harness.manager.clone());
    let all = SegmentSet::range(SEGMENTS);

    let pending = passivation.passivate(Entry::new("evicted", "v"), 0);
    assert_eq!(passivation.in_flight(), 1);

    let loaded = passivation
        .load(0, &Key::new("evicted"), LoadOptions::default())
        .await
        .unwrap();
    assert!(loaded.is_some());
    assert_eq!(
        passivation.size(&all, StorePredicate::all()).await.unwrap(),
        SIZE_UNKNOWN
    );

    let keys = support::sorted_keys(passivation.publish_keys(&all, None, StorePredicate::all())).await;
    assert_eq!(keys, support::keys(&["evicted", "stored"]));

    assert_ok!(pending.await);
    assert_eq!(passivation.in_flight(), 0);
    let keys = support::sorted_keys(passivation.publish_keys(&all, None, StorePredicate::all())).await;
    assert_eq!(keys, support::keys(&["evicted", "stored"]));
}

#[tokio::test]
async fn write_failure_is_reported_and_the_overlay_cleared() {
    let a = scripted("a");
    let harness = Harness::builder(config::persistence_with([StoreConfig::new("a")]))
        .store("a", a.clone())
        .start()
        .await;
    let passivation = PassivationManager::new(harness.manager.clone());

    a.fail_next_writes(1);
    assert!(passivation.passivate(Entry::new("k", "v"), 0).await.is_err());
    assert_eq!(passivation.in_flight(), 0);
    assert!(passivation
        .load(0, &Key::new("k"), LoadOptions::default())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn only_private_stores_receive_passivated_entries() {
    let private = scripted("private");
    let shared = scripted("shared");
    let harness = Harness::builder(config::persistence_with([
        StoreConfig::new("private"),
        StoreConfig::new("shared").shared(),
    ]))
    .store("private", private.clone())
    .store("shared", shared.clone())
    .start()
    .await;
    let passivation = PassivationManager::new(harness.manager.clone());

    passivation
        .passivate(Entry::new("k", "v"), 0)
        .await
        .unwrap();
    assert!(private.get("k").is_some());
    assert_eq!(StoreCalls::get(&shared.calls().writes), 0);
}
