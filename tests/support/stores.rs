use std::sync::Arc;

use cache_persistence::domain::Characteristic;
use cache_persistence::testkit::store::ScriptedStore;

pub fn scripted(store_type: &str) -> Arc<ScriptedStore> {
    Arc::new(ScriptedStore::new(store_type))
}

/// A store that cannot publish, only point reads and writes.
pub fn point_only(store_type: &str) -> Arc<ScriptedStore> {
    Arc::new(ScriptedStore::new(store_type).with_characteristics(&[Characteristic::Segmentable]))
}
