//! Builders for domain primitives used across tests.

use crate::domain::{Entry, EntryVersion, Key, SegmentSet};

/// Generate `n` keys named `k00`, `k01`, ...
pub fn make_keys(n: usize) -> Vec<Key> {
    (0..n).map(|i| Key::new(format!("k{i:02}"))).collect()
}

/// An entry with a string value.
pub fn entry(key: &str, value: &str) -> Entry {
    Entry::new(key, value)
}

/// An entry carrying a single-site version.
pub fn versioned(key: &str, value: &str, counter: u64) -> Entry {
    Entry::new(key, value).with_version(EntryVersion::new("site-a", counter))
}

/// Every segment of a `count`-segment keyspace.
pub fn all_segments(count: u32) -> SegmentSet {
    SegmentSet::range(count)
}
