//! Logical entry versions used to order store updates.
//!
//! A version is a small vector clock: one counter per site that has written
//! the entry. Two versions written concurrently on different sites compare as
//! [`VersionOrdering::Conflicting`].

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Result of comparing two versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionOrdering {
    Before,
    Equal,
    After,
    Conflicting,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryVersion {
    counters: BTreeMap<String, u64>,
}

impl EntryVersion {
    /// A version with a single site counter.
    pub fn new(site: impl Into<String>, counter: u64) -> Self {
        let mut counters = BTreeMap::new();
        counters.insert(site.into(), counter);
        Self { counters }
    }

    /// Returns a copy with `site`'s counter advanced by one.
    #[must_use]
    pub fn increment(&self, site: &str) -> Self {
        let mut next = self.clone();
        *next.counters.entry(site.to_string()).or_insert(0) += 1;
        next
    }

    #[must_use]
    pub fn counter(&self, site: &str) -> u64 {
        self.counters.get(site).copied().unwrap_or(0)
    }

    /// Compare `self` against `other`.
    ///
    /// `After` means `self` dominates `other` on every site and is strictly
    /// greater on at least one.
    #[must_use]
    pub fn compare(&self, other: &EntryVersion) -> VersionOrdering {
        let mut ordering = Ordering::Equal;
        let sites = self.counters.keys().chain(other.counters.keys());
        for site in sites {
            let step = self.counter(site).cmp(&other.counter(site));
            ordering = match (ordering, step) {
                (current, Ordering::Equal) => current,
                (Ordering::Equal, next) => next,
                (current, next) if current == next => current,
                _ => return VersionOrdering::Conflicting,
            };
        }
        match ordering {
            Ordering::Less => VersionOrdering::Before,
            Ordering::Equal => VersionOrdering::Equal,
            Ordering::Greater => VersionOrdering::After,
        }
    }
}

impl fmt::Display for EntryVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, (site, counter)) in self.counters.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{site}:{counter}")?;
        }
        write!(f, "]")
    }
}
