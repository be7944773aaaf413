//! Keyspace segments and segment-grouped batches.

use std::collections::{BTreeMap, BTreeSet};

/// A set of segment ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentSet(BTreeSet<u32>);

impl SegmentSet {
    /// Every segment in `[0, count)`.
    #[must_use]
    pub fn range(count: u32) -> Self {
        Self((0..count).collect())
    }

    #[must_use]
    pub fn contains(&self, segment: u32) -> bool {
        self.0.contains(&segment)
    }

    pub fn insert(&mut self, segment: u32) -> bool {
        self.0.insert(segment)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<u32> for SegmentSet {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Items of a bulk operation that share a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentGroup<T> {
    pub segment: u32,
    pub items: Vec<T>,
}

/// Group `items` by the segment `segment_of` assigns them.
///
/// When `segmentable` is false every item lands in a single group for
/// segment 0, which is how non-segmented stores are addressed.
pub fn group_by_segment<T, F>(items: Vec<T>, segmentable: bool, segment_of: F) -> Vec<SegmentGroup<T>>
where
    F: Fn(&T) -> u32,
{
    if items.is_empty() {
        return Vec::new();
    }
    if !segmentable {
        return vec![SegmentGroup { segment: 0, items }];
    }
    let mut groups: BTreeMap<u32, Vec<T>> = BTreeMap::new();
    for item in items {
        groups.entry(segment_of(&item)).or_default().push(item);
    }
    groups
        .into_iter()
        .map(|(segment, items)| SegmentGroup { segment, items })
        .collect()
}
