//! Key to segment mapping.

use crate::domain::Key;

/// Maps keys onto segments in `[0, segment_count)`.
pub trait KeyPartitioner: Send + Sync {
    fn segment(&self, key: &Key) -> u32;

    fn segment_count(&self) -> u32;
}

/// FNV-1a based partitioner. Stable across processes, so segment ids can be
/// persisted by stores.
#[derive(Debug, Clone, Copy)]
pub struct HashPartitioner {
    segments: u32,
}

impl HashPartitioner {
    /// A `segments` of zero is treated as one.
    #[must_use]
    pub fn new(segments: u32) -> Self {
        Self {
            segments: segments.max(1),
        }
    }
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

impl KeyPartitioner for HashPartitioner {
    fn segment(&self, key: &Key) -> u32 {
        let hash = key
            .as_str()
            .bytes()
            .fold(FNV_OFFSET, |h, b| (h ^ u64::from(b)).wrapping_mul(FNV_PRIME));
        (hash % u64::from(self.segments)) as u32
    }

    fn segment_count(&self) -> u32 {
        self.segments
    }
}
