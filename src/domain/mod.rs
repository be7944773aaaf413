//! Store-agnostic domain types.

pub mod characteristic;
pub mod entry;
pub mod key;
pub mod segment;
pub mod version;

pub use characteristic::{Characteristic, Characteristics};
pub use entry::{Entry, Metadata};
pub use key::{Key, Value};
pub use segment::{group_by_segment, SegmentGroup, SegmentSet};
pub use version::{EntryVersion, VersionOrdering};
