//! Built-in store implementations.
//!
//! - [`MemoryStore`]: segmented in-memory maps.
//! - [`FileStore`]: a single JSON file, rewritten atomically.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;
