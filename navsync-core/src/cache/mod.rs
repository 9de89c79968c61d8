//! Two-tier caching: fast in-process tier over a durable store.

pub mod durable;
pub mod entry;
mod fast_tier;
pub mod tiered;

pub use durable::{DurableStore, FileStore, MemoryStore};
pub use entry::{CacheEntry, DataType, EntrySource, Payload, StoredRecord, TtlPolicy};
pub use tiered::{CacheStats, TieredCache};
