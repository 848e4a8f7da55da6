pub mod entry;
pub mod manager;
pub mod path;

pub use entry::{CacheEntry, CacheFile};
pub use manager::{CacheLookup, CacheManager, CacheStats, InvalidationReason};
