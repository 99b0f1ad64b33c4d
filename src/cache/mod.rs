//! Caching layers.
//!
//! - `store`: per-file tags in redb, validated by mtime, self-healing
//! - `results`: whole assembled maps per request fingerprint, in-process

mod results;
mod store;

pub use results::{Fingerprint, ResultCache};
pub use store::{cache_dir_name, CacheEntry, CacheStats, DurableStore, MemoryStore, TagCache, TagStore};
