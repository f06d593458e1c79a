//! Shared cache module
//!
//! A namespaced key-value cache with per-entry TTLs, used to share expensive
//! state (the proxy pool above all) across crawl runs and processes. The
//! durable backend is SQLite; every consumer goes through [`FallbackCache`],
//! which degrades to an in-process cache whenever the backend fails, so cache
//! trouble surfaces as a miss rather than a crawl error.

mod fallback;
mod memory;
mod sqlite;
mod traits;

pub use fallback::FallbackCache;
pub use memory::MemoryCache;
pub use sqlite::SqliteCache;
pub use traits::{Cache, CacheError, CacheResult};

use std::path::Path;

/// Opens the shared cache at the given path
///
/// Never fails: if the SQLite backend cannot be opened the returned cache
/// starts degraded, running on process-local memory only.
pub fn open_cache(path: &Path) -> FallbackCache {
    match SqliteCache::new(path) {
        Ok(primary) => FallbackCache::new(Box::new(primary)),
        Err(e) => {
            tracing::warn!(
                "Could not open cache database at {}, using in-memory cache: {}",
                path.display(),
                e
            );
            FallbackCache::new(Box::new(MemoryCache::new()))
        }
    }
}
