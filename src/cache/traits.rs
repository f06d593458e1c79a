//! Cache trait and error types
//!
//! This module defines the trait interface for shared cache backends and
//! associated error types.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Trait for shared cache backend implementations
///
/// Entries are namespaced string values with an optional time-to-live.
/// Expired entries behave as misses: `get` returns `None` for them and
/// removes them from the backend.
pub trait Cache: Send {
    /// Looks up a value, treating expired entries as absent
    fn get(&mut self, namespace: &str, key: &str) -> CacheResult<Option<String>>;

    /// Stores a value, replacing any existing entry for the key
    ///
    /// A `ttl` of `None` means the entry never expires.
    fn set(
        &mut self,
        namespace: &str,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> CacheResult<()>;

    /// Removes an entry, returning true if one existed
    fn delete(&mut self, namespace: &str, key: &str) -> CacheResult<bool>;

    /// Removes every entry in a namespace, returning the count removed
    fn clear_namespace(&mut self, namespace: &str) -> CacheResult<u32>;

    /// Removes all expired entries, returning the count removed
    fn purge_expired(&mut self) -> CacheResult<u32>;
}
