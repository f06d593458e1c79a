//! Degrading cache wrapper
//!
//! Cache trouble must never become crawl trouble. `FallbackCache` forwards to
//! a primary backend and, whenever the primary fails, absorbs the error and
//! serves a process-local `MemoryCache` instead. Every write is mirrored into
//! the memory tier so reads keep working after the primary goes away.

use crate::cache::memory::MemoryCache;
use crate::cache::traits::{Cache, CacheResult};
use std::time::Duration;

/// Cache wrapper that degrades to in-process memory instead of failing
///
/// All trait methods return `Ok`; a broken primary backend downgrades the
/// affected operation to the memory tier (a miss at worst).
pub struct FallbackCache {
    primary: Box<dyn Cache>,
    fallback: MemoryCache,
    degraded: bool,
}

impl FallbackCache {
    pub fn new(primary: Box<dyn Cache>) -> Self {
        Self {
            primary,
            fallback: MemoryCache::new(),
            degraded: false,
        }
    }

    /// True once any primary operation has failed
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    fn note_failure(&mut self, op: &str, error: &crate::cache::CacheError) {
        if !self.degraded {
            tracing::warn!(
                "Cache backend failed during {}, degrading to in-memory cache: {}",
                op,
                error
            );
            self.degraded = true;
        } else {
            tracing::debug!("Cache backend still failing during {}: {}", op, error);
        }
    }
}

impl Cache for FallbackCache {
    fn get(&mut self, namespace: &str, key: &str) -> CacheResult<Option<String>> {
        match self.primary.get(namespace, key) {
            Ok(value) => Ok(value),
            Err(e) => {
                self.note_failure("get", &e);
                Ok(self.fallback.get(namespace, key).unwrap_or(None))
            }
        }
    }

    fn set(
        &mut self,
        namespace: &str,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        // Mirror first so the value survives a primary failure
        let _ = self.fallback.set(namespace, key, value, ttl);

        if let Err(e) = self.primary.set(namespace, key, value, ttl) {
            self.note_failure("set", &e);
        }

        Ok(())
    }

    fn delete(&mut self, namespace: &str, key: &str) -> CacheResult<bool> {
        let in_fallback = self.fallback.delete(namespace, key).unwrap_or(false);

        match self.primary.delete(namespace, key) {
            Ok(in_primary) => Ok(in_primary || in_fallback),
            Err(e) => {
                self.note_failure("delete", &e);
                Ok(in_fallback)
            }
        }
    }

    fn clear_namespace(&mut self, namespace: &str) -> CacheResult<u32> {
        let from_fallback = self.fallback.clear_namespace(namespace).unwrap_or(0);

        match self.primary.clear_namespace(namespace) {
            Ok(from_primary) => Ok(from_primary.max(from_fallback)),
            Err(e) => {
                self.note_failure("clear_namespace", &e);
                Ok(from_fallback)
            }
        }
    }

    fn purge_expired(&mut self) -> CacheResult<u32> {
        let from_fallback = self.fallback.purge_expired().unwrap_or(0);

        match self.primary.purge_expired() {
            Ok(from_primary) => Ok(from_primary.max(from_fallback)),
            Err(e) => {
                self.note_failure("purge_expired", &e);
                Ok(from_fallback)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheError;

    /// A primary backend where every operation fails
    struct BrokenCache;

    impl Cache for BrokenCache {
        fn get(&mut self, _: &str, _: &str) -> CacheResult<Option<String>> {
            Err(CacheError::Backend("disk on fire".to_string()))
        }

        fn set(&mut self, _: &str, _: &str, _: &str, _: Option<Duration>) -> CacheResult<()> {
            Err(CacheError::Backend("disk on fire".to_string()))
        }

        fn delete(&mut self, _: &str, _: &str) -> CacheResult<bool> {
            Err(CacheError::Backend("disk on fire".to_string()))
        }

        fn clear_namespace(&mut self, _: &str) -> CacheResult<u32> {
            Err(CacheError::Backend("disk on fire".to_string()))
        }

        fn purge_expired(&mut self) -> CacheResult<u32> {
            Err(CacheError::Backend("disk on fire".to_string()))
        }
    }

    #[test]
    fn test_healthy_primary_serves_reads() {
        let mut cache = FallbackCache::new(Box::new(MemoryCache::new()));
        cache.set("proxy", "pool", "payload", None).unwrap();

        assert_eq!(
            cache.get("proxy", "pool").unwrap(),
            Some("payload".to_string())
        );
        assert!(!cache.is_degraded());
    }

    #[test]
    fn test_broken_primary_never_errors() {
        let mut cache = FallbackCache::new(Box::new(BrokenCache));

        assert!(cache.set("proxy", "pool", "payload", None).is_ok());
        assert_eq!(
            cache.get("proxy", "pool").unwrap(),
            Some("payload".to_string())
        );
        assert!(cache.delete("proxy", "pool").unwrap());
        assert_eq!(cache.get("proxy", "pool").unwrap(), None);
        assert!(cache.is_degraded());
    }

    #[test]
    fn test_broken_primary_miss_is_none() {
        let mut cache = FallbackCache::new(Box::new(BrokenCache));
        assert_eq!(cache.get("proxy", "nothing").unwrap(), None);
    }

    #[test]
    fn test_clear_namespace_degrades() {
        let mut cache = FallbackCache::new(Box::new(BrokenCache));
        cache.set("proxy", "a", "1", None).unwrap();
        cache.set("proxy", "b", "2", None).unwrap();

        assert_eq!(cache.clear_namespace("proxy").unwrap(), 2);
        assert_eq!(cache.get("proxy", "a").unwrap(), None);
    }
}
