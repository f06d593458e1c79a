//! In-memory cache backend

use crate::cache::traits::{Cache, CacheResult};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// Process-local cache backend
///
/// Used directly in tests and as the degraded tier behind
/// [`FallbackCache`](crate::cache::FallbackCache).
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: HashMap<(String, String), Entry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries
    pub fn len(&self) -> usize {
        let now = Utc::now();
        self.entries.values().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Cache for MemoryCache {
    fn get(&mut self, namespace: &str, key: &str) -> CacheResult<Option<String>> {
        let map_key = (namespace.to_string(), key.to_string());
        let now = Utc::now();

        match self.entries.get(&map_key) {
            Some(entry) if entry.is_expired(now) => {
                self.entries.remove(&map_key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    fn set(
        &mut self,
        namespace: &str,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        let expires_at = match ttl {
            Some(ttl) => Some(
                Utc::now()
                    + chrono::Duration::from_std(ttl)
                        .unwrap_or_else(|_| chrono::Duration::max_value()),
            ),
            None => None,
        };

        self.entries.insert(
            (namespace.to_string(), key.to_string()),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );

        Ok(())
    }

    fn delete(&mut self, namespace: &str, key: &str) -> CacheResult<bool> {
        let map_key = (namespace.to_string(), key.to_string());
        Ok(self.entries.remove(&map_key).is_some())
    }

    fn clear_namespace(&mut self, namespace: &str) -> CacheResult<u32> {
        let before = self.entries.len();
        self.entries.retain(|(ns, _), _| ns != namespace);
        Ok((before - self.entries.len()) as u32)
    }

    fn purge_expired(&mut self) -> CacheResult<u32> {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        Ok((before - self.entries.len()) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let mut cache = MemoryCache::new();
        cache.set("proxy", "pool", "payload", None).unwrap();

        assert_eq!(
            cache.get("proxy", "pool").unwrap(),
            Some("payload".to_string())
        );
    }

    #[test]
    fn test_get_missing_returns_none() {
        let mut cache = MemoryCache::new();
        assert_eq!(cache.get("proxy", "absent").unwrap(), None);
    }

    #[test]
    fn test_zero_ttl_expires_immediately() {
        let mut cache = MemoryCache::new();
        cache
            .set("proxy", "pool", "payload", Some(Duration::ZERO))
            .unwrap();

        assert_eq!(cache.get("proxy", "pool").unwrap(), None);
        // The expired entry was removed on read
        assert!(cache.is_empty());
    }

    #[test]
    fn test_long_ttl_still_live() {
        let mut cache = MemoryCache::new();
        cache
            .set("proxy", "pool", "payload", Some(Duration::from_secs(3600)))
            .unwrap();

        assert_eq!(
            cache.get("proxy", "pool").unwrap(),
            Some("payload".to_string())
        );
    }

    #[test]
    fn test_delete() {
        let mut cache = MemoryCache::new();
        cache.set("proxy", "pool", "payload", None).unwrap();

        assert!(cache.delete("proxy", "pool").unwrap());
        assert!(!cache.delete("proxy", "pool").unwrap());
        assert_eq!(cache.get("proxy", "pool").unwrap(), None);
    }

    #[test]
    fn test_namespace_isolation() {
        let mut cache = MemoryCache::new();
        cache.set("proxy", "pool", "a", None).unwrap();
        cache.set("session", "pool", "b", None).unwrap();

        assert_eq!(cache.get("proxy", "pool").unwrap(), Some("a".to_string()));
        assert_eq!(
            cache.get("session", "pool").unwrap(),
            Some("b".to_string())
        );

        assert_eq!(cache.clear_namespace("proxy").unwrap(), 1);
        assert_eq!(cache.get("proxy", "pool").unwrap(), None);
        assert_eq!(
            cache.get("session", "pool").unwrap(),
            Some("b".to_string())
        );
    }

    #[test]
    fn test_purge_expired() {
        let mut cache = MemoryCache::new();
        cache
            .set("proxy", "stale", "x", Some(Duration::ZERO))
            .unwrap();
        cache.set("proxy", "live", "y", None).unwrap();

        assert_eq!(cache.purge_expired().unwrap(), 1);
        assert_eq!(cache.get("proxy", "live").unwrap(), Some("y".to_string()));
    }

    #[test]
    fn test_overwrite_replaces_value_and_ttl() {
        let mut cache = MemoryCache::new();
        cache
            .set("proxy", "pool", "old", Some(Duration::ZERO))
            .unwrap();
        cache.set("proxy", "pool", "new", None).unwrap();

        assert_eq!(
            cache.get("proxy", "pool").unwrap(),
            Some("new".to_string())
        );
    }
}
