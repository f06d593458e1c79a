//! Health-scored proxy pool

use crate::cache::{Cache, FallbackCache};
use crate::config::ProxyConfig;
use crate::proxy::{PoolMetrics, ProxyAddr, ProxyEndpoint, ProxySource};
use crate::timeout::TimeoutController;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const CACHE_NAMESPACE: &str = "proxy";
const CACHE_KEY: &str = "pool";

/// The pool record as stored in the shared cache
///
/// Staleness is judged by `fetched_at`, so health write-backs do not extend
/// the pool's life.
#[derive(Debug, Serialize, Deserialize)]
struct CachedPool {
    fetched_at: DateTime<Utc>,
    endpoints: Vec<ProxyEndpoint>,
}

/// Health-scored pool of crawl proxies
///
/// The pool populates itself lazily: from the shared cache when a fresh
/// record exists, from the upstream list source otherwise. Once populated,
/// selection always returns a proxy: it prefers the lowest-scored unheld one,
/// resets the least-bad subset when every proxy is banned, and shares a held
/// proxy when nothing else is free. The only error [`select`](Self::select)
/// can return is a population failure with no usable leftovers, because
/// without any proxy list the crawl cannot proceed.
///
/// Every health mutation pushes the resulting pool health into the timeout
/// controller and writes the pool back to the shared cache.
pub struct ProxyPool {
    endpoints: Vec<ProxyEndpoint>,
    fetched_at: Option<DateTime<Utc>>,
    source: ProxySource,
    cache: Arc<Mutex<FallbackCache>>,
    cache_ttl: Duration,
    controller: Arc<Mutex<TimeoutController>>,
}

impl ProxyPool {
    pub fn new(
        config: &ProxyConfig,
        cache: Arc<Mutex<FallbackCache>>,
        controller: Arc<Mutex<TimeoutController>>,
    ) -> crate::Result<Self> {
        let source = ProxySource::new(&config.source_url, config.source_attempts)?;

        Ok(Self {
            endpoints: Vec::new(),
            fetched_at: None,
            source,
            cache,
            cache_ttl: Duration::from_secs(config.cache_ttl),
            controller,
        })
    }

    /// Picks a proxy for the next request, populating the pool if needed
    ///
    /// Marks the returned proxy in-use.
    pub async fn select(&mut self) -> crate::Result<ProxyAddr> {
        self.ensure_populated().await?;

        let now = Utc::now();
        if self.pick_best(now, true).is_none() && self.endpoints.iter().all(|e| e.is_banned(now))
        {
            self.degradation_reset();
        }

        // Prefer an unheld proxy; if every usable one is held, share the best
        let index = self
            .pick_best(now, true)
            .or_else(|| self.pick_best(now, false));

        match index {
            Some(i) => {
                let endpoint = &mut self.endpoints[i];
                endpoint.mark_in_use(now);
                tracing::debug!(
                    "Selected proxy {} (score {:.0}, {} errors)",
                    endpoint.addr,
                    endpoint.score(),
                    endpoint.error_count
                );
                Ok(endpoint.addr.clone())
            }
            None => Err(crate::ShioriError::ProxySource {
                attempts: 0,
                message: "proxy pool is empty".to_string(),
            }),
        }
    }

    /// Charges an attributed failure to a proxy
    pub fn report_failure(&mut self, addr: &ProxyAddr) {
        let now = Utc::now();
        match self.endpoints.iter_mut().find(|e| e.addr == *addr) {
            Some(endpoint) => {
                endpoint.record_failure(now);
                if endpoint.is_banned(now) {
                    tracing::info!(
                        "Proxy {} banned after {} errors",
                        addr,
                        endpoint.error_count
                    );
                }
            }
            None => {
                tracing::debug!("Failure reported for unknown proxy {}", addr);
                return;
            }
        }

        self.push_health();
        self.persist();
    }

    /// Records a successful call through a proxy
    pub fn report_success(&mut self, addr: &ProxyAddr, elapsed_ms: u64) {
        match self.endpoints.iter_mut().find(|e| e.addr == *addr) {
            Some(endpoint) => {
                endpoint.record_success(elapsed_ms);
            }
            None => {
                tracing::debug!("Success reported for unknown proxy {}", addr);
                return;
            }
        }

        self.push_health();
        self.persist();
    }

    /// Releases one proxy without charging it
    pub fn release(&mut self, addr: &ProxyAddr) {
        let now = Utc::now();
        if let Some(endpoint) = self.endpoints.iter_mut().find(|e| e.addr == *addr) {
            endpoint.release(now);
        }
    }

    /// Clears every in-use flag
    ///
    /// Used when the target site appears to have latched onto the session's
    /// proxy identity (sticky anti-bot detection); the next selections then
    /// redistribute over the whole pool.
    pub fn force_rotation(&mut self) {
        let mut released = 0;
        for endpoint in &mut self.endpoints {
            if endpoint.in_use {
                endpoint.in_use = false;
                released += 1;
            }
        }
        if released > 0 {
            tracing::debug!("Forced rotation, released {} held proxies", released);
        }
    }

    /// Re-fetches the pool from the upstream source, replacing all state
    pub async fn refresh(&mut self) -> crate::Result<usize> {
        let list = self.source.fetch().await?;
        self.adopt(list, Utc::now());
        tracing::info!("Refreshed proxy pool: {} proxies", self.endpoints.len());
        Ok(self.endpoints.len())
    }

    /// Drops the cached pool record and all in-memory state
    pub fn clear_cache(&mut self) {
        {
            let mut cache = self.cache.lock().unwrap();
            if let Err(e) = cache.delete(CACHE_NAMESPACE, CACHE_KEY) {
                tracing::warn!("Could not drop cached proxy pool: {}", e);
            }
        }

        self.endpoints.clear();
        self.fetched_at = None;
        tracing::info!("Cleared cached proxy pool");
    }

    /// Current pool snapshot
    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics::compute(&self.endpoints, Utc::now())
    }

    /// The full pool listing, populating it if needed
    pub async fn list(&mut self) -> crate::Result<Vec<ProxyEndpoint>> {
        self.ensure_populated().await?;
        Ok(self.endpoints.clone())
    }

    async fn ensure_populated(&mut self) -> crate::Result<()> {
        let now = Utc::now();
        if !self.endpoints.is_empty() && !self.is_stale(now) {
            return Ok(());
        }

        if let Some(cached) = self.load_cached(now) {
            tracing::debug!(
                "Adopted {} proxies from the shared cache",
                cached.endpoints.len()
            );
            self.endpoints = cached.endpoints;
            self.fetched_at = Some(cached.fetched_at);
            self.push_health();
            return Ok(());
        }

        match self.source.fetch().await {
            Ok(list) => {
                self.adopt(list, now);
                Ok(())
            }
            Err(e) if !self.endpoints.is_empty() => {
                // A stale pool beats no pool; stamp it so the dead source is
                // not re-tried on every select
                tracing::warn!(
                    "Could not refresh proxy pool, keeping {} stale proxies: {}",
                    self.endpoints.len(),
                    e
                );
                self.fetched_at = Some(now);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn adopt(&mut self, list: Vec<ProxyAddr>, now: DateTime<Utc>) {
        self.endpoints = list.into_iter().map(ProxyEndpoint::new).collect();
        self.fetched_at = Some(now);
        self.push_health();
        self.persist();
    }

    fn is_stale(&self, now: DateTime<Utc>) -> bool {
        match self.fetched_at {
            Some(fetched_at) => fetched_at + self.ttl_chrono() <= now,
            None => true,
        }
    }

    fn load_cached(&self, now: DateTime<Utc>) -> Option<CachedPool> {
        let json = {
            let mut cache = self.cache.lock().unwrap();
            cache.get(CACHE_NAMESPACE, CACHE_KEY).ok().flatten()
        }?;

        let cached: CachedPool = match serde_json::from_str(&json) {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!("Discarding unreadable cached proxy pool: {}", e);
                return None;
            }
        };

        if cached.endpoints.is_empty() {
            return None;
        }
        if cached.fetched_at + self.ttl_chrono() <= now {
            tracing::debug!("Cached proxy pool is stale, ignoring it");
            return None;
        }

        Some(cached)
    }

    /// Index of the lowest-scored selectable proxy; ties go to the least
    /// recently used
    fn pick_best(&self, now: DateTime<Utc>, exclude_in_use: bool) -> Option<usize> {
        let mut best: Option<(usize, f64, Option<DateTime<Utc>>)> = None;

        for (i, endpoint) in self.endpoints.iter().enumerate() {
            if endpoint.is_banned(now) {
                continue;
            }
            if exclude_in_use && endpoint.in_use {
                continue;
            }

            let score = endpoint.score();
            let better = match &best {
                None => true,
                Some((_, best_score, best_used)) => {
                    score < *best_score
                        || (score == *best_score && endpoint.last_used_at < *best_used)
                }
            };
            if better {
                best = Some((i, score, endpoint.last_used_at));
            }
        }

        best.map(|(i, _, _)| i)
    }

    fn degradation_reset(&mut self) {
        let min_errors = self
            .endpoints
            .iter()
            .map(|e| e.error_count)
            .min()
            .unwrap_or(0);

        let mut reset = 0;
        for endpoint in &mut self.endpoints {
            if endpoint.error_count == min_errors {
                endpoint.reset_errors();
                reset += 1;
            }
        }

        // When counts are uniform this resets the whole pool at once, and
        // sustained failure re-bans it just as fast.
        tracing::warn!(
            "All {} proxies banned; reset the {} with the fewest errors ({})",
            self.endpoints.len(),
            reset,
            min_errors
        );

        self.push_health();
        self.persist();
    }

    fn push_health(&self) {
        let metrics = self.metrics();
        let mut controller = self.controller.lock().unwrap();
        controller.set_pool_health(metrics.health);
    }

    fn persist(&self) {
        let fetched_at = match self.fetched_at {
            Some(fetched_at) => fetched_at,
            None => return,
        };

        let record = CachedPool {
            fetched_at,
            endpoints: self.endpoints.clone(),
        };

        match serde_json::to_string(&record) {
            Ok(json) => {
                let mut cache = self.cache.lock().unwrap();
                if let Err(e) = cache.set(CACHE_NAMESPACE, CACHE_KEY, &json, Some(self.cache_ttl))
                {
                    tracing::warn!("Could not persist proxy pool: {}", e);
                }
            }
            Err(e) => tracing::warn!("Could not serialize proxy pool: {}", e),
        }
    }

    fn ttl_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.cache_ttl).unwrap_or_else(|_| chrono::Duration::max_value())
    }
}
