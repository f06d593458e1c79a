//! Per-proxy health state

use crate::proxy::ProxyAddr;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Errors at or above this count make a proxy bannable
pub const BAN_ERROR_THRESHOLD: u32 = 3;

/// How long after its last error a bannable proxy stays banned
pub const BAN_COOLDOWN_SECS: i64 = 60;

/// Weight of the newest sample in the smoothed response time
const EMA_NEW_WEIGHT: f64 = 0.3;

/// Score penalty per accumulated error, in milliseconds
const ERROR_PENALTY_MS: f64 = 1000.0;

/// Tracks the health of a single proxy endpoint
///
/// Selection prefers the lowest [`score`](Self::score): the smoothed response
/// time plus a flat penalty per accumulated error. A proxy with
/// [`BAN_ERROR_THRESHOLD`] or more errors is banned until
/// [`BAN_COOLDOWN_SECS`] have passed since its last error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyEndpoint {
    pub addr: ProxyAddr,

    /// Accumulated error count since the last reset
    pub error_count: u32,

    /// EMA-smoothed response time in milliseconds (0 until the first sample)
    pub response_time_ms: f64,

    /// When the last attributed failure happened
    pub last_error_at: Option<DateTime<Utc>>,

    /// When this proxy was last handed out
    pub last_used_at: Option<DateTime<Utc>>,

    pub total_successes: u64,
    pub total_failures: u64,

    /// Whether a crawl task currently holds this proxy (never persisted)
    #[serde(skip)]
    pub in_use: bool,
}

impl ProxyEndpoint {
    pub fn new(addr: ProxyAddr) -> Self {
        Self {
            addr,
            error_count: 0,
            response_time_ms: 0.0,
            last_error_at: None,
            last_used_at: None,
            total_successes: 0,
            total_failures: 0,
            in_use: false,
        }
    }

    /// Selection score; lower is better
    pub fn score(&self) -> f64 {
        self.response_time_ms + self.error_count as f64 * ERROR_PENALTY_MS
    }

    /// Records an attributed failure and releases the proxy
    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.error_count = self.error_count.saturating_add(1);
        self.total_failures = self.total_failures.saturating_add(1);
        self.last_error_at = Some(now);
        self.in_use = false;
    }

    /// Records a successful call and releases the proxy
    ///
    /// Smooths the response time and walks the error count back toward zero,
    /// so a proxy that recovers earns its way out of the penalty box.
    pub fn record_success(&mut self, elapsed_ms: u64) {
        let sample = elapsed_ms as f64;
        self.response_time_ms = if self.total_successes == 0 {
            sample
        } else {
            EMA_NEW_WEIGHT * sample + (1.0 - EMA_NEW_WEIGHT) * self.response_time_ms
        };
        self.error_count = self.error_count.saturating_sub(1);
        self.total_successes = self.total_successes.saturating_add(1);
        self.in_use = false;
    }

    /// Whether the ban gate is currently closed for this proxy
    pub fn is_banned(&self, now: DateTime<Utc>) -> bool {
        if self.error_count < BAN_ERROR_THRESHOLD {
            return false;
        }
        match self.last_error_at {
            Some(at) => now - at < chrono::Duration::seconds(BAN_COOLDOWN_SECS),
            None => false,
        }
    }

    /// A proxy with no accumulated errors
    pub fn is_healthy(&self) -> bool {
        self.error_count == 0
    }

    /// Clears accumulated error state (graceful degradation)
    pub fn reset_errors(&mut self) {
        self.error_count = 0;
        self.last_error_at = None;
    }

    /// Marks the proxy as handed out
    pub fn mark_in_use(&mut self, now: DateTime<Utc>) {
        self.in_use = true;
        self.last_used_at = Some(now);
    }

    /// Releases the proxy without touching its stats
    pub fn release(&mut self, now: DateTime<Utc>) {
        self.in_use = false;
        self.last_used_at = Some(now);
    }
}
