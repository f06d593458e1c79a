//! Adaptive timeout controller

use crate::config::TimeoutConfig;
use crate::proxy::PoolHealth;
use crate::timeout::history::OperationHistory;
use crate::timeout::OperationKind;
use crate::ErrorKind;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Per-cycle escalation step: each recovery cycle adds 20% of the base
const CYCLE_STEP: f64 = 0.2;

/// Consecutive-failure escalation step and its cap
const CONSECUTIVE_STEP: f64 = 0.2;
const CONSECUTIVE_CAP: f64 = 3.0;

/// Extra factor when observed latency crowds the configured base
const SLOW_RESPONSE_FACTOR: f64 = 1.3;
const SLOW_RESPONSE_THRESHOLD: f64 = 0.8;

/// Anti-bot doubling applies when a block appeared in the last N errors
const ANTI_BOT_LOOKBACK: usize = 3;
const ANTI_BOT_RECENT_FACTOR: f64 = 2.0;

/// Rate-limit pacing: window, base delay, growth, and the hit count cap
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(180);
const RATE_LIMIT_BASE_DELAY_MS: u64 = 15_000;
const RATE_LIMIT_GROWTH: f64 = 1.5;
const RATE_LIMIT_HIT_CAP: u32 = 3;

/// Derives operation deadlines from recent crawl behavior
///
/// The deadline for an operation starts at its configured base, escalates
/// with the recovery cycle, and is then stretched by a multiplicative stack
/// driven by the operation's recent history and the proxy pool's health. All
/// results are clamped to the configured hard ceiling.
pub struct TimeoutController {
    base: HashMap<OperationKind, u64>,
    max_timeout: u64,
    current_cycle: u32,
    histories: HashMap<OperationKind, OperationHistory>,
    pool_health: PoolHealth,
    rate_limit_hits: Vec<Instant>,
}

impl TimeoutController {
    pub fn new(config: &TimeoutConfig) -> Self {
        let mut base = HashMap::new();
        base.insert(OperationKind::PageFetch, config.page_fetch);
        base.insert(OperationKind::UnitDownload, config.unit_download);
        base.insert(OperationKind::ProviderCall, config.provider_call);

        let histories = OperationKind::all()
            .into_iter()
            .map(|kind| (kind, OperationHistory::new()))
            .collect();

        Self {
            base,
            max_timeout: config.max_timeout,
            current_cycle: 1,
            histories,
            pool_health: PoolHealth::Good,
            rate_limit_hits: Vec::new(),
        }
    }

    /// Moves the controller to the given recovery cycle (1-based)
    pub fn set_cycle(&mut self, cycle: u32) {
        let cycle = cycle.max(1);
        if cycle != self.current_cycle {
            tracing::info!(
                "Timeout controller entering cycle {} (base multiplier {:.1}x)",
                cycle,
                cycle_multiplier(cycle)
            );
        }
        self.current_cycle = cycle;
    }

    pub fn cycle(&self) -> u32 {
        self.current_cycle
    }

    /// The configured base for an operation, before any escalation
    pub fn base_for(&self, kind: OperationKind) -> u64 {
        self.base.get(&kind).copied().unwrap_or(self.max_timeout)
    }

    /// The cycle-escalated deadline, ignoring history
    pub fn timeout_for(&self, kind: OperationKind) -> Duration {
        let ms = self.base_for(kind) as f64 * cycle_multiplier(self.current_cycle);
        Duration::from_millis(self.clamp(ms))
    }

    /// The full adaptive deadline for the operation's next attempt
    ///
    /// Starts from [`timeout_for`](Self::timeout_for) and multiplies in, in
    /// order: the dominant recent error kind's factor, a 2x factor when an
    /// anti-bot block is among the last three errors, the pool-health factor,
    /// a capped consecutive-failure factor, and a 1.3x factor when the average
    /// response time exceeds 80% of the configured base.
    pub fn adaptive_timeout_for(&self, kind: OperationKind) -> Duration {
        let mut factor = cycle_multiplier(self.current_cycle);

        if let Some(history) = self.histories.get(&kind) {
            if let Some(dominant) = history.dominant_error() {
                factor *= kind_factor(dominant);
            }

            if history.recent_anti_bot(ANTI_BOT_LOOKBACK) {
                factor *= ANTI_BOT_RECENT_FACTOR;
            }

            factor *= health_factor(self.pool_health);

            let consecutive = history.consecutive_failures() as f64;
            factor *= (1.0 + CONSECUTIVE_STEP * consecutive).min(CONSECUTIVE_CAP);

            if let Some(average) = history.average_response_time() {
                if average > SLOW_RESPONSE_THRESHOLD * self.base_for(kind) as f64 {
                    factor *= SLOW_RESPONSE_FACTOR;
                }
            }
        } else {
            factor *= health_factor(self.pool_health);
        }

        let ms = self.base_for(kind) as f64 * factor;
        let clamped = self.clamp(ms);

        tracing::trace!(
            "Adaptive timeout for {}: {}ms (cycle {}, factor {:.2})",
            kind,
            clamped,
            self.current_cycle,
            factor
        );

        Duration::from_millis(clamped)
    }

    /// Records a classified failure for an operation
    pub fn record_error(&mut self, kind: OperationKind, error: ErrorKind) {
        tracing::debug!("Recorded {} error for {}", error, kind);
        self.histories.entry(kind).or_default().record_error(error);
    }

    /// Records a completed call's response time
    pub fn record_response_time(&mut self, kind: OperationKind, millis: u64) {
        self.histories
            .entry(kind)
            .or_default()
            .record_response_time(millis);
    }

    /// Registers a rate-limit hit and returns the preventive delay to sleep
    ///
    /// Hits are counted over a trailing three-minute window including the one
    /// being recorded; the delay grows 1.5x per recent hit and flattens at
    /// three.
    pub fn record_rate_limit_hit(&mut self) -> Duration {
        let now = Instant::now();
        self.rate_limit_hits
            .retain(|hit| now.duration_since(*hit) < RATE_LIMIT_WINDOW);
        self.rate_limit_hits.push(now);

        let recent = (self.rate_limit_hits.len() as u32).min(RATE_LIMIT_HIT_CAP);
        let delay_ms =
            RATE_LIMIT_BASE_DELAY_MS as f64 * RATE_LIMIT_GROWTH.powi(recent as i32 - 1);

        let delay = Duration::from_millis(delay_ms.round() as u64);
        tracing::info!(
            "Rate limit hit ({} in window), pacing for {:.1}s",
            self.rate_limit_hits.len(),
            delay.as_secs_f64()
        );
        delay
    }

    /// Updates the pool-health input to the adaptive stack
    ///
    /// The proxy pool pushes this on every health mutation.
    pub fn set_pool_health(&mut self, health: PoolHealth) {
        if health != self.pool_health {
            tracing::debug!(
                "Pool health changed {} -> {}",
                self.pool_health,
                health
            );
        }
        self.pool_health = health;
    }

    pub fn pool_health(&self) -> PoolHealth {
        self.pool_health
    }

    /// Consecutive-failure streak for an operation
    pub fn consecutive_failures(&self, kind: OperationKind) -> u32 {
        self.histories
            .get(&kind)
            .map(|h| h.consecutive_failures())
            .unwrap_or(0)
    }

    /// Average observed response time for an operation
    pub fn average_response_time(&self, kind: OperationKind) -> Option<f64> {
        self.histories
            .get(&kind)
            .and_then(|h| h.average_response_time())
    }

    /// Drops all histories and returns to cycle 1 with a healthy pool
    pub fn reset_to_defaults(&mut self) {
        self.current_cycle = 1;
        self.pool_health = PoolHealth::Good;
        self.rate_limit_hits.clear();
        for history in self.histories.values_mut() {
            history.clear();
        }
        tracing::debug!("Timeout controller reset to defaults");
    }

    fn clamp(&self, ms: f64) -> u64 {
        (ms.round() as u64).min(self.max_timeout)
    }
}

fn cycle_multiplier(cycle: u32) -> f64 {
    1.0 + CYCLE_STEP * (cycle.max(1) - 1) as f64
}

/// Deadline factor for the dominant recent error kind
fn kind_factor(kind: ErrorKind) -> f64 {
    match kind {
        ErrorKind::AntiBot => 2.5,
        ErrorKind::RateLimit => 3.0,
        ErrorKind::Proxy => 1.8,
        ErrorKind::Network => 1.5,
        ErrorKind::Timeout => 1.3,
        ErrorKind::Unknown => 1.0,
    }
}

fn health_factor(health: PoolHealth) -> f64 {
    match health {
        PoolHealth::Good => 1.0,
        PoolHealth::Poor => 1.5,
        PoolHealth::Critical => 2.0,
    }
}
