//! Pool metrics and health classification

use crate::proxy::ProxyEndpoint;
use chrono::{DateTime, Utc};

/// Coarse pool health, derived from the healthy fraction
///
/// Good above 70% healthy, Poor above 30%, Critical below that (or when the
/// pool is empty). Pushed into the timeout controller, where it stretches
/// deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolHealth {
    Good,
    Poor,
    Critical,
}

impl PoolHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Poor => "poor",
            Self::Critical => "critical",
        }
    }

    /// Classifies a healthy/total split
    pub fn classify(healthy: usize, total: usize) -> Self {
        if total == 0 {
            return Self::Critical;
        }
        let fraction = healthy as f64 / total as f64;
        if fraction > 0.7 {
            Self::Good
        } else if fraction > 0.3 {
            Self::Poor
        } else {
            Self::Critical
        }
    }
}

impl std::fmt::Display for PoolHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A point-in-time snapshot of pool state
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    pub total: usize,
    pub healthy: usize,
    pub banned: usize,
    pub in_use: usize,
    /// Average smoothed response time across proxies with at least one sample
    pub average_response_time: Option<f64>,
    pub health: PoolHealth,
}

impl PoolMetrics {
    pub fn compute(endpoints: &[ProxyEndpoint], now: DateTime<Utc>) -> Self {
        let total = endpoints.len();
        let healthy = endpoints.iter().filter(|e| e.is_healthy()).count();
        let banned = endpoints.iter().filter(|e| e.is_banned(now)).count();
        let in_use = endpoints.iter().filter(|e| e.in_use).count();

        let samples: Vec<f64> = endpoints
            .iter()
            .filter(|e| e.total_successes > 0)
            .map(|e| e.response_time_ms)
            .collect();
        let average_response_time = if samples.is_empty() {
            None
        } else {
            Some(samples.iter().sum::<f64>() / samples.len() as f64)
        };

        Self {
            total,
            healthy,
            banned,
            in_use,
            average_response_time,
            health: PoolHealth::classify(healthy, total),
        }
    }
}
