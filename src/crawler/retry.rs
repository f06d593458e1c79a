//! Per-item retry policy
//!
//! The innermost recovery layer: how many times one item is attempted within
//! a single pass, and how long to wait between attempts. The waits here are
//! fixed schedules; adaptive rate-limit delays come from the timeout
//! controller instead.

use std::time::Duration;

/// Base wait between ordinary retry attempts
const BACKOFF_STEP_MS: u64 = 1000;
/// Cap on the ordinary backoff
const BACKOFF_CAP_MS: u64 = 5000;
/// Base wait after an anti-bot detection
const ANTI_BOT_STEP_MS: u64 = 5000;
/// Cap on the anti-bot wait
const ANTI_BOT_CAP_MS: u64 = 20_000;

/// Attempt budget for one item within one pass
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    attempts: u32,
}

impl RetryPolicy {
    /// Creates a policy with the given attempt budget, at least one
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_last(&self, attempt: u32) -> bool {
        attempt >= self.attempts
    }

    /// Linear backoff before retrying attempt `attempt + 1`
    pub fn backoff(attempt: u32) -> Duration {
        Duration::from_millis((BACKOFF_STEP_MS * u64::from(attempt)).min(BACKOFF_CAP_MS))
    }

    /// Longer wait after an anti-bot detection
    ///
    /// Challenges outlast plain transient errors, so the schedule starts
    /// where the ordinary backoff caps out.
    pub fn anti_bot_delay(attempt: u32) -> Duration {
        Duration::from_millis((ANTI_BOT_STEP_MS * u64::from(attempt)).min(ANTI_BOT_CAP_MS))
    }
}
