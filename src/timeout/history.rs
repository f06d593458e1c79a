//! Bounded per-operation history

use crate::ErrorKind;
use std::collections::VecDeque;

/// Number of recent errors and response times kept per operation
pub const HISTORY_WINDOW: usize = 10;

/// Rolling record of how one operation kind has been behaving
///
/// Holds the last [`HISTORY_WINDOW`] error kinds and response times plus the
/// current consecutive-failure streak. A recorded response time ends the
/// streak; the windows themselves only ever roll forward.
#[derive(Debug, Default, Clone)]
pub struct OperationHistory {
    errors: VecDeque<ErrorKind>,
    response_times: VecDeque<u64>,
    consecutive_failures: u32,
}

impl OperationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a classified failure
    pub fn record_error(&mut self, kind: ErrorKind) {
        if self.errors.len() == HISTORY_WINDOW {
            self.errors.pop_front();
        }
        self.errors.push_back(kind);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }

    /// Records a completed call's response time in milliseconds
    pub fn record_response_time(&mut self, millis: u64) {
        if self.response_times.len() == HISTORY_WINDOW {
            self.response_times.pop_front();
        }
        self.response_times.push_back(millis);
        self.consecutive_failures = 0;
    }

    /// Current consecutive-failure streak
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Average response time over the window, if any calls completed
    pub fn average_response_time(&self) -> Option<f64> {
        if self.response_times.is_empty() {
            return None;
        }
        let sum: u64 = self.response_times.iter().sum();
        Some(sum as f64 / self.response_times.len() as f64)
    }

    /// The most frequent error kind in the window
    ///
    /// Ties go to the kind seen most recently.
    pub fn dominant_error(&self) -> Option<ErrorKind> {
        let mut best: Option<(ErrorKind, usize, usize)> = None;

        for kind in ErrorKind::all() {
            let count = self.errors.iter().filter(|k| **k == kind).count();
            if count == 0 {
                continue;
            }

            let last_seen = self
                .errors
                .iter()
                .rposition(|k| *k == kind)
                .unwrap_or(0);

            match best {
                Some((_, best_count, best_seen))
                    if count < best_count || (count == best_count && last_seen < best_seen) => {}
                _ => best = Some((kind, count, last_seen)),
            }
        }

        best.map(|(kind, _, _)| kind)
    }

    /// True if any of the last `n` errors was an anti-bot block
    pub fn recent_anti_bot(&self, n: usize) -> bool {
        self.errors
            .iter()
            .rev()
            .take(n)
            .any(|k| *k == ErrorKind::AntiBot)
    }

    /// Number of errors currently in the window
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Drops all recorded state
    pub fn clear(&mut self) {
        self.errors.clear();
        self.response_times.clear();
        self.consecutive_failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windows_are_bounded() {
        let mut history = OperationHistory::new();
        for _ in 0..25 {
            history.record_error(ErrorKind::Network);
            history.record_response_time(100);
        }

        assert_eq!(history.error_count(), HISTORY_WINDOW);
        assert_eq!(history.average_response_time(), Some(100.0));
    }

    #[test]
    fn test_consecutive_failures_reset_by_response_time() {
        let mut history = OperationHistory::new();
        history.record_error(ErrorKind::Timeout);
        history.record_error(ErrorKind::Timeout);
        assert_eq!(history.consecutive_failures(), 2);

        history.record_response_time(500);
        assert_eq!(history.consecutive_failures(), 0);

        // The error window itself is unaffected by the reset
        assert_eq!(history.error_count(), 2);
    }

    #[test]
    fn test_dominant_error_by_frequency() {
        let mut history = OperationHistory::new();
        history.record_error(ErrorKind::Network);
        history.record_error(ErrorKind::AntiBot);
        history.record_error(ErrorKind::Network);

        assert_eq!(history.dominant_error(), Some(ErrorKind::Network));
    }

    #[test]
    fn test_dominant_error_tie_goes_to_recent() {
        let mut history = OperationHistory::new();
        history.record_error(ErrorKind::Network);
        history.record_error(ErrorKind::RateLimit);

        assert_eq!(history.dominant_error(), Some(ErrorKind::RateLimit));
    }

    #[test]
    fn test_dominant_error_empty() {
        let history = OperationHistory::new();
        assert_eq!(history.dominant_error(), None);
    }

    #[test]
    fn test_dominant_error_slides_with_window() {
        let mut history = OperationHistory::new();
        for _ in 0..HISTORY_WINDOW {
            history.record_error(ErrorKind::Network);
        }
        // Push the old kind out entirely
        for _ in 0..HISTORY_WINDOW {
            history.record_error(ErrorKind::Proxy);
        }

        assert_eq!(history.dominant_error(), Some(ErrorKind::Proxy));
    }

    #[test]
    fn test_recent_anti_bot() {
        let mut history = OperationHistory::new();
        history.record_error(ErrorKind::AntiBot);
        history.record_error(ErrorKind::Network);
        history.record_error(ErrorKind::Network);

        assert!(history.recent_anti_bot(3));

        history.record_error(ErrorKind::Network);
        assert!(!history.recent_anti_bot(3));
    }

    #[test]
    fn test_average_response_time() {
        let mut history = OperationHistory::new();
        assert_eq!(history.average_response_time(), None);

        history.record_response_time(100);
        history.record_response_time(300);
        assert_eq!(history.average_response_time(), Some(200.0));
    }

    #[test]
    fn test_clear() {
        let mut history = OperationHistory::new();
        history.record_error(ErrorKind::Timeout);
        history.record_response_time(100);

        history.clear();
        assert_eq!(history.error_count(), 0);
        assert_eq!(history.average_response_time(), None);
        assert_eq!(history.consecutive_failures(), 0);
    }
}
