//! Session reporting types and console printers
//!
//! A [`SessionReport`] is assembled by the crawl session after recovery has
//! run its course. The printers here render it for the terminal; everything
//! in the report is also derivable from the journals, so nothing is lost if
//! the process dies before printing.

use crate::journal::ItemRecord;
use crate::proxy::PoolMetrics;
use chrono::{DateTime, Utc};

/// Final accounting for one configured work
#[derive(Debug, Clone)]
pub struct WorkOutcome {
    /// Display name of the work
    pub work: String,
    /// Items the provider listed for this work
    pub total_items: usize,
    /// Items already journaled as done before this session touched them
    pub already_done: usize,
    /// Items newly completed during this session
    pub crawled: usize,
    /// Items still failing when the session ended
    pub failed: usize,
    /// Set when the work could not be enumerated at all
    pub error: Option<String>,
}

/// An item that was still failing when the session gave up on it
#[derive(Debug, Clone)]
pub struct PersistentFailure {
    pub work: String,
    pub number: String,
    pub attempts: Option<u32>,
    pub error: Option<String>,
}

/// Summary of one crawl session
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    /// Recovery cycles that actually ran (0 when the first passes converged)
    pub cycles_run: u32,

    /// Items that failed at some point this session but were later corrected
    pub recovered: usize,

    pub works: Vec<WorkOutcome>,
    pub persistent_failures: Vec<PersistentFailure>,

    /// Proxy pool snapshot taken at session end
    pub pool: PoolMetrics,
}

impl SessionReport {
    pub fn duration_seconds(&self) -> i64 {
        (self.finished_at - self.started_at).num_seconds()
    }

    pub fn total_crawled(&self) -> usize {
        self.works.iter().map(|w| w.crawled).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.works.iter().map(|w| w.failed).sum()
    }

    pub fn total_already_done(&self) -> usize {
        self.works.iter().map(|w| w.already_done).sum()
    }

    /// Works that could not be enumerated this session
    pub fn aborted_works(&self) -> usize {
        self.works.iter().filter(|w| w.error.is_some()).count()
    }

    /// True when nothing is left failing
    pub fn converged(&self) -> bool {
        self.persistent_failures.is_empty() && self.aborted_works() == 0
    }

    /// Share of items attempted this session that ended in success
    pub fn success_rate(&self) -> f64 {
        let attempted = self.total_crawled() + self.total_failed();
        if attempted == 0 {
            return 100.0;
        }
        (self.total_crawled() as f64 / attempted as f64) * 100.0
    }
}

/// Prints a session report to stdout in a formatted manner
pub fn print_report(report: &SessionReport) {
    println!("=== Crawl Session Summary ===\n");

    println!("Overview:");
    println!("  Started:  {}", report.started_at.to_rfc3339());
    println!("  Finished: {}", report.finished_at.to_rfc3339());
    println!("  Duration: {}s", report.duration_seconds());
    println!("  Recovery cycles: {}", report.cycles_run);
    println!();

    println!("Works:");
    for work in &report.works {
        match &work.error {
            Some(error) => {
                println!("  {}: aborted ({})", work.work, error);
            }
            None => {
                println!(
                    "  {}: {} new, {} already done, {} failing ({} items total)",
                    work.work, work.crawled, work.already_done, work.failed, work.total_items
                );
            }
        }
    }
    println!();

    println!("Proxy Pool:");
    println!(
        "  Proxies: {} total, {} healthy, {} banned",
        report.pool.total, report.pool.healthy, report.pool.banned
    );
    match report.pool.average_response_time {
        Some(ms) => println!("  Average response: {:.0} ms", ms),
        None => println!("  Average response: no samples"),
    }
    println!("  Health: {}", report.pool.health);
    println!();

    if report.recovered > 0 {
        println!(
            "Recovered Failures: {} item(s) corrected by retry passes",
            report.recovered
        );
        println!();
    }

    if !report.persistent_failures.is_empty() {
        println!("Persistent Failures ({}):", report.persistent_failures.len());
        for failure in &report.persistent_failures {
            let attempts = failure
                .attempts
                .map(|a| format!(" after {} attempts", a))
                .unwrap_or_default();
            let error = failure.error.as_deref().unwrap_or("unknown error");
            println!(
                "  - {} #{}{}: {}",
                failure.work, failure.number, attempts, error
            );
        }
        println!();
    }

    println!(
        "Success Rate: {:.1}% ({} / {} items attempted this session)",
        report.success_rate(),
        report.total_crawled(),
        report.total_crawled() + report.total_failed()
    );
}

/// Prints the contents of the failure journals to stdout
pub fn print_failures(failures: &[(String, Vec<ItemRecord>)]) {
    if failures.is_empty() {
        println!("No outstanding failures.");
        return;
    }

    println!("=== Outstanding Failures ===\n");

    let mut total = 0;
    for (work, records) in failures {
        println!("{} ({}):", work, records.len());
        for record in records {
            let attempts = record
                .attempts
                .map(|a| format!("{} attempts", a))
                .unwrap_or_else(|| "attempts unknown".to_string());
            let error = record.error_message.as_deref().unwrap_or("unknown error");
            println!(
                "  #{} [{}] {}: {}",
                record.number,
                record.timestamp.format("%Y-%m-%d %H:%M"),
                attempts,
                error
            );
        }
        println!();
        total += records.len();
    }

    println!(
        "Total: {} failing item(s) across {} work(s)",
        total,
        failures.len()
    );
}

/// One row of the per-work statistics listing
#[derive(Debug, Clone)]
pub struct WorkStatsLine {
    pub work: String,
    pub success_count: usize,
    pub failure_count: usize,
    /// Item number of the newest completed item, if any
    pub latest_item: Option<String>,
}

/// Prints journal statistics to stdout in a formatted manner
pub fn print_work_stats(lines: &[WorkStatsLine]) {
    println!("=== Journal Statistics ===\n");

    if lines.is_empty() {
        println!("No works journaled yet.");
        return;
    }

    let mut successes = 0;
    let mut failures = 0;
    for line in lines {
        let latest = line
            .latest_item
            .as_deref()
            .map(|n| format!(", latest #{}", n))
            .unwrap_or_default();
        println!(
            "  {}: {} done, {} failing{}",
            line.work, line.success_count, line.failure_count, latest
        );
        successes += line.success_count;
        failures += line.failure_count;
    }
    println!();

    println!(
        "Total: {} done, {} failing across {} work(s)",
        successes,
        failures,
        lines.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{PoolHealth, PoolMetrics};

    fn test_pool_metrics() -> PoolMetrics {
        PoolMetrics {
            total: 4,
            healthy: 3,
            banned: 1,
            in_use: 0,
            average_response_time: Some(420.0),
            health: PoolHealth::Good,
        }
    }

    fn test_report() -> SessionReport {
        let started_at = Utc::now();
        SessionReport {
            started_at,
            finished_at: started_at + chrono::Duration::seconds(90),
            cycles_run: 2,
            recovered: 3,
            works: vec![
                WorkOutcome {
                    work: "Alpha".to_string(),
                    total_items: 10,
                    already_done: 4,
                    crawled: 5,
                    failed: 1,
                    error: None,
                },
                WorkOutcome {
                    work: "Beta".to_string(),
                    total_items: 0,
                    already_done: 0,
                    crawled: 0,
                    failed: 0,
                    error: Some("manifest fetch failed".to_string()),
                },
            ],
            persistent_failures: vec![PersistentFailure {
                work: "Alpha".to_string(),
                number: "7".to_string(),
                attempts: Some(3),
                error: Some("proxy handshake failed".to_string()),
            }],
            pool: test_pool_metrics(),
        }
    }

    #[test]
    fn test_report_totals() {
        let report = test_report();
        assert_eq!(report.total_crawled(), 5);
        assert_eq!(report.total_failed(), 1);
        assert_eq!(report.total_already_done(), 4);
        assert_eq!(report.aborted_works(), 1);
        assert_eq!(report.duration_seconds(), 90);
    }

    #[test]
    fn test_success_rate() {
        let report = test_report();
        let rate = report.success_rate();
        assert!((rate - 83.3).abs() < 0.1);
    }

    #[test]
    fn test_success_rate_nothing_attempted() {
        let mut report = test_report();
        report.works.clear();
        assert_eq!(report.success_rate(), 100.0);
    }

    #[test]
    fn test_converged() {
        let mut report = test_report();
        assert!(!report.converged());

        report.persistent_failures.clear();
        // Still one aborted work
        assert!(!report.converged());

        report.works.retain(|w| w.error.is_none());
        for work in &mut report.works {
            work.failed = 0;
        }
        assert!(report.converged());
    }
}
