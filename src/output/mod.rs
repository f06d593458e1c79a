//! Session summaries and console reporting
//!
//! This module handles:
//! - Assembling per-session outcome reports
//! - Separating persistent failures from recovered ones
//! - Printing summaries, failure listings, and journal statistics

mod report;

pub use report::{
    print_failures, print_report, print_work_stats, PersistentFailure, SessionReport, WorkOutcome,
    WorkStatsLine,
};
