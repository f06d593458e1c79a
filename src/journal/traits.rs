//! Journal storage abstraction

use crate::journal::{ItemStatus, WorkJournal};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("Journal I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Journal serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Journal backend error: {0}")]
    Backend(String),
}

pub type JournalResult<T> = std::result::Result<T, JournalError>;

/// Storage backend for per-work crawl journals
///
/// One durable document per work per status bucket, plus a flat ledger of
/// `"<work>::<number>"` references for items that stayed failed. Reading a
/// journal that was never written returns `Ok(None)`.
pub trait JournalStore: Send {
    fn get(&self, work: &str, status: ItemStatus) -> JournalResult<Option<WorkJournal>>;

    fn put(&mut self, work: &str, status: ItemStatus, journal: &WorkJournal) -> JournalResult<()>;

    /// Names of works that currently have a journal in the given bucket
    fn works_with(&self, status: ItemStatus) -> JournalResult<Vec<String>>;

    fn failed_refs(&self) -> JournalResult<Vec<String>>;

    fn set_failed_refs(&mut self, refs: &[String]) -> JournalResult<()>;
}
