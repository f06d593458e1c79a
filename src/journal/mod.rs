//! Durable crawl journals
//!
//! Each work keeps one success journal and one failure journal, stored as a
//! single document per bucket. Together they answer the only questions the
//! crawler asks between runs: what is already done, and what should be
//! retried. [`CrawlLog`] is the service layer enforcing the bookkeeping
//! rules; [`JournalStore`] is the pluggable persistence behind it.

mod file;
mod log;
mod memory;
mod traits;
mod types;

pub(crate) use file::slug;
pub use file::FileJournalStore;
pub use log::{parse_failed_ref, CrawlLog, WorkStats};
pub use memory::MemoryJournalStore;
pub use traits::{JournalError, JournalResult, JournalStore};
pub use types::{Item, ItemRecord, ItemStatus, WorkJournal};
