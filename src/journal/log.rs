//! Crawl bookkeeping service

use crate::journal::{
    Item, ItemRecord, ItemStatus, JournalResult, JournalStore, WorkJournal,
};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Mutex;

/// Success and failure counts for one work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkStats {
    pub success_count: usize,
    pub failure_count: usize,
}

/// The crawl's durable memory
///
/// Wraps a [`JournalStore`] and enforces the bookkeeping rules: a success
/// entry removes the item's failure entry and is terminal (later failures for
/// the same item are ignored), writes replace by item number, and the success
/// journal stays sorted with the highest item number first.
///
/// Shared between crawl tasks as `Arc<CrawlLog>`; the inner store is behind a
/// mutex and every operation locks it for its full read-modify-write.
pub struct CrawlLog {
    store: Mutex<Box<dyn JournalStore>>,
}

impl CrawlLog {
    pub fn new(store: Box<dyn JournalStore>) -> Self {
        Self {
            store: Mutex::new(store),
        }
    }

    /// Records a completed item, superseding any failure entry for it
    pub fn record_success(
        &self,
        work: &str,
        work_id: &str,
        item: &Item,
        unit_count: u32,
        storage_path: &str,
    ) -> JournalResult<()> {
        let now = Utc::now();
        let mut store = self.store.lock().unwrap();

        if let Some(mut failures) = store.get(work, ItemStatus::Failed)? {
            if failures.remove(&item.number) {
                failures.updated_at = now;
                store.put(work, ItemStatus::Failed, &failures)?;
            }
        }

        let mut journal = store
            .get(work, ItemStatus::Success)?
            .unwrap_or_else(|| WorkJournal::new(work, work_id));
        journal.upsert(
            ItemRecord::success(work, work_id, item, unit_count, storage_path, now),
            now,
        );
        journal.sort_newest_first();
        store.put(work, ItemStatus::Success, &journal)?;

        tracing::debug!("Recorded success for {} #{}", work, item.number);
        Ok(())
    }

    /// Records a failed item; a no-op when the item already succeeded
    pub fn record_failure(
        &self,
        work: &str,
        work_id: &str,
        item: &Item,
        attempts: u32,
        error_message: &str,
    ) -> JournalResult<()> {
        let now = Utc::now();
        let mut store = self.store.lock().unwrap();

        if let Some(successes) = store.get(work, ItemStatus::Success)? {
            if successes.contains(&item.number) {
                tracing::debug!(
                    "Ignoring failure for already-completed {} #{}",
                    work,
                    item.number
                );
                return Ok(());
            }
        }

        let mut journal = store
            .get(work, ItemStatus::Failed)?
            .unwrap_or_else(|| WorkJournal::new(work, work_id));
        journal.upsert(
            ItemRecord::failure(work, work_id, item, attempts, error_message, now),
            now,
        );
        store.put(work, ItemStatus::Failed, &journal)?;

        tracing::debug!(
            "Recorded failure for {} #{} after {} attempts: {}",
            work,
            item.number,
            attempts,
            error_message
        );
        Ok(())
    }

    /// Whether a success entry exists for this item
    pub fn is_done(&self, work: &str, number: &str) -> JournalResult<bool> {
        let store = self.store.lock().unwrap();
        Ok(store
            .get(work, ItemStatus::Success)?
            .map(|j| j.contains(number))
            .unwrap_or(false))
    }

    /// Which of the available items still need crawling
    ///
    /// The union of "never completed" and "previously failed", in provider
    /// order; a success entry is terminal and excludes the item outright.
    pub fn outstanding(&self, work: &str, available: &[Item]) -> JournalResult<Vec<Item>> {
        let store = self.store.lock().unwrap();
        let successes = store.get(work, ItemStatus::Success)?;
        let failures = store.get(work, ItemStatus::Failed)?;

        let done: HashSet<&str> = successes
            .as_ref()
            .map(|j| j.entries.iter().map(|e| e.number.as_str()).collect())
            .unwrap_or_default();

        if done.is_empty() {
            tracing::debug!(
                "{}: no prior successes, all {} items outstanding",
                work,
                available.len()
            );
            return Ok(available.to_vec());
        }

        let failed: HashSet<&str> = failures
            .as_ref()
            .map(|j| j.entries.iter().map(|e| e.number.as_str()).collect())
            .unwrap_or_default();

        let outstanding: Vec<Item> = available
            .iter()
            .filter(|item| !done.contains(item.number.as_str()))
            .cloned()
            .collect();

        let retryable = outstanding
            .iter()
            .filter(|item| failed.contains(item.number.as_str()))
            .count();
        tracing::debug!(
            "{}: {} of {} items outstanding ({} are failed retries)",
            work,
            outstanding.len(),
            available.len(),
            retryable
        );
        Ok(outstanding)
    }

    /// Every work's current failure entries
    pub fn all_failures(&self) -> JournalResult<Vec<(String, Vec<ItemRecord>)>> {
        let store = self.store.lock().unwrap();
        collect_failures(&**store)
    }

    /// Whether any failure entry exists anywhere
    pub fn has_any_failures(&self) -> JournalResult<bool> {
        let store = self.store.lock().unwrap();
        for work in store.works_with(ItemStatus::Failed)? {
            if let Some(journal) = store.get(&work, ItemStatus::Failed)? {
                if !journal.is_empty() {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    pub fn stats(&self, work: &str) -> JournalResult<WorkStats> {
        let store = self.store.lock().unwrap();
        let success_count = store
            .get(work, ItemStatus::Success)?
            .map(|j| j.len())
            .unwrap_or(0);
        let failure_count = store
            .get(work, ItemStatus::Failed)?
            .map(|j| j.len())
            .unwrap_or(0);
        Ok(WorkStats {
            success_count,
            failure_count,
        })
    }

    /// Every work with at least one journal entry, sorted by name
    pub fn works(&self) -> JournalResult<Vec<String>> {
        let store = self.store.lock().unwrap();
        let mut works = store.works_with(ItemStatus::Success)?;
        works.extend(store.works_with(ItemStatus::Failed)?);
        works.sort();
        works.dedup();
        Ok(works)
    }

    /// The completed entry with the highest item number, if any
    pub fn latest_success(&self, work: &str) -> JournalResult<Option<ItemRecord>> {
        let store = self.store.lock().unwrap();
        Ok(store
            .get(work, ItemStatus::Success)?
            .and_then(|j| j.entries.into_iter().next()))
    }

    /// The persisted `"<work>::<number>"` ledger
    pub fn failed_refs(&self) -> JournalResult<Vec<String>> {
        let store = self.store.lock().unwrap();
        store.failed_refs()
    }

    /// Rewrites the ledger from the current failure journals
    ///
    /// Called at session end so the ledger always reflects what is still
    /// failed, not what failed at any point.
    pub fn rewrite_failed_refs(&self) -> JournalResult<usize> {
        let mut store = self.store.lock().unwrap();

        let mut refs = Vec::new();
        for (work, entries) in collect_failures(&**store)? {
            for entry in entries {
                refs.push(format!("{}::{}", work, entry.number));
            }
        }

        store.set_failed_refs(&refs)?;
        tracing::debug!("Rewrote failed-item ledger: {} references", refs.len());
        Ok(refs.len())
    }
}

fn collect_failures(store: &dyn JournalStore) -> JournalResult<Vec<(String, Vec<ItemRecord>)>> {
    let mut out = Vec::new();
    for work in store.works_with(ItemStatus::Failed)? {
        if let Some(journal) = store.get(&work, ItemStatus::Failed)? {
            if !journal.is_empty() {
                out.push((work, journal.entries));
            }
        }
    }
    Ok(out)
}

/// Splits a ledger reference into its work and item number
pub fn parse_failed_ref(reference: &str) -> Option<(&str, &str)> {
    let (work, number) = reference.split_once("::")?;
    if work.is_empty() || number.is_empty() {
        return None;
    }
    Some((work, number))
}
