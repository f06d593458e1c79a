//! In-memory journal store

use crate::journal::{ItemStatus, JournalResult, JournalStore, WorkJournal};
use std::collections::HashMap;

/// Journal store with no persistence, for dry runs and tests
#[derive(Default)]
pub struct MemoryJournalStore {
    journals: HashMap<(String, ItemStatus), WorkJournal>,
    refs: Vec<String>,
}

impl MemoryJournalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JournalStore for MemoryJournalStore {
    fn get(&self, work: &str, status: ItemStatus) -> JournalResult<Option<WorkJournal>> {
        Ok(self
            .journals
            .get(&(work.to_string(), status))
            .cloned())
    }

    fn put(&mut self, work: &str, status: ItemStatus, journal: &WorkJournal) -> JournalResult<()> {
        self.journals
            .insert((work.to_string(), status), journal.clone());
        Ok(())
    }

    fn works_with(&self, status: ItemStatus) -> JournalResult<Vec<String>> {
        let mut works: Vec<String> = self
            .journals
            .keys()
            .filter(|(_, s)| *s == status)
            .map(|(work, _)| work.clone())
            .collect();
        works.sort();
        Ok(works)
    }

    fn failed_refs(&self) -> JournalResult<Vec<String>> {
        Ok(self.refs.clone())
    }

    fn set_failed_refs(&mut self, refs: &[String]) -> JournalResult<()> {
        self.refs = refs.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_store() {
        let store = MemoryJournalStore::new();
        assert!(store.get("Anything", ItemStatus::Success).unwrap().is_none());
        assert!(store.works_with(ItemStatus::Failed).unwrap().is_empty());
        assert!(store.failed_refs().unwrap().is_empty());
    }

    #[test]
    fn test_put_get() {
        let mut store = MemoryJournalStore::new();
        let journal = WorkJournal::new("Alpha", "w1");
        store.put("Alpha", ItemStatus::Failed, &journal).unwrap();

        assert!(store.get("Alpha", ItemStatus::Failed).unwrap().is_some());
        assert_eq!(
            store.works_with(ItemStatus::Failed).unwrap(),
            vec!["Alpha".to_string()]
        );
    }
}
