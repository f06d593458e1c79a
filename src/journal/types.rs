//! Durable journal records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// An item (chapter) as advertised by the content provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    /// Item number as the provider reports it, e.g. `"12"` or `"10.5"`
    pub number: String,
    pub title: Option<String>,
}

impl Item {
    pub fn new(id: &str, number: &str) -> Self {
        Self {
            id: id.to_string(),
            number: number.to_string(),
            title: None,
        }
    }
}

/// Outcome bucket a journal entry lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemStatus {
    Success,
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Success => "success",
            ItemStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One crawl-item outcome
///
/// At most one current entry exists per `(work, number)` per status bucket;
/// a new write for the same item number replaces the old entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemRecord {
    pub work: String,
    pub work_id: String,
    pub number: String,
    pub item_id: String,
    pub status: ItemStatus,
    pub timestamp: DateTime<Utc>,

    /// Units (pages) stored; success entries only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_count: Option<u32>,

    /// Where the units were written; success entries only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<String>,

    /// How many attempts were spent; failure entries only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,

    /// Last error observed; failure entries only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ItemRecord {
    pub fn success(
        work: &str,
        work_id: &str,
        item: &Item,
        unit_count: u32,
        storage_path: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            work: work.to_string(),
            work_id: work_id.to_string(),
            number: item.number.clone(),
            item_id: item.id.clone(),
            status: ItemStatus::Success,
            timestamp: now,
            unit_count: Some(unit_count),
            storage_path: Some(storage_path.to_string()),
            attempts: None,
            error_message: None,
        }
    }

    pub fn failure(
        work: &str,
        work_id: &str,
        item: &Item,
        attempts: u32,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            work: work.to_string(),
            work_id: work_id.to_string(),
            number: item.number.clone(),
            item_id: item.id.clone(),
            status: ItemStatus::Failed,
            timestamp: now,
            unit_count: None,
            storage_path: None,
            attempts: Some(attempts),
            error_message: Some(error_message.to_string()),
        }
    }
}

/// All current entries of one status bucket for one work
///
/// Stored as a single document so that "read everything for this work" is one
/// backend read; `outstanding` runs once per work per pass and reads both
/// buckets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkJournal {
    pub work: String,
    pub work_id: String,
    pub updated_at: DateTime<Utc>,
    pub entries: Vec<ItemRecord>,
}

impl WorkJournal {
    pub fn new(work: &str, work_id: &str) -> Self {
        Self {
            work: work.to_string(),
            work_id: work_id.to_string(),
            updated_at: Utc::now(),
            entries: Vec::new(),
        }
    }

    /// Replaces the entry with the same item number, or appends
    pub fn upsert(&mut self, record: ItemRecord, now: DateTime<Utc>) {
        match self.entries.iter_mut().find(|e| e.number == record.number) {
            Some(existing) => *existing = record,
            None => self.entries.push(record),
        }
        self.updated_at = now;
    }

    /// Removes the entry for an item number; true if one existed
    pub fn remove(&mut self, number: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.number != number);
        self.entries.len() != before
    }

    pub fn contains(&self, number: &str) -> bool {
        self.entries.iter().any(|e| e.number == number)
    }

    pub fn get(&self, number: &str) -> Option<&ItemRecord> {
        self.entries.iter().find(|e| e.number == number)
    }

    /// Sorts entries by numeric item number, highest first
    ///
    /// Item numbers are decimal strings ("10.5" is a real chapter number);
    /// anything unparseable sorts after the numbered entries.
    pub fn sort_newest_first(&mut self) {
        self.entries
            .sort_by(|a, b| compare_numbers_desc(&a.number, &b.number));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_number(number: &str) -> Option<f64> {
    number.trim().parse::<f64>().ok()
}

fn compare_numbers_desc(a: &str, b: &str) -> Ordering {
    match (parse_number(a), parse_number(b)) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}
