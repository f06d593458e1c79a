//! Filesystem-backed journal store

use crate::journal::{ItemStatus, JournalResult, JournalStore, WorkJournal};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const FAILED_REFS_FILE: &str = "failed-refs.json";

/// Stores each work's journal as one JSON document per status bucket
///
/// Layout under the journal directory:
///
/// ```text
/// <work-slug>.success.json
/// <work-slug>.failed.json
/// failed-refs.json
/// ```
///
/// Writes go through a temp file and a rename, so a crash mid-write leaves
/// the previous document intact.
pub struct FileJournalStore {
    dir: PathBuf,
}

impl FileJournalStore {
    pub fn new(dir: &Path) -> JournalResult<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn journal_path(&self, work: &str, status: ItemStatus) -> PathBuf {
        self.dir
            .join(format!("{}.{}.json", slug(work), status.as_str()))
    }

    fn write_atomic(&self, path: &Path, contents: &str) -> JournalResult<()> {
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl JournalStore for FileJournalStore {
    fn get(&self, work: &str, status: ItemStatus) -> JournalResult<Option<WorkJournal>> {
        let path = self.journal_path(work, status);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let journal: WorkJournal = serde_json::from_str(&contents)?;
        Ok(Some(journal))
    }

    fn put(&mut self, work: &str, status: ItemStatus, journal: &WorkJournal) -> JournalResult<()> {
        let path = self.journal_path(work, status);
        let contents = serde_json::to_string_pretty(journal)?;
        self.write_atomic(&path, &contents)
    }

    fn works_with(&self, status: ItemStatus) -> JournalResult<Vec<String>> {
        let suffix = format!(".{}.json", status.as_str());
        let mut works = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = match name.to_str() {
                Some(name) => name,
                None => continue,
            };
            if !name.ends_with(&suffix) || name == FAILED_REFS_FILE {
                continue;
            }

            match fs::read_to_string(entry.path())
                .map_err(crate::journal::JournalError::from)
                .and_then(|c| serde_json::from_str::<WorkJournal>(&c).map_err(Into::into))
            {
                Ok(journal) => works.push(journal.work),
                Err(e) => {
                    // One unreadable journal must not kill the global scan
                    tracing::warn!("Skipping unreadable journal {}: {}", name, e);
                }
            }
        }

        works.sort();
        Ok(works)
    }

    fn failed_refs(&self) -> JournalResult<Vec<String>> {
        let path = self.dir.join(FAILED_REFS_FILE);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let refs: Vec<String> = serde_json::from_str(&contents)?;
        Ok(refs)
    }

    fn set_failed_refs(&mut self, refs: &[String]) -> JournalResult<()> {
        let path = self.dir.join(FAILED_REFS_FILE);
        let contents = serde_json::to_string_pretty(refs)?;
        self.write_atomic(&path, &contents)
    }
}

/// Filesystem-safe name for a work: lowercased, runs of other characters
/// collapsed to single hyphens
pub(crate) fn slug(work: &str) -> String {
    let mut out = String::with_capacity(work.len());
    for c in work.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    if out.is_empty() {
        "work".to_string()
    } else {
        out
    }
}
