// Trial journal: an append-only sequence of JSON records, one per completed
// search trial. The whole array is rewritten on every append through a temp
// file and an atomic rename, so a crash mid-write never corrupts the journal.
//
// Single-writer only. Nothing here locks the file; running two searches
// against the same journal path is unsupported.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use crate::domain::errors::{ChurnError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialRecord {
    pub trial_number: usize,
    pub params: JsonValue,
    pub best_iteration: Option<usize>,
    pub value: f64,
    pub datetime: String,
    pub state: String,
}

pub struct TrialJournal {
    path: PathBuf,
}

impl TrialJournal {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all records. A missing file is an empty journal; unreadable
    /// content resets it with a warning rather than aborting the search.
    pub fn load(&self) -> Result<Vec<TrialRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| ChurnError::Journal(format!("{}: {}", self.path.display(), e)))?;
        match serde_json::from_str::<Vec<TrialRecord>>(&content) {
            Ok(records) => Ok(records),
            Err(e) => {
                warn!(
                    "Journal {} is not a valid record array ({}); starting over",
                    self.path.display(),
                    e
                );
                Ok(Vec::new())
            }
        }
    }

    /// Read-modify-rewrite append of one record.
    pub fn append(&self, record: TrialRecord) -> Result<()> {
        let mut records = self.load()?;
        let trial_number = record.trial_number;
        let value = record.value;
        records.push(record);
        self.rewrite(&records)?;
        info!(
            "Trial {} journaled - value: {:.0} ({} records)",
            trial_number,
            value,
            records.len()
        );
        Ok(())
    }

    fn rewrite(&self, records: &[TrialRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ChurnError::Journal(format!("{}: {}", parent.display(), e)))?;
            }
        }
        let json = serde_json::to_string_pretty(records)
            .map_err(|e| ChurnError::Journal(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .map_err(|e| ChurnError::Journal(format!("{}: {}", tmp.display(), e)))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| ChurnError::Journal(format!("{}: {}", self.path.display(), e)))?;
        Ok(())
    }

    /// Best completed record by achieved value.
    pub fn best(&self) -> Result<Option<TrialRecord>> {
        let records = self.load()?;
        Ok(records
            .into_iter()
            .filter(|r| r.state == "COMPLETE")
            .max_by(|a, b| a.value.partial_cmp(&b.value).unwrap_or(std::cmp::Ordering::Equal)))
    }
}
