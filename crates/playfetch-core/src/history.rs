//! Append-only per-folder download history.
//!
//! Every task produces exactly one [`HistoryRecord`], which the coordinator
//! appends as one JSON line to `<folder>/download_history.jsonl`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::descriptor::{Quality, TaskDescriptor};
use crate::error::{Error, Result};

/// Default history file name inside each destination folder.
pub const HISTORY_FILE_NAME: &str = "download_history.jsonl";

/// Terminal status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    /// The download succeeded.
    Ok,
    /// Anything else, including pause and cancel.
    Error,
}

/// Outcome log entry for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// When the task started.
    pub ts: DateTime<Utc>,
    /// Source URL.
    pub url: String,
    /// Item key.
    pub key: String,
    /// Destination folder.
    pub folder: PathBuf,
    /// Requested quality.
    pub quality: Quality,
    /// Output template used.
    pub template: String,
    /// Terminal status.
    pub status: HistoryStatus,
    /// Error message for non-ok outcomes.
    pub error: Option<String>,
}

impl HistoryRecord {
    /// Build the record for a task. `error` of `None` means success.
    #[must_use]
    pub fn for_task(
        descriptor: &TaskDescriptor,
        started_at: DateTime<Utc>,
        error: Option<String>,
    ) -> Self {
        Self {
            ts: started_at,
            url: descriptor.url().to_string(),
            key: descriptor.key().to_string(),
            folder: descriptor.folder().to_path_buf(),
            quality: descriptor.quality().clone(),
            template: descriptor.output_template().to_string(),
            status: if error.is_none() {
                HistoryStatus::Ok
            } else {
                HistoryStatus::Error
            },
            error,
        }
    }

    /// Whether the task succeeded.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == HistoryStatus::Ok
    }
}

/// Writes history records next to the downloaded files.
#[derive(Debug, Clone)]
pub struct HistoryLog {
    file_name: String,
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::new(HISTORY_FILE_NAME)
    }
}

impl HistoryLog {
    /// Create a log writing to `file_name` inside each folder.
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
        }
    }

    /// History file for a folder.
    #[must_use]
    pub fn path_for(&self, folder: &Path) -> PathBuf {
        folder.join(&self.file_name)
    }

    /// Append a record to its folder's history file.
    ///
    /// Returns the path written to.
    pub fn append(&self, record: &HistoryRecord) -> Result<PathBuf> {
        let path = self.path_for(&record.folder);
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::FileSystem {
                path: path.clone(),
                message: format!("Failed to open history file: {e}"),
            })?;
        file.write_all(line.as_bytes())
            .map_err(|e| Error::FileSystem {
                path: path.clone(),
                message: format!("Failed to append history record: {e}"),
            })?;

        debug!("Appended history record for '{}' to {}", record.key, path.display());
        Ok(path)
    }

    /// Read every parseable record of a folder. Malformed lines are skipped.
    pub fn read(&self, folder: &Path) -> Result<Vec<HistoryRecord>> {
        let path = self.path_for(folder);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path).map_err(|e| Error::FileSystem {
            path: path.clone(),
            message: format!("Failed to read history file: {e}"),
        })?;

        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Skipping malformed history line in {}: {}", path.display(), e);
                    None
                }
            })
            .collect())
    }
}
