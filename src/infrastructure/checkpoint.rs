//! Checkpoint persistence and reconciliation
//!
//! The checkpoint is the full set of attempted case ids, overwritten as one
//! JSON document per job (`crawl_resume.json`). It may legitimately run
//! ahead of disk: the process can crash between marking an id attempted and
//! flushing the batch that would have contained it. The batch files
//! themselves are therefore the source of truth for "actually durable", and
//! [`reconcile`] computes the gap between the two sets.
//!
//! Checkpoint I/O is deliberately forgiving: a missing or corrupt file loads
//! as an empty set, and a failed save is logged and swallowed. Correctness
//! is recovered by reconciliation, not by retrying saves.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::batch_writer::{BatchFile, BATCH_FILE_PREFIX};

/// On-disk checkpoint document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointFile {
    pub crawled_ids: Vec<u64>,
    pub total_count: usize,
    pub last_updated: DateTime<Utc>,
}

/// Result of comparing the attempted-id set against the saved-id set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Attempted but not durably saved, sorted ascending.
    pub missing_ids: Vec<u64>,
    pub missing_count: usize,
    pub all_saved: bool,
    pub attempted_count: usize,
    pub saved_count: usize,
}

/// `missing = attempted - saved`. Pure function.
pub fn reconcile(attempted: &BTreeSet<u64>, saved: &BTreeSet<u64>) -> ReconcileReport {
    let missing_ids: Vec<u64> = attempted.difference(saved).copied().collect();
    let missing_count = missing_ids.len();
    ReconcileReport {
        missing_count,
        all_saved: missing_count == 0,
        attempted_count: attempted.len(),
        saved_count: saved.len(),
        missing_ids,
    }
}

/// Loads and saves the attempted-id checkpoint for one job.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Conventional checkpoint location inside a job's output directory.
    pub fn in_dir(output_dir: &Path) -> Self {
        Self::new(output_dir.join("crawl_resume.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted attempted-id set. Missing or malformed files load
    /// as an empty set; this is never an error for the caller.
    pub async fn load(&self) -> BTreeSet<u64> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no checkpoint file, starting fresh");
                return BTreeSet::new();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read checkpoint, starting fresh");
                return BTreeSet::new();
            }
        };

        match serde_json::from_slice::<CheckpointFile>(&raw) {
            Ok(file) => {
                let ids: BTreeSet<u64> = file.crawled_ids.into_iter().collect();
                info!(path = %self.path.display(), count = ids.len(), "loaded checkpoint");
                ids
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "malformed checkpoint, starting fresh");
                BTreeSet::new()
            }
        }
    }

    /// Overwrite the checkpoint with the full attempted-id set. I/O failure
    /// is logged and treated as non-fatal; the crawl continues and accepts
    /// the risk of redoing work after a later crash.
    pub async fn save(&self, ids: &BTreeSet<u64>) {
        let file = CheckpointFile {
            crawled_ids: ids.iter().copied().collect(),
            total_count: ids.len(),
            last_updated: Utc::now(),
        };

        let payload = match serde_json::to_vec_pretty(&file) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to serialize checkpoint");
                return;
            }
        };

        if let Some(parent) = self.path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!(path = %parent.display(), error = %e, "failed to create checkpoint directory");
                return;
            }
        }

        match tokio::fs::write(&self.path, payload).await {
            Ok(()) => debug!(path = %self.path.display(), count = ids.len(), "checkpoint saved"),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to save checkpoint, continuing")
            }
        }
    }
}

/// Derive the actually-durable id set by reading every batch file in the
/// output directory. Unreadable or malformed batch files are logged and
/// skipped rather than failing the scan.
pub async fn scan_saved_ids(output_dir: &Path) -> BTreeSet<u64> {
    let mut saved = BTreeSet::new();

    let mut entries = match tokio::fs::read_dir(output_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return saved,
        Err(e) => {
            warn!(dir = %output_dir.display(), error = %e, "failed to read output directory");
            return saved;
        }
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with(BATCH_FILE_PREFIX) || !name.ends_with(".json") {
            continue;
        }
        let path = entry.path();
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read batch file, skipping");
                continue;
            }
        };
        match serde_json::from_slice::<BatchFile>(&raw) {
            Ok(batch) => saved.extend(batch.cases.iter().map(|c| c.case_id)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "malformed batch file, skipping")
            }
        }
    }

    debug!(dir = %output_dir.display(), count = saved.len(), "scanned saved case ids");
    saved
}
