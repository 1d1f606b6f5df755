//! Batched durable output
//!
//! Processed records accumulate in memory and are flushed as numbered,
//! immutable JSON files (`cases_batch_NNNN.json`) once the configured batch
//! size is reached, plus one final partial batch on completion or stop.
//! Numbering restarts from `max existing suffix + 1`, recovered by scanning
//! the directory, so it stays strictly increasing across crashes without any
//! separate counter state.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::case::CaseRecord;

/// Filename prefix shared with the checkpoint scanner.
pub const BATCH_FILE_PREFIX: &str = "cases_batch_";

/// On-disk batch document, consumed by the downstream import stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchFile {
    pub batch_num: u64,
    pub batch_size: usize,
    pub created_at: DateTime<Utc>,
    pub cases: Vec<CaseRecord>,
}

pub fn batch_filename(batch_num: u64) -> String {
    format!("{BATCH_FILE_PREFIX}{batch_num:04}.json")
}

/// Scan `output_dir` for the highest existing batch number and return the
/// next one. Files whose suffix does not parse are ignored.
pub async fn next_batch_number(output_dir: &Path) -> u64 {
    let mut entries = match tokio::fs::read_dir(output_dir).await {
        Ok(entries) => entries,
        Err(_) => return 0,
    };

    let mut max: Option<u64> = None;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let Some(stem) = name
            .strip_prefix(BATCH_FILE_PREFIX)
            .and_then(|rest| rest.strip_suffix(".json"))
        else {
            continue;
        };
        if let Ok(num) = stem.parse::<u64>() {
            max = Some(max.map_or(num, |m: u64| m.max(num)));
        }
    }
    max.map_or(0, |m| m + 1)
}

/// Accumulates records and flushes them as numbered batch files.
///
/// Owned exclusively by one job's worker; flushed batches are never modified
/// or merged afterwards.
#[derive(Debug)]
pub struct BatchWriter {
    output_dir: PathBuf,
    batch_size: usize,
    buffer: Vec<CaseRecord>,
    next_batch_num: u64,
    saved_ids: BTreeSet<u64>,
    total_saved: u64,
    batches_saved: u64,
}

impl BatchWriter {
    /// Create the output directory if needed and recover the next batch
    /// number from whatever batches already exist.
    pub async fn open(output_dir: impl Into<PathBuf>, batch_size: usize) -> std::io::Result<Self> {
        let output_dir = output_dir.into();
        tokio::fs::create_dir_all(&output_dir).await?;
        let next_batch_num = next_batch_number(&output_dir).await;
        Ok(Self {
            output_dir,
            batch_size: batch_size.max(1),
            buffer: Vec::new(),
            next_batch_num,
            saved_ids: BTreeSet::new(),
            total_saved: 0,
            batches_saved: 0,
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Ids flushed to disk during this run.
    pub fn saved_ids(&self) -> &BTreeSet<u64> {
        &self.saved_ids
    }

    pub fn total_saved(&self) -> u64 {
        self.total_saved
    }

    pub fn batches_saved(&self) -> u64 {
        self.batches_saved
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Add a record to the current in-memory buffer.
    pub fn append(&mut self, record: CaseRecord) {
        self.buffer.push(record);
    }

    /// Flush the buffer as a new batch file once it has reached the
    /// configured batch size. Returns whether a flush happened.
    pub async fn flush_if_full(&mut self) -> std::io::Result<bool> {
        if self.buffer.len() < self.batch_size {
            return Ok(false);
        }
        self.flush().await?;
        Ok(true)
    }

    /// Flush any non-empty partial buffer as a final, possibly undersized
    /// batch. Called on normal completion and on stop so no buffered record
    /// is lost on a graceful exit.
    pub async fn flush_remainder(&mut self) -> std::io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.flush().await
    }

    async fn flush(&mut self) -> std::io::Result<()> {
        let cases = std::mem::take(&mut self.buffer);
        let batch_num = self.next_batch_num;
        let file = BatchFile {
            batch_num,
            batch_size: cases.len(),
            created_at: Utc::now(),
            cases,
        };

        let path = self.output_dir.join(batch_filename(batch_num));
        let payload = match serde_json::to_vec_pretty(&file) {
            Ok(payload) => payload,
            Err(e) => {
                self.buffer = file.cases;
                return Err(std::io::Error::other(e));
            }
        };
        if let Err(e) = tokio::fs::write(&path, payload).await {
            warn!(path = %path.display(), error = %e, "failed to write batch file, keeping records buffered");
            self.buffer = file.cases;
            return Err(e);
        }

        self.next_batch_num += 1;
        self.batches_saved += 1;
        self.total_saved += file.cases.len() as u64;
        self.saved_ids.extend(file.cases.iter().map(|c| c.case_id));

        info!(
            batch_num,
            count = file.cases.len(),
            path = %path.display(),
            "batch flushed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::case::CaseRecord;

    fn record(id: u64) -> CaseRecord {
        CaseRecord::failure(id, None, None, "test")
    }

    #[tokio::test]
    async fn batches_are_numbered_without_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = BatchWriter::open(dir.path(), 2).await.unwrap();

        for id in 0..6u64 {
            writer.append(record(id));
            writer.flush_if_full().await.unwrap();
        }

        assert_eq!(writer.batches_saved(), 3);
        for n in 0..3u64 {
            assert!(dir.path().join(batch_filename(n)).exists());
        }
        assert!(!dir.path().join(batch_filename(3)).exists());
    }

    #[tokio::test]
    async fn numbering_resumes_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut writer = BatchWriter::open(dir.path(), 1).await.unwrap();
            writer.append(record(1));
            writer.flush_if_full().await.unwrap();
            writer.append(record(2));
            writer.flush_if_full().await.unwrap();
        }

        assert_eq!(next_batch_number(dir.path()).await, 2);

        let mut writer = BatchWriter::open(dir.path(), 1).await.unwrap();
        writer.append(record(3));
        writer.flush_if_full().await.unwrap();
        assert!(dir.path().join(batch_filename(2)).exists());
    }

    #[tokio::test]
    async fn flush_remainder_writes_partial_batch() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = BatchWriter::open(dir.path(), 10).await.unwrap();
        writer.append(record(1));
        writer.append(record(2));
        assert!(!writer.flush_if_full().await.unwrap());

        writer.flush_remainder().await.unwrap();
        assert_eq!(writer.batches_saved(), 1);
        assert_eq!(writer.total_saved(), 2);

        let raw = tokio::fs::read(dir.path().join(batch_filename(0)))
            .await
            .unwrap();
        let file: BatchFile = serde_json::from_slice(&raw).unwrap();
        assert_eq!(file.batch_size, 2);
        assert_eq!(file.cases.len(), 2);
    }

    #[tokio::test]
    async fn flush_remainder_on_empty_buffer_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = BatchWriter::open(dir.path(), 5).await.unwrap();
        writer.flush_remainder().await.unwrap();
        assert_eq!(writer.batches_saved(), 0);
        assert_eq!(next_batch_number(dir.path()).await, 0);
    }

    #[tokio::test]
    async fn saved_ids_track_flushed_records_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = BatchWriter::open(dir.path(), 2).await.unwrap();
        writer.append(record(1));
        assert!(writer.saved_ids().is_empty());
        writer.append(record(2));
        writer.flush_if_full().await.unwrap();
        assert!(writer.saved_ids().contains(&1));
        assert!(writer.saved_ids().contains(&2));
    }

    #[tokio::test]
    async fn failed_flush_keeps_records_buffered_for_retry() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = BatchWriter::open(dir.path(), 2).await.unwrap();
        writer.append(record(1));
        writer.append(record(2));

        // Block the batch path with a directory so the write fails.
        let blocker = dir.path().join(batch_filename(0));
        tokio::fs::create_dir(&blocker).await.unwrap();
        assert!(writer.flush_if_full().await.is_err());
        assert_eq!(writer.buffered(), 2);
        assert_eq!(writer.total_saved(), 0);

        tokio::fs::remove_dir(&blocker).await.unwrap();
        writer.flush_remainder().await.unwrap();
        assert_eq!(writer.buffered(), 0);
        assert_eq!(writer.total_saved(), 2);
        assert!(writer.saved_ids().contains(&1));
    }

    #[tokio::test]
    async fn unparsable_filenames_are_ignored_for_numbering() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("cases_batch_zzz.json"), b"{}")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("cases_batch_0005.json"), b"{}")
            .await
            .unwrap();
        assert_eq!(next_batch_number(dir.path()).await, 6);
    }
}
