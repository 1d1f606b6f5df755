//! Crawler configuration
//!
//! Engine-level defaults that individual jobs inherit unless their spec
//! overrides them. Stored as a single JSON document; a missing file yields
//! defaults, a malformed file is an error the caller sees.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::job::{DelayRange, JobSpec};

/// Engine defaults for new crawl jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// Root directory for per-job output subdirectories.
    pub output_root: PathBuf,
    /// Records per batch file.
    pub batch_size: usize,
    /// Delay range between list-page fetches, seconds.
    pub page_delay: DelayRange,
    /// Delay range between item detail fetches, seconds.
    pub item_delay: DelayRange,
    /// Control signal / progress poll interval, in processed items.
    pub poll_interval: usize,
    /// Whether new jobs resume from their checkpoint by default.
    pub enable_resume: bool,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("data/json"),
            batch_size: 30,
            page_delay: DelayRange::new(2.0, 5.0),
            item_delay: DelayRange::new(1.0, 3.0),
            poll_interval: 10,
            enable_resume: true,
        }
    }
}

impl CrawlerConfig {
    /// Load from `path`, falling back to defaults when the file is absent.
    pub async fn load_or_default(path: &Path) -> Result<Self> {
        match tokio::fs::read(path).await {
            Ok(raw) => {
                let config: Self = serde_json::from_slice(&raw)
                    .with_context(|| format!("malformed config file: {}", path.display()))?;
                info!(path = %path.display(), "loaded crawler config");
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => {
                Err(e).with_context(|| format!("failed to read config: {}", path.display()))
            }
        }
    }

    /// Persist the configuration as pretty JSON.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let payload = serde_json::to_vec_pretty(self).context("failed to serialize config")?;
        tokio::fs::write(path, payload)
            .await
            .with_context(|| format!("failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Output directory for one job: `<output_root>/<job_id>`.
    pub fn job_output_dir(&self, job_id: &str) -> PathBuf {
        self.output_root.join(job_id)
    }

    /// Build a job spec from these defaults.
    pub fn job_spec(&self, name: impl Into<String>, start_page: u32, end_page: Option<u32>) -> JobSpec {
        JobSpec {
            name: name.into(),
            start_page,
            end_page,
            case_type: None,
            search_value: None,
            batch_size: self.batch_size,
            page_delay: self.page_delay,
            item_delay: self.item_delay,
            enable_resume: self.enable_resume,
            poll_interval: self.poll_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CrawlerConfig::load_or_default(&dir.path().join("config.json"))
            .await
            .unwrap();
        assert_eq!(config.batch_size, 30);
        assert_eq!(config.poll_interval, 10);
        assert!(config.enable_resume);
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = CrawlerConfig::default();
        config.batch_size = 7;
        config.page_delay = DelayRange::new(0.1, 0.2);
        config.save(&path).await.unwrap();

        let loaded = CrawlerConfig::load_or_default(&path).await.unwrap();
        assert_eq!(loaded.batch_size, 7);
        assert_eq!(loaded.page_delay, DelayRange::new(0.1, 0.2));
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, b"not json").await.unwrap();
        assert!(CrawlerConfig::load_or_default(&path).await.is_err());
    }

    #[test]
    fn job_spec_inherits_defaults() {
        let config = CrawlerConfig::default();
        let spec = config.job_spec("nightly", 0, Some(9));
        assert_eq!(spec.batch_size, 30);
        assert_eq!(spec.max_pages(), Some(10));
        assert!(spec.enable_resume);
    }
}
