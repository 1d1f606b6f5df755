//! Crawl job state: immutable spec, status machine, progress counters
//!
//! A job is created once by the caller and mutated only by the worker that
//! owns it. Terminal statuses are written exactly once and never transition
//! again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::CrawlError;

/// Inclusive delay range in seconds for randomized request pacing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DelayRange {
    pub min_secs: f64,
    pub max_secs: f64,
}

impl DelayRange {
    pub fn new(min_secs: f64, max_secs: f64) -> Self {
        Self { min_secs, max_secs }
    }

    /// Uniform random delay within the range.
    pub fn sample(&self) -> std::time::Duration {
        let (lo, hi) = if self.min_secs <= self.max_secs {
            (self.min_secs, self.max_secs)
        } else {
            (self.max_secs, self.min_secs)
        };
        let secs = lo + fastrand::f64() * (hi - lo);
        std::time::Duration::from_secs_f64(secs.max(0.0))
    }
}

/// Immutable configuration for one crawl job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    pub start_page: u32,
    /// Inclusive end page; `None` crawls until the source runs dry.
    pub end_page: Option<u32>,
    /// Item-type filter forwarded to the list collaborator.
    pub case_type: Option<u32>,
    /// Keyword filter forwarded to the list collaborator.
    pub search_value: Option<String>,
    pub batch_size: usize,
    pub page_delay: DelayRange,
    pub item_delay: DelayRange,
    pub enable_resume: bool,
    /// Control signal / progress poll interval, in processed items.
    pub poll_interval: usize,
}

impl JobSpec {
    /// Number of pages to crawl, when the range is bounded.
    pub fn max_pages(&self) -> Option<u32> {
        self.end_page
            .map(|end| end.saturating_sub(self.start_page) + 1)
    }
}

/// Lifecycle status of a crawl job.
///
/// `pending -> running -> {paused, completed, failed, terminated}`;
/// `paused -> {running, terminated}`; `cancelled` only before execution
/// starts. Terminal states have no outgoing transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
    Terminated,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Terminated
        )
    }

    /// Whether the status machine permits `self -> to`.
    pub fn can_transition_to(&self, to: JobStatus) -> bool {
        use JobStatus::*;
        match (self, to) {
            (Pending, Running) | (Pending, Cancelled) => true,
            (Running, Paused)
            | (Running, Completed)
            | (Running, Failed)
            | (Running, Terminated) => true,
            (Paused, Running) | (Paused, Terminated) | (Paused, Failed) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Terminated => "terminated",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse progress counters published by the worker and read by callers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub completed_pages: u32,
    pub current_page: u32,
    pub total_pages: Option<u32>,
    /// Successfully crawled cases; failures are counted in `total_failed`.
    pub total_crawled: u64,
    pub total_saved: u64,
    pub total_failed: u64,
    pub batches_saved: u64,
    pub running: bool,
    pub paused: bool,
}

/// One configured, resumable crawl run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlJob {
    pub job_id: String,
    pub spec: JobSpec,
    pub status: JobStatus,
    pub progress: ProgressSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_stack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_speed_per_min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_rate: Option<f64>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl CrawlJob {
    pub fn new(job_id: impl Into<String>, spec: JobSpec) -> Self {
        let total_pages = spec.max_pages();
        Self {
            job_id: job_id.into(),
            spec,
            status: JobStatus::Pending,
            progress: ProgressSnapshot {
                total_pages,
                ..ProgressSnapshot::default()
            },
            error_message: None,
            error_stack: None,
            duration_secs: None,
            avg_speed_per_min: None,
            error_rate: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Apply a status transition, rejecting anything the machine forbids.
    /// Terminal statuses are immutable once written.
    pub fn transition_to(&mut self, to: JobStatus) -> Result<(), CrawlError> {
        if !self.status.can_transition_to(to) {
            return Err(CrawlError::InvalidTransition {
                job_id: self.job_id.clone(),
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        match to {
            JobStatus::Running if self.started_at.is_none() => {
                self.started_at = Some(Utc::now());
            }
            s if s.is_terminal() => {
                self.completed_at = Some(Utc::now());
            }
            _ => {}
        }
        self.status = to;
        Ok(())
    }

    /// Final derived stats: run duration, average speed (items/minute) and
    /// an error rate capped at 1.0.
    pub fn finalize_stats(&mut self) {
        if let (Some(started), Some(completed)) = (self.started_at, self.completed_at) {
            let secs = (completed - started).num_milliseconds() as f64 / 1000.0;
            self.duration_secs = Some(secs.max(0.0));
            if secs > 0.0 && self.progress.total_crawled > 0 {
                self.avg_speed_per_min = Some(self.progress.total_crawled as f64 / secs * 60.0);
            }
        }
        let attempted = self.progress.total_crawled.max(1) as f64;
        self.error_rate = Some((self.progress.total_failed as f64 / attempted).min(1.0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> JobSpec {
        JobSpec {
            name: "test".into(),
            start_page: 0,
            end_page: Some(4),
            case_type: None,
            search_value: None,
            batch_size: 30,
            page_delay: DelayRange::new(0.0, 0.0),
            item_delay: DelayRange::new(0.0, 0.0),
            enable_resume: true,
            poll_interval: 10,
        }
    }

    #[test]
    fn max_pages_is_inclusive() {
        assert_eq!(spec().max_pages(), Some(5));
        let mut unbounded = spec();
        unbounded.end_page = None;
        assert_eq!(unbounded.max_pages(), None);
    }

    #[test]
    fn happy_path_transitions() {
        let mut job = CrawlJob::new("j", spec());
        job.transition_to(JobStatus::Running).unwrap();
        assert!(job.started_at.is_some());
        job.transition_to(JobStatus::Paused).unwrap();
        job.transition_to(JobStatus::Running).unwrap();
        job.transition_to(JobStatus::Completed).unwrap();
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn terminal_status_is_immutable() {
        let mut job = CrawlJob::new("j", spec());
        job.transition_to(JobStatus::Running).unwrap();
        job.transition_to(JobStatus::Failed).unwrap();
        assert!(job.transition_to(JobStatus::Running).is_err());
        assert!(job.transition_to(JobStatus::Completed).is_err());
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn cancel_only_before_execution() {
        let mut job = CrawlJob::new("j", spec());
        job.transition_to(JobStatus::Cancelled).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);

        let mut running = CrawlJob::new("j2", spec());
        running.transition_to(JobStatus::Running).unwrap();
        assert!(running.transition_to(JobStatus::Cancelled).is_err());
    }

    #[test]
    fn stop_while_paused_goes_terminated() {
        let mut job = CrawlJob::new("j", spec());
        job.transition_to(JobStatus::Running).unwrap();
        job.transition_to(JobStatus::Paused).unwrap();
        job.transition_to(JobStatus::Terminated).unwrap();
        assert!(job.status.is_terminal());
    }

    #[test]
    fn error_rate_is_capped() {
        let mut job = CrawlJob::new("j", spec());
        job.transition_to(JobStatus::Running).unwrap();
        job.progress.total_crawled = 2;
        job.progress.total_failed = 5;
        job.transition_to(JobStatus::Completed).unwrap();
        job.finalize_stats();
        assert_eq!(job.error_rate, Some(1.0));
    }

    #[test]
    fn delay_range_sample_stays_in_bounds() {
        let range = DelayRange::new(0.01, 0.02);
        for _ in 0..100 {
            let d = range.sample();
            assert!(d >= std::time::Duration::from_secs_f64(0.01));
            assert!(d <= std::time::Duration::from_secs_f64(0.02));
        }
    }
}
