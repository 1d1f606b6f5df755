//! Error taxonomy for the crawl engine
//!
//! Collaborators classify their own failures; this crate never retries them
//! beyond what the collaborator already did. Per-item errors are converted
//! into synthetic failure records and the loop continues; only an
//! unrecoverable first-page fetch error or an error escaping the worker loop
//! fails the job.

use thiserror::Error;

/// A list-page fetch failure, classified by the list collaborator after its
/// own retry budget is exhausted. Stops the page stream.
#[derive(Debug, Clone, Error)]
pub enum PageFetchError {
    #[error("network error fetching page {page}: {message}")]
    Network { page: u32, message: String },

    #[error("parse error on page {page}: {message}")]
    Parse { page: u32, message: String },

    #[error("timeout fetching page {page}: {message}")]
    Timeout { page: u32, message: String },
}

impl PageFetchError {
    /// Short classification label used by the page audit sink.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network { .. } => "network",
            Self::Parse { .. } => "parse",
            Self::Timeout { .. } => "timeout",
        }
    }

    pub fn page(&self) -> u32 {
        match self {
            Self::Network { page, .. } | Self::Parse { page, .. } | Self::Timeout { page, .. } => {
                *page
            }
        }
    }
}

/// A detail-page fetch failure. Always caught per item, never fatal.
#[derive(Debug, Clone, Error)]
#[error("detail fetch failed for {url}: {message}")]
pub struct DetailFetchError {
    pub url: String,
    pub message: String,
}

impl DetailFetchError {
    pub fn new(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            message: message.into(),
        }
    }
}

/// Control-plane and job-level errors.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("job {0} already has a live worker")]
    AlreadyRunning(String),

    #[error("unknown job: {0}")]
    UnknownJob(String),

    #[error("invalid status transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: String,
        to: String,
    },

    #[error("job {0} is not running")]
    NotRunning(String),

    #[error("job {0} is not paused")]
    NotPaused(String),

    #[error("first page fetch failed: {0}")]
    FirstPageFailed(#[source] PageFetchError),

    #[error("crawl yielded no data: {0}")]
    NoDataCrawled(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_fetch_error_classification() {
        let err = PageFetchError::Timeout {
            page: 3,
            message: "deadline exceeded".into(),
        };
        assert_eq!(err.kind(), "timeout");
        assert_eq!(err.page(), 3);
    }

    #[test]
    fn error_messages_are_descriptive() {
        let err = CrawlError::AlreadyRunning("job-1".into());
        assert!(err.to_string().contains("job-1"));
    }
}
