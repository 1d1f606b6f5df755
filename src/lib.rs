//! case-crawler - crawl orchestration and checkpoint engine
//!
//! Ingests paginated listings from a case-library source, fetches per-case
//! detail pages, validates and batches the merged records into durable JSON
//! files, and survives pauses, operator stops, and process crashes without
//! silently dropping work. The wire-level list/detail clients are injected
//! behind traits; this crate owns the producer loop, the per-case pipeline,
//! the batch writer, checkpoint/reconciliation, and the control plane that
//! lets a caller pause, resume, or stop a running job and observe progress.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::controller::CrawlController;
pub use domain::case::{CaseDetail, CaseRecord, CaseSummary};
pub use domain::errors::{CrawlError, DetailFetchError, PageFetchError};
pub use domain::job::{CrawlJob, JobSpec, JobStatus, ProgressSnapshot};
pub use domain::services::{CaseDetailProvider, CaseListProvider, PageAuditSink, PageOutcome};
pub use infrastructure::config::CrawlerConfig;
