//! Collaborator contracts
//!
//! The wire-level clients live outside this crate. The engine only sees
//! these traits: a list collaborator that fetches one page of summaries, a
//! detail collaborator that turns a case URL into structured fields, and an
//! audit sink that records per-page outcomes. Collaborators carry their own
//! timeout and retry budgets; an error surfaced here is final.

use async_trait::async_trait;

use super::case::{CaseDetail, CaseSummary};
use super::errors::{DetailFetchError, PageFetchError};

/// Filters forwarded to the list collaborator on every page fetch.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub case_type: Option<u32>,
    pub search_value: Option<String>,
}

/// Fetches one page of case summaries. An empty vec means end-of-data,
/// not an error.
#[async_trait]
pub trait CaseListProvider: Send + Sync {
    async fn fetch_page(
        &self,
        page: u32,
        filter: &ListFilter,
    ) -> Result<Vec<CaseSummary>, PageFetchError>;
}

/// Fetches and extracts the structured fields of one case detail page.
#[async_trait]
pub trait CaseDetailProvider: Send + Sync {
    async fn fetch_detail(&self, url: &str) -> Result<CaseDetail, DetailFetchError>;
}

/// Outcome of a single list-page fetch, as recorded for auditing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    /// Page fetched successfully with this many items.
    Fetched { item_count: usize },
    /// Page fetched successfully but contained no items (end of data).
    Empty,
    /// Fetch failed after the collaborator's retry budget;
    /// `kind` is one of `network`, `parse`, `timeout`.
    Failed { kind: &'static str, message: String },
}

/// Records per-page outcomes. A side effect of the producer, not required
/// for pipeline correctness; recording failures are logged and ignored.
#[async_trait]
pub trait PageAuditSink: Send + Sync {
    async fn record_page(&self, job_id: &str, page: u32, outcome: PageOutcome);
}

/// No-op sink for callers that do not track page outcomes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAuditSink;

#[async_trait]
impl PageAuditSink for NullAuditSink {
    async fn record_page(&self, _job_id: &str, _page: u32, _outcome: PageOutcome) {}
}
