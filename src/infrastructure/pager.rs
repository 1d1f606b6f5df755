//! Paginated retrieval producer
//!
//! Pulls list pages one at a time from the list collaborator. The stream is
//! cold, forward-only and scoped to one run; restarting from a later page is
//! the caller's job (it re-creates the stream with an updated start page).
//!
//! Termination policy: an empty page ends the stream (end of data, not an
//! error); a fetch error after the collaborator's own retry budget also ends
//! the stream and surfaces to the caller. After each successfully yielded
//! page the producer sleeps a uniform random delay from the page delay range
//! before the next fetch - rate limiting is a hard requirement here, not
//! best effort.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::domain::case::CaseSummary;
use crate::domain::errors::PageFetchError;
use crate::domain::job::DelayRange;
use crate::domain::services::{CaseListProvider, ListFilter, PageAuditSink, PageOutcome};

/// Forward-only page puller with pacing and per-page audit recording.
pub struct PageStream {
    provider: Arc<dyn CaseListProvider>,
    audit: Arc<dyn PageAuditSink>,
    job_id: String,
    filter: ListFilter,
    delay: DelayRange,
    next_page: u32,
    end_page: Option<u32>,
    yielded_any: bool,
    exhausted: bool,
}

impl PageStream {
    pub fn new(
        provider: Arc<dyn CaseListProvider>,
        audit: Arc<dyn PageAuditSink>,
        job_id: impl Into<String>,
        filter: ListFilter,
        delay: DelayRange,
        start_page: u32,
        max_pages: Option<u32>,
    ) -> Self {
        let end_page = max_pages.map(|n| start_page.saturating_add(n));
        Self {
            provider,
            audit,
            job_id: job_id.into(),
            filter,
            delay,
            next_page: start_page,
            end_page,
            yielded_any: false,
            exhausted: false,
        }
    }

    /// The page the next call will fetch. Exposed so the worker can record
    /// resume positions.
    pub fn current_page(&self) -> u32 {
        self.next_page
    }

    /// Fetch the next page. `Ok(None)` means the stream ended normally
    /// (page limit reached or the source ran dry). After an `Err` the
    /// stream is dead and keeps returning `Ok(None)`.
    pub async fn next_page(
        &mut self,
    ) -> Result<Option<(Vec<CaseSummary>, u32)>, PageFetchError> {
        if self.exhausted {
            return Ok(None);
        }
        if let Some(end) = self.end_page {
            if self.next_page >= end {
                debug!(job_id = %self.job_id, "page limit reached");
                self.exhausted = true;
                return Ok(None);
            }
        }

        // Pace between pages, not before the first fetch.
        if self.yielded_any {
            tokio::time::sleep(self.delay.sample()).await;
        }

        let page = self.next_page;
        match self.provider.fetch_page(page, &self.filter).await {
            Ok(items) if items.is_empty() => {
                info!(job_id = %self.job_id, page, "empty page, end of data");
                self.audit
                    .record_page(&self.job_id, page, PageOutcome::Empty)
                    .await;
                self.exhausted = true;
                Ok(None)
            }
            Ok(items) => {
                debug!(job_id = %self.job_id, page, count = items.len(), "page fetched");
                self.audit
                    .record_page(
                        &self.job_id,
                        page,
                        PageOutcome::Fetched {
                            item_count: items.len(),
                        },
                    )
                    .await;
                self.next_page += 1;
                self.yielded_any = true;
                Ok(Some((items, page)))
            }
            Err(e) => {
                warn!(job_id = %self.job_id, page, error = %e, "page fetch failed, stopping stream");
                self.audit
                    .record_page(
                        &self.job_id,
                        page,
                        PageOutcome::Failed {
                            kind: e.kind(),
                            message: e.to_string(),
                        },
                    )
                    .await;
                self.exhausted = true;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedProvider {
        pages: Mutex<Vec<Result<Vec<CaseSummary>, PageFetchError>>>,
    }

    impl ScriptedProvider {
        fn new(pages: Vec<Result<Vec<CaseSummary>, PageFetchError>>) -> Arc<Self> {
            Arc::new(Self {
                pages: Mutex::new(pages),
            })
        }
    }

    #[async_trait]
    impl CaseListProvider for ScriptedProvider {
        async fn fetch_page(
            &self,
            _page: u32,
            _filter: &ListFilter,
        ) -> Result<Vec<CaseSummary>, PageFetchError> {
            let mut pages = self.pages.lock().unwrap();
            if pages.is_empty() {
                Ok(Vec::new())
            } else {
                pages.remove(0)
            }
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        outcomes: Mutex<Vec<(u32, PageOutcome)>>,
    }

    #[async_trait]
    impl PageAuditSink for RecordingSink {
        async fn record_page(&self, _job_id: &str, page: u32, outcome: PageOutcome) {
            self.outcomes.lock().unwrap().push((page, outcome));
        }
    }

    fn summaries(ids: &[u64]) -> Vec<CaseSummary> {
        ids.iter()
            .map(|&id| CaseSummary::new(id, Some(format!("https://example.com/{id}")), None))
            .collect()
    }

    fn no_delay() -> DelayRange {
        DelayRange::new(0.0, 0.0)
    }

    #[tokio::test]
    async fn yields_pages_in_order_then_ends_on_empty() {
        let provider = ScriptedProvider::new(vec![
            Ok(summaries(&[1, 2])),
            Ok(summaries(&[3])),
            Ok(vec![]),
        ]);
        let sink = Arc::new(RecordingSink::default());
        let mut stream = PageStream::new(
            provider,
            sink.clone(),
            "job",
            ListFilter::default(),
            no_delay(),
            0,
            None,
        );

        let (items, page) = stream.next_page().await.unwrap().unwrap();
        assert_eq!((items.len(), page), (2, 0));
        let (items, page) = stream.next_page().await.unwrap().unwrap();
        assert_eq!((items.len(), page), (1, 1));
        assert!(stream.next_page().await.unwrap().is_none());
        // Dead stream stays dead.
        assert!(stream.next_page().await.unwrap().is_none());

        let outcomes = sink.outcomes.lock().unwrap();
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[2].1, PageOutcome::Empty);
    }

    #[tokio::test]
    async fn respects_page_limit() {
        let provider =
            ScriptedProvider::new(vec![Ok(summaries(&[1])), Ok(summaries(&[2]))]);
        let sink = Arc::new(RecordingSink::default());
        let mut stream = PageStream::new(
            provider,
            sink,
            "job",
            ListFilter::default(),
            no_delay(),
            3,
            Some(1),
        );

        let (_, page) = stream.next_page().await.unwrap().unwrap();
        assert_eq!(page, 3);
        assert!(stream.next_page().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fetch_error_kills_the_stream_and_is_audited() {
        let provider = ScriptedProvider::new(vec![
            Ok(summaries(&[1])),
            Err(PageFetchError::Network {
                page: 1,
                message: "connection reset".into(),
            }),
        ]);
        let sink = Arc::new(RecordingSink::default());
        let mut stream = PageStream::new(
            provider,
            sink.clone(),
            "job",
            ListFilter::default(),
            no_delay(),
            0,
            None,
        );

        assert!(stream.next_page().await.unwrap().is_some());
        let err = stream.next_page().await.unwrap_err();
        assert_eq!(err.kind(), "network");
        assert!(stream.next_page().await.unwrap().is_none());

        let outcomes = sink.outcomes.lock().unwrap();
        assert!(matches!(
            outcomes[1].1,
            PageOutcome::Failed { kind: "network", .. }
        ));
    }
}
