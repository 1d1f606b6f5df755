//! Crawl session - the per-job worker loop
//!
//! One session owns one job's checkpoint file and batch directory for its
//! whole life. It drives the page stream, runs the per-item
//! skip/fetch/merge/validate pipeline, and polls the control signal at item
//! and page boundaries only - never inside a network call - so pause/stop
//! latency is bounded by the current item or page.
//!
//! Whatever way the loop ends (exhaustion, stop, page error), the finalize
//! path always runs: flush the remaining buffer, reconcile attempted ids
//! against what is actually on disk, persist the final checkpoint, and
//! write the terminal status exactly once. That sequence is what guarantees
//! every attempted id ends up represented by exactly one durable record.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tracing::{error, info, warn};

use crate::domain::case::{merge_case, CaseRecord, CaseSummary};
use crate::domain::errors::PageFetchError;
use crate::domain::job::{CrawlJob, JobSpec, JobStatus, ProgressSnapshot};
use crate::domain::services::{CaseDetailProvider, CaseListProvider, ListFilter, PageAuditSink};
use crate::infrastructure::batch_writer::BatchWriter;
use crate::infrastructure::checkpoint::{reconcile, scan_saved_ids, CheckpointStore};
use crate::infrastructure::pager::PageStream;
use crate::infrastructure::validator::CaseValidator;

/// Cooperative control signal shared between the control plane and one
/// worker. Carried by a `watch` channel, so the worker always observes the
/// most recent command: a stop issued after (or instead of) a pause wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlSignal {
    #[default]
    Run,
    Pause,
    Stop,
}

/// Shared, concurrently-read job table. The controller inserts jobs; each
/// job's single worker is the only writer of its status and counters.
pub type JobTable = Arc<RwLock<HashMap<String, CrawlJob>>>;

/// How the item loop ended.
enum LoopEnd {
    /// Source ran dry or the page limit was reached.
    Exhausted,
    /// Stop signal observed.
    Stopped,
    /// The very first page failed; nothing was processed.
    FirstPageFailed(PageFetchError),
    /// A later page failed after some work had been done.
    PartialPageFailure(PageFetchError),
}

enum Poll {
    Continue,
    Stop,
}

/// A single crawl worker. Constructed by the controller, then handed off to
/// a spawned task that runs [`CrawlSession::run`] to completion.
pub struct CrawlSession {
    job_id: String,
    spec: JobSpec,
    start_page: u32,
    output_dir: PathBuf,
    list_provider: Arc<dyn CaseListProvider>,
    detail_provider: Arc<dyn CaseDetailProvider>,
    audit_sink: Arc<dyn PageAuditSink>,
    validator: CaseValidator,
    jobs: JobTable,
    control_rx: watch::Receiver<ControlSignal>,
    progress_tx: watch::Sender<ProgressSnapshot>,

    attempted: BTreeSet<u64>,
    /// Ids durably saved before this run started (from the disk scan).
    previously_saved: BTreeSet<u64>,
    total_crawled: u64,
    total_failed: u64,
    completed_pages: u32,
    current_page: u32,
    processed_count: u64,
    paused: bool,
}

impl CrawlSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_id: impl Into<String>,
        spec: JobSpec,
        start_page: u32,
        output_dir: PathBuf,
        list_provider: Arc<dyn CaseListProvider>,
        detail_provider: Arc<dyn CaseDetailProvider>,
        audit_sink: Arc<dyn PageAuditSink>,
        jobs: JobTable,
        control_rx: watch::Receiver<ControlSignal>,
        progress_tx: watch::Sender<ProgressSnapshot>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            current_page: start_page,
            start_page,
            output_dir,
            list_provider,
            detail_provider,
            audit_sink,
            validator: CaseValidator::new(),
            jobs,
            control_rx,
            progress_tx,
            spec,
            attempted: BTreeSet::new(),
            previously_saved: BTreeSet::new(),
            total_crawled: 0,
            total_failed: 0,
            completed_pages: 0,
            processed_count: 0,
            paused: false,
        }
    }

    /// Run the crawl to its terminal state. Never returns an error: every
    /// failure mode is converted into a terminal job status.
    pub async fn run(mut self) {
        info!(job_id = %self.job_id, start_page = self.start_page, "worker starting");
        self.set_status(JobStatus::Running).await;

        let checkpoint = CheckpointStore::in_dir(&self.output_dir);
        if self.spec.enable_resume {
            self.attempted = checkpoint.load().await;
            self.previously_saved = scan_saved_ids(&self.output_dir).await;
        }

        let mut writer = match BatchWriter::open(&self.output_dir, self.spec.batch_size).await {
            Ok(writer) => writer,
            Err(e) => {
                error!(job_id = %self.job_id, error = %e, "failed to open batch writer");
                self.fail(format!("failed to open output directory: {e}"), format!("{e:?}"))
                    .await;
                return;
            }
        };

        let end = self.item_loop(&mut writer, &checkpoint).await;
        self.finalize(writer, checkpoint, end).await;
    }

    async fn item_loop(&mut self, writer: &mut BatchWriter, checkpoint: &CheckpointStore) -> LoopEnd {
        let max_pages = self
            .spec
            .end_page
            .map(|end| end.saturating_sub(self.start_page) + 1);
        let filter = ListFilter {
            case_type: self.spec.case_type,
            search_value: self.spec.search_value.clone(),
        };
        let mut stream = PageStream::new(
            self.list_provider.clone(),
            self.audit_sink.clone(),
            self.job_id.clone(),
            filter,
            self.spec.page_delay,
            self.start_page,
            max_pages,
        );

        loop {
            let (items, page) = match stream.next_page().await {
                Ok(Some(page)) => page,
                Ok(None) => return LoopEnd::Exhausted,
                Err(e) => {
                    if self.processed_count == 0 && self.completed_pages == 0 {
                        return LoopEnd::FirstPageFailed(e);
                    }
                    warn!(job_id = %self.job_id, error = %e, "page fetch failed mid-run, finishing with partial results");
                    return LoopEnd::PartialPageFailure(e);
                }
            };

            self.current_page = page;
            let total = items.len();
            for (index, item) in items.into_iter().enumerate() {
                if let Poll::Stop = self.process_item(writer, checkpoint, item, index, total).await {
                    return LoopEnd::Stopped;
                }
            }

            self.completed_pages += 1;
            self.current_page = stream.current_page();

            // Page boundary is also a poll point.
            if let Poll::Stop = self.poll(writer, checkpoint).await {
                return LoopEnd::Stopped;
            }
        }
    }

    async fn process_item(
        &mut self,
        writer: &mut BatchWriter,
        checkpoint: &CheckpointStore,
        item: CaseSummary,
        index: usize,
        page_total: usize,
    ) -> Poll {
        let case_id = item.id;

        if self.spec.enable_resume && self.attempted.contains(&case_id) {
            if self.is_saved(writer, case_id) {
                // Already attempted and durably saved: nothing to do.
                return Poll::Continue;
            }
            // Attempted but never flushed - a prior run crashed between the
            // checkpoint save and the batch flush. Clear and reattempt.
            warn!(job_id = %self.job_id, case_id, "reattempting case that was checkpointed but never saved");
            self.attempted.remove(&case_id);
        }

        let record = match &item.url {
            None => {
                warn!(job_id = %self.job_id, case_id, "case has no url, recording failure");
                self.total_failed += 1;
                CaseRecord::failure(case_id, None, item.title.clone(), "missing url")
            }
            Some(url) => match self.detail_provider.fetch_detail(url).await {
                Ok(detail) => {
                    let mut record = merge_case(&item, &detail);
                    if let Err(validation_error) = self.validator.validate(&record) {
                        warn!(job_id = %self.job_id, case_id, %validation_error, "validation failed, keeping record");
                        record.validation_error = Some(validation_error);
                    }
                    self.total_crawled += 1;
                    info!(
                        job_id = %self.job_id,
                        case_id,
                        item = index + 1,
                        of = page_total,
                        "case crawled"
                    );
                    record
                }
                Err(e) => {
                    warn!(job_id = %self.job_id, case_id, error = %e, "detail fetch failed, recording failure");
                    self.total_failed += 1;
                    CaseRecord::failure(case_id, item.url.clone(), item.title.clone(), e.to_string())
                }
            },
        };

        writer.append(record);
        self.attempted.insert(case_id);
        self.processed_count += 1;

        if let Err(e) = writer.flush_if_full().await {
            // A failed flush leaves the buffer dirty; reconciliation will
            // still account for these ids at the end of the run.
            warn!(job_id = %self.job_id, error = %e, "batch flush failed");
        }

        if self.processed_count % self.spec.poll_interval.max(1) as u64 == 0 {
            if let Poll::Stop = self.poll(writer, checkpoint).await {
                return Poll::Stop;
            }
        }

        if index + 1 < page_total {
            tokio::time::sleep(self.spec.item_delay.sample()).await;
        }
        Poll::Continue
    }

    fn is_saved(&self, writer: &BatchWriter, case_id: u64) -> bool {
        self.previously_saved.contains(&case_id) || writer.saved_ids().contains(&case_id)
    }

    /// Poll point: persist the checkpoint, publish progress, then act on the
    /// control signal. Pausing parks the worker on the watch channel without
    /// discarding the in-memory buffer; a stop observed while parked unwinds
    /// immediately.
    async fn poll(&mut self, writer: &BatchWriter, checkpoint: &CheckpointStore) -> Poll {
        if self.spec.enable_resume {
            checkpoint.save(&self.attempted).await;
        }
        self.publish_progress(writer, true).await;

        let signal = *self.control_rx.borrow_and_update();
        match signal {
            ControlSignal::Run => Poll::Continue,
            ControlSignal::Stop => {
                info!(job_id = %self.job_id, "stop signal observed");
                Poll::Stop
            }
            ControlSignal::Pause => self.pause_wait(writer, checkpoint).await,
        }
    }

    async fn pause_wait(&mut self, writer: &BatchWriter, checkpoint: &CheckpointStore) -> Poll {
        info!(job_id = %self.job_id, "pause signal observed, waiting");
        self.paused = true;
        self.set_status(JobStatus::Paused).await;
        if self.spec.enable_resume {
            checkpoint.save(&self.attempted).await;
        }
        self.publish_progress(writer, true).await;

        loop {
            if self.control_rx.changed().await.is_err() {
                // Control plane dropped; treat as stop so the finalize path
                // still runs.
                warn!(job_id = %self.job_id, "control channel closed while paused");
                return Poll::Stop;
            }
            let signal = *self.control_rx.borrow_and_update();
            match signal {
                ControlSignal::Stop => {
                    info!(job_id = %self.job_id, "stop observed while paused");
                    return Poll::Stop;
                }
                ControlSignal::Run => {
                    info!(job_id = %self.job_id, "resume signal observed");
                    self.paused = false;
                    self.set_status(JobStatus::Running).await;
                    self.publish_progress(writer, true).await;
                    return Poll::Continue;
                }
                ControlSignal::Pause => continue,
            }
        }
    }

    async fn finalize(
        mut self,
        mut writer: BatchWriter,
        checkpoint: CheckpointStore,
        end: LoopEnd,
    ) {
        if let Err(e) = writer.flush_remainder().await {
            warn!(job_id = %self.job_id, error = %e, "failed to flush final batch");
        }

        // Reconciliation: disk is the source of truth for what survived.
        let saved_on_disk = scan_saved_ids(&self.output_dir).await;
        let report = reconcile(&self.attempted, &saved_on_disk);
        if !report.all_saved {
            warn!(
                job_id = %self.job_id,
                missing = report.missing_count,
                "found attempted cases with no durable record, appending synthetic failures"
            );
            for missing_id in &report.missing_ids {
                writer.append(CaseRecord::reconciliation_gap(*missing_id));
            }
            if let Err(e) = writer.flush_remainder().await {
                error!(job_id = %self.job_id, error = %e, "failed to flush reconciliation batch");
            }
            self.total_failed += report.missing_count as u64;
        } else if report.attempted_count > 0 {
            info!(
                job_id = %self.job_id,
                attempted = report.attempted_count,
                "reconciliation clean: every attempted case is durably saved"
            );
        }

        if self.spec.enable_resume {
            checkpoint.save(&self.attempted).await;
        }

        // The attempted counter can lag when every item failed before a
        // successful merge; recount from the other outcomes.
        if self.total_crawled == 0 {
            let processed = writer.total_saved() + self.total_failed;
            if processed > 0 {
                warn!(job_id = %self.job_id, recount = processed, "total_crawled was zero, recounting");
                self.total_crawled = processed;
            }
        }

        let total_processed = self.total_crawled + writer.total_saved() + self.total_failed;
        let (status, error) = match end {
            LoopEnd::Stopped => (JobStatus::Terminated, None),
            LoopEnd::FirstPageFailed(e) => (
                JobStatus::Failed,
                Some((format!("first page fetch failed: {e}"), format!("{e:?}"))),
            ),
            LoopEnd::Exhausted | LoopEnd::PartialPageFailure(_) if total_processed == 0 => (
                JobStatus::Failed,
                Some((
                    "crawl finished without any data; the source may be returning empty pages"
                        .to_string(),
                    String::new(),
                )),
            ),
            LoopEnd::Exhausted => (JobStatus::Completed, None),
            LoopEnd::PartialPageFailure(e) => {
                warn!(job_id = %self.job_id, error = %e, "completing with partial results");
                (JobStatus::Completed, None)
            }
        };

        self.paused = false;
        self.publish_progress(&writer, false).await;

        {
            let mut jobs = self.jobs.write().await;
            if let Some(job) = jobs.get_mut(&self.job_id) {
                job.progress = self.snapshot(&writer, false);
                if let Some((message, stack)) = error {
                    job.error_message = Some(message);
                    job.error_stack = (!stack.is_empty()).then_some(stack);
                }
                if let Err(e) = job.transition_to(status) {
                    error!(job_id = %self.job_id, error = %e, "failed to write terminal status");
                } else {
                    job.finalize_stats();
                }
            }
        }

        info!(
            job_id = %self.job_id,
            status = %status,
            crawled = self.total_crawled,
            saved = writer.total_saved(),
            failed = self.total_failed,
            batches = writer.batches_saved(),
            "worker finished"
        );
    }

    async fn fail(&mut self, message: String, stack: String) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(&self.job_id) {
            job.error_message = Some(message);
            job.error_stack = Some(stack);
            if let Err(e) = job.transition_to(JobStatus::Failed) {
                error!(job_id = %self.job_id, error = %e, "failed to write failed status");
            }
        }
    }

    fn snapshot(&self, writer: &BatchWriter, running: bool) -> ProgressSnapshot {
        ProgressSnapshot {
            completed_pages: self.completed_pages,
            current_page: self.current_page,
            total_pages: self.spec.max_pages(),
            total_crawled: self.total_crawled,
            total_saved: writer.total_saved(),
            total_failed: self.total_failed,
            batches_saved: writer.batches_saved(),
            running,
            paused: self.paused,
        }
    }

    async fn publish_progress(&self, writer: &BatchWriter, running: bool) {
        let snapshot = self.snapshot(writer, running);
        // Receivers may all be gone (controller dropped); that is fine.
        let _ = self.progress_tx.send(snapshot.clone());

        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(&self.job_id) {
            job.progress = snapshot;
        }
    }

    async fn set_status(&self, status: JobStatus) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(&self.job_id) {
            if let Err(e) = job.transition_to(status) {
                warn!(job_id = %self.job_id, error = %e, "ignored invalid status transition");
            }
        }
    }
}
