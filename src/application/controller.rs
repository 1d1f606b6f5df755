//! Crawl control plane
//!
//! Owns the job table and the worker registry. Commands never block on crawl
//! work: they only flip the watch-channel control signal the worker polls at
//! its own boundaries, so observed pause/stop latency is bounded by the item
//! or page in flight.
//!
//! The single-worker rule lives here: registering a worker for a job is an
//! atomic check-and-insert under the registry write lock, so two concurrent
//! starts can never both spawn.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::application::session::{ControlSignal, CrawlSession, JobTable};
use crate::domain::errors::CrawlError;
use crate::domain::job::{CrawlJob, JobSpec, JobStatus, ProgressSnapshot};
use crate::domain::services::{CaseDetailProvider, CaseListProvider, NullAuditSink, PageAuditSink};
use crate::infrastructure::config::CrawlerConfig;

struct WorkerHandle {
    control_tx: watch::Sender<ControlSignal>,
    progress_rx: watch::Receiver<ProgressSnapshot>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    fn is_live(&self) -> bool {
        !self.join.is_finished()
    }
}

/// Front door for creating, starting and steering crawl jobs.
///
/// Cheap to share: all state is behind `Arc`s, so clones refer to the same
/// job table and worker registry.
#[derive(Clone)]
pub struct CrawlController {
    config: CrawlerConfig,
    list_provider: Arc<dyn CaseListProvider>,
    detail_provider: Arc<dyn CaseDetailProvider>,
    audit_sink: Arc<dyn PageAuditSink>,
    jobs: JobTable,
    workers: Arc<RwLock<HashMap<String, WorkerHandle>>>,
}

impl CrawlController {
    pub fn new(
        config: CrawlerConfig,
        list_provider: Arc<dyn CaseListProvider>,
        detail_provider: Arc<dyn CaseDetailProvider>,
    ) -> Self {
        Self {
            config,
            list_provider,
            detail_provider,
            audit_sink: Arc::new(NullAuditSink),
            jobs: Arc::new(RwLock::new(HashMap::new())),
            workers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Replace the no-op audit sink.
    pub fn with_audit_sink(mut self, sink: Arc<dyn PageAuditSink>) -> Self {
        self.audit_sink = sink;
        self
    }

    /// Register a new job in `pending` state and return it.
    pub async fn create_job(&self, spec: JobSpec) -> CrawlJob {
        let job_id = Uuid::new_v4().to_string();
        let job = CrawlJob::new(job_id.clone(), spec);
        info!(job_id = %job.job_id, name = %job.spec.name, "job created");
        self.jobs.write().await.insert(job_id, job.clone());
        job
    }

    /// Launch the worker for a pending job from its configured start page.
    pub async fn start(&self, job_id: &str) -> Result<(), CrawlError> {
        let start_page = {
            let jobs = self.jobs.read().await;
            jobs.get(job_id)
                .ok_or_else(|| CrawlError::UnknownJob(job_id.to_string()))?
                .spec
                .start_page
        };
        self.start_from(job_id, start_page).await
    }

    /// Launch the worker for a pending job from an explicit page, overriding
    /// the spec's start page.
    pub async fn start_from(&self, job_id: &str, from_page: u32) -> Result<(), CrawlError> {
        let status = {
            let jobs = self.jobs.read().await;
            jobs.get(job_id)
                .ok_or_else(|| CrawlError::UnknownJob(job_id.to_string()))?
                .status
        };
        if status != JobStatus::Pending {
            return Err(CrawlError::InvalidTransition {
                job_id: job_id.to_string(),
                from: status.to_string(),
                to: JobStatus::Running.to_string(),
            });
        }
        self.spawn_worker(job_id, from_page).await
    }

    /// Ask the running worker to pause at its next poll point.
    pub async fn pause(&self, job_id: &str) -> Result<(), CrawlError> {
        self.ensure_known(job_id).await?;
        let workers = self.workers.read().await;
        match workers.get(job_id) {
            Some(handle) if handle.is_live() => {
                // Stop is latched until the worker observes it; a later
                // pause must not overwrite it.
                if *handle.control_tx.borrow() == ControlSignal::Stop {
                    info!(job_id, "stop already requested, ignoring pause");
                    return Ok(());
                }
                info!(job_id, "pause requested");
                let _ = handle.control_tx.send(ControlSignal::Pause);
                Ok(())
            }
            _ => Err(CrawlError::NotRunning(job_id.to_string())),
        }
    }

    /// Resume a paused job. If the worker is still parked this just clears
    /// the signal; if the worker is gone (process restart, crash) a fresh
    /// worker is spawned from the job's recorded resume position.
    pub async fn resume(&self, job_id: &str) -> Result<(), CrawlError> {
        self.ensure_known(job_id).await?;
        {
            let workers = self.workers.read().await;
            if let Some(handle) = workers.get(job_id) {
                if handle.is_live() {
                    if *handle.control_tx.borrow() != ControlSignal::Pause {
                        return Err(CrawlError::NotPaused(job_id.to_string()));
                    }
                    info!(job_id, "resume requested");
                    let _ = handle.control_tx.send(ControlSignal::Run);
                    return Ok(());
                }
            }
        }

        let (status, resume_page) = {
            let jobs = self.jobs.read().await;
            let job = jobs
                .get(job_id)
                .ok_or_else(|| CrawlError::UnknownJob(job_id.to_string()))?;
            (job.status, job.progress.current_page)
        };
        if status != JobStatus::Paused {
            return Err(CrawlError::NotPaused(job_id.to_string()));
        }
        info!(job_id, resume_page, "restarting worker for paused job");
        self.spawn_worker(job_id, resume_page).await
    }

    /// Ask the worker to stop at its next poll point. The worker still runs
    /// its finalize path (flush, reconcile, checkpoint) before exiting, and
    /// a stop always wins over a pending or active pause.
    pub async fn stop(&self, job_id: &str) -> Result<(), CrawlError> {
        self.ensure_known(job_id).await?;
        let workers = self.workers.read().await;
        match workers.get(job_id) {
            Some(handle) if handle.is_live() => {
                info!(job_id, "stop requested");
                let _ = handle.control_tx.send(ControlSignal::Stop);
                Ok(())
            }
            _ => Err(CrawlError::NotRunning(job_id.to_string())),
        }
    }

    /// Cancel a job that has never started executing.
    pub async fn cancel(&self, job_id: &str) -> Result<(), CrawlError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| CrawlError::UnknownJob(job_id.to_string()))?;
        job.transition_to(JobStatus::Cancelled)?;
        info!(job_id, "job cancelled before execution");
        Ok(())
    }

    /// Latest progress snapshot: live from the worker channel when one
    /// exists, otherwise the last snapshot recorded on the job.
    pub async fn progress(&self, job_id: &str) -> Result<ProgressSnapshot, CrawlError> {
        {
            let workers = self.workers.read().await;
            if let Some(handle) = workers.get(job_id) {
                if handle.is_live() {
                    return Ok(handle.progress_rx.borrow().clone());
                }
            }
        }
        let jobs = self.jobs.read().await;
        jobs.get(job_id)
            .map(|job| job.progress.clone())
            .ok_or_else(|| CrawlError::UnknownJob(job_id.to_string()))
    }

    /// Snapshot of one job's full state.
    pub async fn job(&self, job_id: &str) -> Result<CrawlJob, CrawlError> {
        let jobs = self.jobs.read().await;
        jobs.get(job_id)
            .cloned()
            .ok_or_else(|| CrawlError::UnknownJob(job_id.to_string()))
    }

    /// All known jobs, in no particular order.
    pub async fn list_jobs(&self) -> Vec<CrawlJob> {
        self.jobs.read().await.values().cloned().collect()
    }

    /// Wait for the job's worker to finish, if one was ever spawned.
    /// Consumes the registry entry.
    pub async fn wait(&self, job_id: &str) -> Result<(), CrawlError> {
        self.ensure_known(job_id).await?;
        let handle = self.workers.write().await.remove(job_id);
        if let Some(handle) = handle {
            if let Err(e) = handle.join.await {
                warn!(job_id, error = %e, "worker task did not shut down cleanly");
            }
        }
        Ok(())
    }

    async fn ensure_known(&self, job_id: &str) -> Result<(), CrawlError> {
        if self.jobs.read().await.contains_key(job_id) {
            Ok(())
        } else {
            Err(CrawlError::UnknownJob(job_id.to_string()))
        }
    }

    async fn spawn_worker(&self, job_id: &str, start_page: u32) -> Result<(), CrawlError> {
        let spec = {
            let jobs = self.jobs.read().await;
            jobs.get(job_id)
                .ok_or_else(|| CrawlError::UnknownJob(job_id.to_string()))?
                .spec
                .clone()
        };

        let mut workers = self.workers.write().await;
        if let Some(existing) = workers.get(job_id) {
            if existing.is_live() {
                return Err(CrawlError::AlreadyRunning(job_id.to_string()));
            }
        }

        let (control_tx, control_rx) = watch::channel(ControlSignal::Run);
        let (progress_tx, progress_rx) = watch::channel(ProgressSnapshot::default());
        let session = CrawlSession::new(
            job_id,
            spec,
            start_page,
            self.config.job_output_dir(job_id),
            self.list_provider.clone(),
            self.detail_provider.clone(),
            self.audit_sink.clone(),
            self.jobs.clone(),
            control_rx,
            progress_tx,
        );
        let join = tokio::spawn(session.run());
        workers.insert(
            job_id.to_string(),
            WorkerHandle {
                control_tx,
                progress_rx,
                join,
            },
        );
        Ok(())
    }
}
