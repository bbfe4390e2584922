//! The job queue engine.
//!
//! A single polling loop pulls the next eligible job from the store, claims
//! it by marking it `Processing`, and dispatches it to the registered
//! processor without blocking the loop. Completion, retry, and failure
//! bookkeeping happen on the dispatched task; the loop only ever selects and
//! claims.
//!
//! The claim is a read-then-write with no conditional update, serialized
//! through the single loop: the loop awaits the `Processing` write before
//! selecting another candidate. That is sufficient for the single-instance
//! design this engine targets; running several engines against one store
//! would need an atomic claim in the store itself.
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::Utc;
use tokio::{sync::Notify, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    backoff::BackoffTable,
    job::{builder::NewJob, JobId, JobRecord, JobStatus},
    processor::ProcessorRegistry,
    pruner::{PrunerConfig, PrunerRunner},
    store::{EnqueuableJob, JobQuery, JobStore, JobUpdate, StoreError},
    TaskmillError,
};

mod runner;

use runner::JobRunner;

/// Tunables for the queue engine. All fields have working defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Maximum number of jobs dispatched at once, across all job types.
    pub max_concurrency: usize,
    /// How long to wait before re-polling while at the concurrency cap.
    pub poll_interval: Duration,
    /// How long to wait before re-polling when no job is eligible.
    pub idle_interval: Duration,
    /// How long to back off after a store failure in the loop.
    pub error_backoff: Duration,
    /// Processor timeout unless the processor overrides it.
    pub default_timeout: Duration,
    /// Attempt ceiling for jobs that do not set their own.
    pub default_max_attempts: u32,
    pub backoff: BackoffTable,
    pub pruner: PrunerConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            poll_interval: Duration::from_secs(1),
            idle_interval: Duration::from_secs(5),
            error_backoff: Duration::from_secs(5),
            default_timeout: Duration::from_secs(30),
            default_max_attempts: 3,
            backoff: BackoffTable::default(),
            pruner: PrunerConfig::default(),
        }
    }
}

/// Per-status job counts. Computed with one counting query per status, so
/// expect O(status count) store round-trips rather than O(1).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub retrying: usize,
    pub total: usize,
}

pub(crate) struct QueueInner<S> {
    pub(crate) store: S,
    pub(crate) processors: ProcessorRegistry,
    pub(crate) config: QueueConfig,
    pub(crate) active: AtomicUsize,
    pub(crate) wake: Notify,
    started: AtomicBool,
}

/// The job queue engine and its caller-facing API.
///
/// Cheap to clone; clones share the same store, processor table, and
/// counters.
pub struct JobQueue<S: JobStore> {
    inner: Arc<QueueInner<S>>,
}

impl<S: JobStore> Clone for JobQueue<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: JobStore> fmt::Debug for JobQueue<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobQueue")
            .field("processors", &self.inner.processors)
            .field("config", &self.inner.config)
            .field("active", &self.inner.active.load(Ordering::SeqCst))
            .finish()
    }
}

enum PollOutcome {
    Dispatched,
    AtCapacity,
    Idle,
}

impl<S> JobQueue<S>
where
    S: JobStore,
{
    pub fn new(store: S, processors: ProcessorRegistry) -> Self {
        Self::with_config(store, processors, QueueConfig::default())
    }

    pub fn with_config(store: S, processors: ProcessorRegistry, config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                store,
                processors,
                config,
                active: AtomicUsize::new(0),
                wake: Notify::new(),
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Persists a new `Pending` job and wakes the processing loop if it is
    /// idle. Returns the store-assigned id.
    ///
    /// The caller only learns the id: the job's eventual outcome is
    /// discovered by polling [`JobQueue::job`]. The payload is not validated
    /// here; that is the processor's responsibility.
    pub async fn enqueue(&self, job: NewJob) -> Result<JobId, TaskmillError> {
        let job = EnqueuableJob {
            job_type: job.job_type,
            priority: job.priority,
            data: job.data,
            max_attempts: job
                .max_attempts
                .unwrap_or(self.inner.config.default_max_attempts),
            scheduled_for: job.scheduled_for.unwrap_or_else(Utc::now),
            user_id: job.user_id,
            metadata: job.metadata,
        };
        let job_type = job.job_type.clone();
        let id = self.inner.store.insert(job).await?;
        tracing::debug!(%id, %job_type, "Enqueued {job_type} job {id}");
        self.inner.wake.notify_one();
        Ok(id)
    }

    /// The current state of a job, or `None` if it does not exist (any
    /// more).
    pub async fn job(&self, id: &JobId) -> Result<Option<JobRecord>, TaskmillError> {
        Ok(self.inner.store.get(id).await?)
    }

    /// Job counts per status plus a total.
    pub async fn stats(&self) -> Result<QueueStats, TaskmillError> {
        let mut stats = QueueStats::default();
        for status in JobStatus::ALL {
            let count = self
                .inner
                .store
                .count(JobQuery::with_status(status))
                .await?;
            match status {
                JobStatus::Pending => stats.pending = count,
                JobStatus::Processing => stats.processing = count,
                JobStatus::Completed => stats.completed = count,
                JobStatus::Failed => stats.failed = count,
                JobStatus::Retrying => stats.retrying = count,
            }
            stats.total += count;
        }
        Ok(stats)
    }

    /// Starts the processing loop and the cleanup sweep.
    ///
    /// May be called at most once per queue: a second loop polling the same
    /// store would reintroduce the duplicate-claim race the single loop
    /// exists to prevent.
    pub fn spawn(&self) -> Result<QueueHandle, TaskmillError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(TaskmillError::AlreadyStarted);
        }
        let cancellation_token = CancellationToken::new();
        let loop_handle = tokio::spawn(Self::run_loop(
            Arc::clone(&self.inner),
            cancellation_token.clone(),
        ));
        let pruner_handle = PrunerRunner::new(
            self.inner.store.clone(),
            self.inner.config.pruner.clone(),
        )
        .spawn(cancellation_token.clone());
        Ok(QueueHandle {
            cancellation_token,
            handles: vec![loop_handle, pruner_handle],
        })
    }

    async fn run_loop(inner: Arc<QueueInner<S>>, cancellation_token: CancellationToken) {
        tracing::debug!("Job queue processing loop started");
        loop {
            if cancellation_token.is_cancelled() {
                break;
            }
            let wait = match Self::poll_once(&inner).await {
                Ok(PollOutcome::Dispatched) => continue,
                Ok(PollOutcome::AtCapacity) => inner.config.poll_interval,
                Ok(PollOutcome::Idle) => inner.config.idle_interval,
                Err(err) => {
                    tracing::error!(?err, "Store error in processing loop, backing off: {err}");
                    inner.config.error_backoff
                }
            };
            tokio::select! {
                _ = cancellation_token.cancelled() => break,
                _ = inner.wake.notified() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
        tracing::debug!("Shutting down job queue processing loop");
    }

    async fn poll_once(inner: &Arc<QueueInner<S>>) -> Result<PollOutcome, StoreError> {
        if inner.active.load(Ordering::SeqCst) >= inner.config.max_concurrency {
            return Ok(PollOutcome::AtCapacity);
        }
        let now = Utc::now();
        let candidate = inner
            .store
            .query(JobQuery::runnable_at(now))
            .await?
            .into_iter()
            .next();
        let Some(job) = candidate else {
            return Ok(PollOutcome::Idle);
        };
        inner
            .store
            .update(
                &job.id,
                JobUpdate {
                    status: Some(JobStatus::Processing),
                    started_at: Some(now),
                    ..Default::default()
                },
            )
            .await?;
        let job = JobRecord {
            status: JobStatus::Processing,
            started_at: Some(now),
            ..job
        };
        inner.active.fetch_add(1, Ordering::SeqCst);
        let job_runner = JobRunner::new(Arc::clone(inner));
        tokio::spawn(async move { job_runner.run(job).await });
        Ok(PollOutcome::Dispatched)
    }
}

/// Handle to a spawned queue engine.
#[derive(Debug)]
pub struct QueueHandle {
    cancellation_token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl QueueHandle {
    /// Stops the processing loop and the cleanup sweep, waiting for both
    /// tasks to wind down. Jobs already dispatched keep running on their
    /// own; their results are still written back when they settle.
    pub async fn graceful_shutdown(self) -> Result<(), TaskmillError> {
        self.cancellation_token.cancel();
        futures::future::join_all(self.handles)
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| TaskmillError::GracefulShutdownFailed)?;
        Ok(())
    }
}
