//! Execution of a single claimed job.
//!
//! The runner owns everything that happens after the loop dispatches a job:
//! routing to the processor, the timeout race, panic containment, and the
//! completion/retry/failure writes back to the store.
use std::sync::{atomic::Ordering, Arc};

use chrono::{TimeDelta, Utc};
use serde_json::Value;
use tokio::task::JoinError;
use tracing::{instrument, Instrument};

use crate::{
    job::{JobId, JobRecord, JobStatus},
    store::{JobStore, JobUpdate},
};

use super::QueueInner;

const TIMEOUT_ERROR: &str = "Job timeout";

pub(super) struct JobRunner<S: JobStore> {
    inner: Arc<QueueInner<S>>,
}

impl<S> JobRunner<S>
where
    S: JobStore,
{
    pub(super) fn new(inner: Arc<QueueInner<S>>) -> Self {
        Self { inner }
    }

    /// Runs the job to an outcome, then releases its concurrency slot and
    /// nudges the loop in case it was waiting on capacity.
    pub(super) async fn run(self, job: JobRecord) {
        self.execute(job).await;
        self.inner.active.fetch_sub(1, Ordering::SeqCst);
        self.inner.wake.notify_one();
    }

    #[instrument(skip_all, fields(job_id = %job.id, job_type = %job.job_type))]
    async fn execute(&self, job: JobRecord) {
        let Some(processor) = self.inner.processors.get(&job.job_type) else {
            tracing::error!(
                "No processor registered for job type {}, failing job {}",
                job.job_type,
                job.id
            );
            self.discard(
                &job.id,
                format!("no processor found for job type '{}'", job.job_type),
            )
            .await;
            return;
        };

        let timeout = processor
            .timeout()
            .unwrap_or(self.inner.config.default_timeout);
        let attempt = job.attempts + 1;
        let is_final_attempt = attempt >= job.max_attempts;
        let delay = self.inner.config.backoff.delay(attempt);
        let job_id = job.id.clone();

        tracing::debug!(%job_id, attempt, "Executing job {job_id}");
        // The processor runs on its own task so that a panic surfaces as a
        // JoinError instead of tearing down the runner.
        let execution = tokio::spawn(
            tokio::time::timeout(timeout, async move { processor.run(job).await })
                .in_current_span(),
        );
        match execution.await {
            Ok(Ok(Ok(result))) => self.complete(&job_id, result).await,
            Ok(Ok(Err(error))) => {
                self.fail(&job_id, attempt, is_final_attempt, delay, error.to_string())
                    .await
            }
            Ok(Err(_elapsed)) => {
                self.fail(
                    &job_id,
                    attempt,
                    is_final_attempt,
                    delay,
                    TIMEOUT_ERROR.to_owned(),
                )
                .await
            }
            Err(join_error) => {
                self.fail(
                    &job_id,
                    attempt,
                    is_final_attempt,
                    delay,
                    panic_message(join_error),
                )
                .await
            }
        }
    }

    async fn complete(&self, job_id: &JobId, result: Value) {
        tracing::debug!(%job_id, "Job {job_id} complete");
        let update = JobUpdate {
            status: Some(JobStatus::Completed),
            result: Some(result),
            completed_at: Some(Utc::now()),
            ..Default::default()
        };
        let _ = self
            .inner
            .store
            .update(job_id, update)
            .await
            .inspect_err(|err| {
                tracing::error!(?err, %job_id, "Failed to mark job {job_id} complete, error: {err}")
            });
    }

    async fn fail(
        &self,
        job_id: &JobId,
        attempt: u32,
        is_final_attempt: bool,
        delay: TimeDelta,
        message: String,
    ) {
        let update = if is_final_attempt {
            tracing::error!(
                %job_id,
                attempt,
                "Job {job_id} failed permanently on attempt {attempt}: {message}"
            );
            JobUpdate {
                status: Some(JobStatus::Failed),
                attempts: Some(attempt),
                error: Some(message),
                completed_at: Some(Utc::now()),
                ..Default::default()
            }
        } else {
            tracing::warn!(
                %job_id,
                attempt,
                "Job {job_id} failed on attempt {attempt}, retrying in {delay}: {message}"
            );
            JobUpdate {
                status: Some(JobStatus::Retrying),
                attempts: Some(attempt),
                error: Some(message),
                scheduled_for: Some(Utc::now() + delay),
                ..Default::default()
            }
        };
        let _ = self
            .inner
            .store
            .update(job_id, update)
            .await
            .inspect_err(|err| {
                tracing::error!(?err, %job_id, "Failed to record job {job_id} failure, error: {err}")
            });
    }

    /// Fails a job permanently without consuming an attempt. Used when the
    /// job can never run, not when it ran and failed.
    async fn discard(&self, job_id: &JobId, message: String) {
        let update = JobUpdate {
            status: Some(JobStatus::Failed),
            error: Some(message),
            completed_at: Some(Utc::now()),
            ..Default::default()
        };
        let _ = self
            .inner
            .store
            .update(job_id, update)
            .await
            .inspect_err(|err| {
                tracing::error!(?err, %job_id, "Failed to discard job {job_id}, error: {err}")
            });
    }
}

fn panic_message(join_error: JoinError) -> String {
    if !join_error.is_panic() {
        return join_error.to_string();
    }
    let panic = join_error.into_panic();
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "job panicked".to_owned()
    }
}
