//! The cleanup sweep for old terminal jobs.
//!
//! Completed and failed jobs accumulate in the store until a sweep deletes
//! those whose `completed_at` has aged past the retention window. Jobs in a
//! non-terminal status are never touched regardless of age.
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    job::{JobId, JobStatus},
    store::{JobQuery, JobStore},
};

/// When and how far back the sweep reaches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrunerConfig {
    /// How often the sweep runs.
    pub interval: Duration,
    /// Terminal jobs older than this are deleted.
    pub retention: TimeDelta,
}

impl Default for PrunerConfig {
    /// Hourly sweep with a 30 day retention window.
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60 * 60),
            retention: TimeDelta::days(30),
        }
    }
}

pub(crate) struct PrunerRunner<S: JobStore> {
    store: S,
    config: PrunerConfig,
}

impl<S> PrunerRunner<S>
where
    S: JobStore,
{
    pub(crate) fn new(store: S, config: PrunerConfig) -> Self {
        Self { store, config }
    }

    pub(crate) fn spawn(self, cancellation_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.interval) => {
                        self.sweep().await;
                    }
                    _ = cancellation_token.cancelled() => {
                        tracing::debug!("Shutting down the job pruner");
                        break;
                    }
                }
            }
        })
    }

    async fn sweep(&self) {
        let cutoff = Utc::now() - self.config.retention;
        let query = JobQuery {
            statuses: JobStatus::TERMINAL.to_vec(),
            completed_before: Some(cutoff),
            ..Default::default()
        };
        let expired = match self.store.query(query).await {
            Ok(jobs) => jobs,
            Err(err) => {
                tracing::error!(?err, "Failed to query expired jobs, error: {err}");
                return;
            }
        };
        if expired.is_empty() {
            return;
        }
        let ids: Vec<JobId> = expired.into_iter().map(|job| job.id).collect();
        tracing::debug!(count = ids.len(), "Pruning terminal jobs past retention");
        let _ = self
            .store
            .delete_many(ids)
            .await
            .inspect_err(|err| tracing::error!(?err, "Failed to prune jobs, error: {err}"));
    }
}

#[cfg(test)]
mod test {
    use chrono::{DateTime, Utc};
    use serde_json::json;

    use crate::store::{memory::InMemoryStore, EnqueuableJob, JobUpdate};

    use super::*;

    async fn terminal_job(
        store: &InMemoryStore,
        status: JobStatus,
        completed_at: DateTime<Utc>,
    ) -> JobId {
        let id = store
            .insert(EnqueuableJob {
                job_type: "data_update".to_owned(),
                priority: Default::default(),
                data: json!({}),
                max_attempts: 3,
                scheduled_for: Utc::now(),
                user_id: None,
                metadata: Default::default(),
            })
            .await
            .unwrap();
        store
            .update(
                &id,
                JobUpdate {
                    status: Some(status),
                    completed_at: Some(completed_at),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn sweep_deletes_only_expired_terminal_jobs() {
        let store = InMemoryStore::new();
        let old_completed =
            terminal_job(&store, JobStatus::Completed, Utc::now() - TimeDelta::days(40)).await;
        let old_failed =
            terminal_job(&store, JobStatus::Failed, Utc::now() - TimeDelta::days(31)).await;
        let young_completed =
            terminal_job(&store, JobStatus::Completed, Utc::now() - TimeDelta::days(10)).await;
        // Old but never finished: must survive any sweep.
        let still_pending = store
            .insert(EnqueuableJob {
                job_type: "data_update".to_owned(),
                priority: Default::default(),
                data: json!({}),
                max_attempts: 3,
                scheduled_for: Utc::now() - TimeDelta::days(90),
                user_id: None,
                metadata: Default::default(),
            })
            .await
            .unwrap();

        let runner = PrunerRunner::new(store.clone(), PrunerConfig::default());
        runner.sweep().await;

        assert!(store.get(&old_completed).await.unwrap().is_none());
        assert!(store.get(&old_failed).await.unwrap().is_none());
        assert!(store.get(&young_completed).await.unwrap().is_some());
        assert!(store.get(&still_pending).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn sweep_with_nothing_expired_is_a_noop() {
        let store = InMemoryStore::new();
        let young =
            terminal_job(&store, JobStatus::Completed, Utc::now() - TimeDelta::days(1)).await;

        let runner = PrunerRunner::new(store.clone(), PrunerConfig::default());
        runner.sweep().await;

        assert!(store.get(&young).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn runner_sweeps_on_its_interval() {
        let store = InMemoryStore::new();
        let old =
            terminal_job(&store, JobStatus::Completed, Utc::now() - TimeDelta::days(40)).await;

        let token = CancellationToken::new();
        let config = PrunerConfig {
            interval: Duration::from_millis(50),
            ..Default::default()
        };
        let handle = PrunerRunner::new(store.clone(), config).spawn(token.clone());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(store.get(&old).await.unwrap().is_none());

        token.cancel();
        handle.await.unwrap();
    }
}
