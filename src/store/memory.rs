//! An in-memory implementation of [`JobStore`].
//!
//! Provided for testing purposes; it is a correct rather than an optimized
//! implementation and is not designed for use in a production system.
use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc, RwLock,
};

use async_trait::async_trait;
use chrono::Utc;

use crate::job::{JobId, JobRecord, JobStatus};

use super::{EnqueuableJob, JobQuery, JobStore, JobUpdate, QueryOrder, StoreError};

/// An in-memory [`JobStore`] backed by a vector behind a lock.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    jobs: Arc<RwLock<Vec<JobRecord>>>,
    id_counter: Arc<AtomicI64>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EnqueuableJob {
    fn into_record(self, id: JobId) -> JobRecord {
        let now = Utc::now();
        JobRecord {
            id,
            job_type: self.job_type,
            status: JobStatus::Pending,
            priority: self.priority,
            data: self.data,
            attempts: 0,
            max_attempts: self.max_attempts,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            error: None,
            result: None,
            scheduled_for: self.scheduled_for,
            user_id: self.user_id,
            metadata: self.metadata,
        }
    }
}

impl JobQuery {
    fn matches(&self, job: &JobRecord) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&job.status))
            && self
                .scheduled_before
                .map_or(true, |at| job.scheduled_for <= at)
            && self
                .completed_before
                .map_or(true, |at| job.completed_at.is_some_and(|done| done < at))
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn insert(&self, job: EnqueuableJob) -> Result<JobId, StoreError> {
        let id = JobId::from(format!("job-{}", self.id_counter.fetch_add(1, Ordering::SeqCst)));
        self.jobs
            .write()
            .map_err(|_| StoreError::BadState)?
            .push(job.into_record(id.clone()));
        Ok(id)
    }

    async fn get(&self, id: &JobId) -> Result<Option<JobRecord>, StoreError> {
        Ok(self
            .jobs
            .read()
            .map_err(|_| StoreError::BadState)?
            .iter()
            .find(|job| &job.id == id)
            .cloned())
    }

    async fn update(&self, id: &JobId, update: JobUpdate) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().map_err(|_| StoreError::BadState)?;
        let job = jobs
            .iter_mut()
            .find(|job| &job.id == id)
            .ok_or_else(|| StoreError::JobNotFound(id.clone()))?;

        if let Some(status) = update.status {
            job.status = status;
        }
        if let Some(attempts) = update.attempts {
            job.attempts = attempts;
        }
        if let Some(started_at) = update.started_at {
            job.started_at = Some(started_at);
        }
        if let Some(completed_at) = update.completed_at {
            job.completed_at = Some(completed_at);
        }
        if let Some(scheduled_for) = update.scheduled_for {
            job.scheduled_for = scheduled_for;
        }
        if let Some(error) = update.error {
            job.error = Some(error);
        }
        if let Some(result) = update.result {
            job.result = Some(result);
        }
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn query(&self, query: JobQuery) -> Result<Vec<JobRecord>, StoreError> {
        let mut jobs: Vec<JobRecord> = self
            .jobs
            .read()
            .map_err(|_| StoreError::BadState)?
            .iter()
            .filter(|job| query.matches(job))
            .cloned()
            .collect();

        if query.order == QueryOrder::PriorityThenCreated {
            jobs.sort_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.created_at.cmp(&b.created_at))
            });
        }
        if let Some(limit) = query.limit {
            jobs.truncate(limit);
        }
        Ok(jobs)
    }

    async fn count(&self, query: JobQuery) -> Result<usize, StoreError> {
        Ok(self
            .jobs
            .read()
            .map_err(|_| StoreError::BadState)?
            .iter()
            .filter(|job| query.matches(job))
            .count())
    }

    async fn delete_many(&self, ids: Vec<JobId>) -> Result<(), StoreError> {
        self.jobs
            .write()
            .map_err(|_| StoreError::BadState)?
            .retain(|job| !ids.contains(&job.id));
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test {
    use std::sync::atomic::AtomicU32;

    use assert_matches::assert_matches;
    use chrono::TimeDelta;
    use serde_json::json;

    use crate::job::{JobMetadata, JobPriority};

    use super::*;

    /// Wraps an [`InMemoryStore`] and fails a primed number of inserts or
    /// queries with [`StoreError::Unavailable`], standing in for a store
    /// outage. Unprimed operations pass straight through.
    #[derive(Clone)]
    pub(crate) struct FlakyStore {
        inner: InMemoryStore,
        failing_inserts: Arc<AtomicU32>,
        failing_queries: Arc<AtomicU32>,
    }

    impl FlakyStore {
        pub(crate) fn new(inner: InMemoryStore) -> Self {
            Self {
                inner,
                failing_inserts: Arc::new(AtomicU32::new(0)),
                failing_queries: Arc::new(AtomicU32::new(0)),
            }
        }

        pub(crate) fn fail_next_inserts(&self, count: u32) {
            self.failing_inserts.store(count, Ordering::SeqCst);
        }

        pub(crate) fn fail_next_queries(&self, count: u32) {
            self.failing_queries.store(count, Ordering::SeqCst);
        }

        pub(crate) fn query_failures_left(&self) -> u32 {
            self.failing_queries.load(Ordering::SeqCst)
        }

        fn take(counter: &AtomicU32) -> Result<(), StoreError> {
            if counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                Err(StoreError::Unavailable("injected outage".to_owned()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl JobStore for FlakyStore {
        async fn insert(&self, job: EnqueuableJob) -> Result<JobId, StoreError> {
            Self::take(&self.failing_inserts)?;
            self.inner.insert(job).await
        }

        async fn get(&self, id: &JobId) -> Result<Option<JobRecord>, StoreError> {
            self.inner.get(id).await
        }

        async fn update(&self, id: &JobId, update: JobUpdate) -> Result<(), StoreError> {
            self.inner.update(id, update).await
        }

        async fn query(&self, query: JobQuery) -> Result<Vec<JobRecord>, StoreError> {
            Self::take(&self.failing_queries)?;
            self.inner.query(query).await
        }

        async fn count(&self, query: JobQuery) -> Result<usize, StoreError> {
            self.inner.count(query).await
        }

        async fn delete_many(&self, ids: Vec<JobId>) -> Result<(), StoreError> {
            self.inner.delete_many(ids).await
        }
    }

    pub(crate) fn enqueuable(job_type: &str) -> EnqueuableJob {
        EnqueuableJob {
            job_type: job_type.to_owned(),
            priority: JobPriority::Normal,
            data: json!({}),
            max_attempts: 3,
            scheduled_for: Utc::now(),
            user_id: None,
            metadata: JobMetadata::default(),
        }
    }

    #[tokio::test]
    async fn insert_assigns_ids_and_defaults() {
        let store = InMemoryStore::new();

        let first = store.insert(enqueuable("email")).await.unwrap();
        let second = store.insert(enqueuable("email")).await.unwrap();
        assert_ne!(first, second);

        let job = store.get(&first).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_attempts, 3);
        assert_eq!(job.created_at, job.updated_at);
        assert!(job.started_at.is_none());
        assert!(job.completed_at.is_none());
        assert!(job.error.is_none());
        assert!(job.result.is_none());
    }

    #[tokio::test]
    async fn get_missing_job_is_none() {
        let store = InMemoryStore::new();
        assert!(store.get(&JobId::from("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_patches_only_given_fields() {
        let store = InMemoryStore::new();
        let id = store.insert(enqueuable("email")).await.unwrap();
        let before = store.get(&id).await.unwrap().unwrap();

        store
            .update(
                &id,
                JobUpdate {
                    status: Some(JobStatus::Retrying),
                    attempts: Some(1),
                    error: Some("transient".to_owned()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let job = store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Retrying);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.error.as_deref(), Some("transient"));
        assert_eq!(job.scheduled_for, before.scheduled_for);
        assert!(job.updated_at >= before.updated_at);
    }

    #[tokio::test]
    async fn update_missing_job_errors() {
        let store = InMemoryStore::new();
        assert_matches!(
            store.update(&JobId::from("nope"), JobUpdate::default()).await,
            Err(StoreError::JobNotFound(_))
        );
    }

    #[tokio::test]
    async fn runnable_query_orders_by_priority_then_age() {
        let store = InMemoryStore::new();
        let normal = store.insert(enqueuable("a")).await.unwrap();
        let _young_urgent = store
            .insert(EnqueuableJob {
                priority: JobPriority::Urgent,
                ..enqueuable("b")
            })
            .await
            .unwrap();
        let old_urgent = store
            .insert(EnqueuableJob {
                priority: JobPriority::Urgent,
                ..enqueuable("c")
            })
            .await
            .unwrap();
        // Make the later urgent insert the older one by creation time.
        {
            let mut jobs = store.jobs.write().unwrap();
            let job = jobs.iter_mut().find(|j| j.id == old_urgent).unwrap();
            job.created_at -= TimeDelta::minutes(5);
        }

        let jobs = store.query(JobQuery::runnable_at(Utc::now())).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, old_urgent);

        let all = store
            .query(JobQuery {
                order: QueryOrder::PriorityThenCreated,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(all.last().unwrap().id, normal);
    }

    #[tokio::test]
    async fn runnable_query_skips_future_and_terminal_jobs() {
        let store = InMemoryStore::new();
        let _future = store
            .insert(EnqueuableJob {
                scheduled_for: Utc::now() + TimeDelta::hours(1),
                ..enqueuable("future")
            })
            .await
            .unwrap();
        let done = store.insert(enqueuable("done")).await.unwrap();
        store
            .update(
                &done,
                JobUpdate {
                    status: Some(JobStatus::Completed),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let retrying = store.insert(enqueuable("retry")).await.unwrap();
        store
            .update(
                &retrying,
                JobUpdate {
                    status: Some(JobStatus::Retrying),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let jobs = store.query(JobQuery::runnable_at(Utc::now())).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, retrying);
    }

    #[tokio::test]
    async fn count_by_status() {
        let store = InMemoryStore::new();
        store.insert(enqueuable("a")).await.unwrap();
        store.insert(enqueuable("b")).await.unwrap();
        let failed = store.insert(enqueuable("c")).await.unwrap();
        store
            .update(
                &failed,
                JobUpdate {
                    status: Some(JobStatus::Failed),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let pending = store
            .count(JobQuery::with_status(JobStatus::Pending))
            .await
            .unwrap();
        let failed = store
            .count(JobQuery::with_status(JobStatus::Failed))
            .await
            .unwrap();
        assert_eq!(pending, 2);
        assert_eq!(failed, 1);
    }

    #[tokio::test]
    async fn flaky_store_recovers_after_primed_failures() {
        let store = FlakyStore::new(InMemoryStore::new());

        store.fail_next_inserts(1);
        assert_matches!(
            store.insert(enqueuable("a")).await,
            Err(StoreError::Unavailable(_))
        );
        assert!(store.insert(enqueuable("a")).await.is_ok());

        store.fail_next_queries(1);
        assert_matches!(
            store.query(JobQuery::default()).await,
            Err(StoreError::Unavailable(_))
        );
        assert_eq!(store.query(JobQuery::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_many_ignores_unknown_ids() {
        let store = InMemoryStore::new();
        let keep = store.insert(enqueuable("keep")).await.unwrap();
        let gone = store.insert(enqueuable("gone")).await.unwrap();

        store
            .delete_many(vec![gone.clone(), JobId::from("nope")])
            .await
            .unwrap();

        assert!(store.get(&keep).await.unwrap().is_some());
        assert!(store.get(&gone).await.unwrap().is_none());
    }
}
