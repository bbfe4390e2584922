//! The document-store boundary the queue engine runs against.
//!
//! The engine only needs a narrow slice of a document database: insert a
//! document and get its id back, fetch one by id, patch a subset of fields by
//! id, run a filtered/ordered/limited collection query, count matches, and
//! delete a batch of documents. [`JobStore`] captures exactly that surface so
//! any store offering those primitives can back the queue.
//!
//! The engine assumes a single process polling a given store. [`JobStore`]
//! deliberately has no conditional-update primitive, so nothing prevents two
//! independent engine instances from claiming the same job; running more than
//! one engine against one store requires adding an atomic claim first.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::job::{JobId, JobMetadata, JobPriority, JobRecord, JobStatus};

pub mod memory;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    JobNotFound(JobId),
    #[error("error encoding or decoding job data")]
    EncodeDecode(#[from] serde_json::Error),
    #[error("store in bad state")]
    BadState,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// A fully resolved job ready for insertion. Produced by the queue from a
/// [`crate::job::builder::NewJob`] after applying configured defaults.
#[derive(Debug, Clone)]
pub struct EnqueuableJob {
    pub job_type: String,
    pub priority: JobPriority,
    pub data: Value,
    pub max_attempts: u32,
    pub scheduled_for: DateTime<Utc>,
    pub user_id: Option<String>,
    pub metadata: JobMetadata,
}

/// A partial update of a job document. `None` fields are left untouched.
///
/// Implementations must refresh the job's `updated_at` on every update.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub attempts: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub result: Option<Value>,
}

/// Result ordering for [`JobStore::query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryOrder {
    /// Whatever order the store returns documents in.
    #[default]
    Unspecified,
    /// Highest priority first, oldest creation time first within a band.
    PriorityThenCreated,
}

/// A filtered collection query. Empty/`None` filters match everything.
#[derive(Debug, Clone, Default)]
pub struct JobQuery {
    /// Match jobs whose status is any of these. Empty matches all statuses.
    pub statuses: Vec<JobStatus>,
    /// Match jobs with `scheduled_for` at or before this instant.
    pub scheduled_before: Option<DateTime<Utc>>,
    /// Match terminal jobs with `completed_at` strictly before this instant.
    pub completed_before: Option<DateTime<Utc>>,
    pub order: QueryOrder,
    pub limit: Option<usize>,
}

impl JobQuery {
    /// The dispatch-candidate query: the single highest-priority,
    /// oldest-created job eligible to run at `now`.
    pub fn runnable_at(now: DateTime<Utc>) -> Self {
        Self {
            statuses: vec![JobStatus::Pending, JobStatus::Retrying],
            scheduled_before: Some(now),
            order: QueryOrder::PriorityThenCreated,
            limit: Some(1),
            ..Default::default()
        }
    }

    pub fn with_status(status: JobStatus) -> Self {
        Self {
            statuses: vec![status],
            ..Default::default()
        }
    }
}

/// The persistence operations the queue engine requires of a document store.
#[async_trait]
pub trait JobStore: Clone + Send + Sync + 'static {
    /// Creates a job document in `Pending` status with zero attempts and
    /// returns the store-assigned id.
    async fn insert(&self, job: EnqueuableJob) -> Result<JobId, StoreError>;

    async fn get(&self, id: &JobId) -> Result<Option<JobRecord>, StoreError>;

    /// Patches the given fields on a job document and refreshes its
    /// `updated_at`.
    async fn update(&self, id: &JobId, update: JobUpdate) -> Result<(), StoreError>;

    async fn query(&self, query: JobQuery) -> Result<Vec<JobRecord>, StoreError>;

    /// Counts matching documents without fetching them.
    async fn count(&self, query: JobQuery) -> Result<usize, StoreError>;

    /// Deletes all the given documents in one batch. Ids that no longer
    /// exist are ignored.
    async fn delete_many(&self, ids: Vec<JobId>) -> Result<(), StoreError>;
}
