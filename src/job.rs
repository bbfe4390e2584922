//! The job record: the persisted representation of a unit of deferred work.
use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod builder;

/// Opaque identifier assigned by the store when a job is created.
#[derive(Debug, Eq, PartialEq, Clone, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl JobId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The lifecycle status of a job.
///
/// Jobs start in [`JobStatus::Pending`] and end in one of the terminal
/// statuses [`JobStatus::Completed`] or [`JobStatus::Failed`]. A job in
/// [`JobStatus::Retrying`] behaves identically to a pending job for dispatch
/// eligibility once its `scheduled_for` time has elapsed.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Retrying,
}

impl JobStatus {
    /// All statuses, in declaration order.
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Retrying,
    ];

    /// The terminal statuses. No further transitions occur from these.
    pub const TERMINAL: [JobStatus; 2] = [JobStatus::Completed, JobStatus::Failed];

    /// The snake_case wire form used when persisting the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Retrying => "retrying",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Advisory ordering key for job selection. Higher priorities are dispatched
/// first; there is no preemption of running jobs.
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl JobPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPriority::Low => "low",
            JobPriority::Normal => "normal",
            JobPriority::High => "high",
            JobPriority::Urgent => "urgent",
        }
    }
}

impl Display for JobPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Optional bookkeeping attached to a job. Not consulted by any scheduling
/// logic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobMetadata {
    pub source: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
}

/// A persisted unit of deferred work.
///
/// Job records are created via [`crate::queue::JobQueue::enqueue`] or by the
/// [`crate::scheduler::Scheduler`] when a scheduled task fires, mutated only
/// by the queue engine, and deleted only by the cleanup sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    /// String tag selecting a processor. Open-ended in the data layer; the
    /// processor registry effectively closes it at runtime.
    pub job_type: String,
    pub status: JobStatus,
    pub priority: JobPriority,
    /// Opaque payload. Its shape is owned by the processor for `job_type`.
    pub data: Value,
    /// Number of failed attempts so far.
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    /// Refreshed by the store on every update.
    pub updated_at: DateTime<Utc>,
    /// Set when the job transitions to `Processing`.
    pub started_at: Option<DateTime<Utc>>,
    /// Set when the job reaches a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// The last failure message, once any attempt has failed.
    pub error: Option<String>,
    /// The processor's success payload, present only when `Completed`.
    pub result: Option<Value>,
    /// Earliest instant the job is eligible to run.
    pub scheduled_for: DateTime<Utc>,
    pub user_id: Option<String>,
    pub metadata: JobMetadata,
}
