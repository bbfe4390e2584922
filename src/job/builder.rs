use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;

use super::{JobMetadata, JobPriority};

/// A fluent request for a new job.
///
/// Only the job type is mandatory; everything else falls back to the queue's
/// configured defaults when enqueued.
///
/// # Example
///
/// ```
/// use taskmill::job::builder::NewJob;
/// use taskmill::job::JobPriority;
/// use chrono::TimeDelta;
/// use serde_json::json;
///
/// let job = NewJob::new("email")
///     .with_data(json!({"to": "couple@example.com", "template": "welcome"}))
///     .with_priority(JobPriority::High)
///     .with_max_attempts(5)
///     .schedule_in(TimeDelta::minutes(10));
/// ```
#[derive(Debug, Clone)]
pub struct NewJob {
    pub(crate) job_type: String,
    pub(crate) priority: JobPriority,
    pub(crate) data: Value,
    pub(crate) max_attempts: Option<u32>,
    pub(crate) scheduled_for: Option<DateTime<Utc>>,
    pub(crate) user_id: Option<String>,
    pub(crate) metadata: JobMetadata,
}

impl NewJob {
    pub fn new(job_type: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
            priority: JobPriority::default(),
            data: Value::Null,
            max_attempts: None,
            scheduled_for: None,
            user_id: None,
            metadata: JobMetadata::default(),
        }
    }

    pub fn with_data(self, data: Value) -> Self {
        Self { data, ..self }
    }

    pub fn with_priority(self, priority: JobPriority) -> Self {
        Self { priority, ..self }
    }

    pub fn with_max_attempts(self, max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            ..self
        }
    }

    pub fn schedule_at(self, scheduled_for: DateTime<Utc>) -> Self {
        Self {
            scheduled_for: Some(scheduled_for),
            ..self
        }
    }

    pub fn schedule_in(self, delay: TimeDelta) -> Self {
        Self {
            scheduled_for: Some(Utc::now() + delay),
            ..self
        }
    }

    pub fn for_user(self, user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..self
        }
    }

    pub fn from_source(mut self, source: impl Into<String>) -> Self {
        self.metadata.source = Some(source.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.metadata.description = Some(description.into());
        self
    }

    pub fn add_tag(mut self, tag: impl Into<String>) -> Self {
        self.metadata.tags.push(tag.into());
        self
    }
}
