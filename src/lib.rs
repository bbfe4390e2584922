//! An embedded background job queue with cron-style scheduled tasks.
//!
//! Taskmill runs deferred work inside an existing application process. Jobs
//! are persisted documents in a [`store::JobStore`], executed by
//! [`processor::Processor`]s registered per job type, retried with a fixed
//! backoff schedule on failure, and swept from the store once they have been
//! terminal for longer than a retention window. A [`scheduler::Scheduler`]
//! layered on top enqueues jobs on cron expressions.
//!
//! The engine assumes a single process per store. There is no distributed
//! claim protocol; see [`store`] for the exact boundary.
//!
//! # Example
//!
//! ```
//! use taskmill::prelude::*;
//! use taskmill::store::memory::InMemoryStore;
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), TaskmillError> {
//! let processors = ProcessorRegistry::new()
//!     .register_fn("email", |job| async move { Ok(job.data.clone()) });
//!
//! let queue = JobQueue::new(InMemoryStore::new(), processors);
//! let handle = queue.spawn()?;
//!
//! let id = queue
//!     .enqueue(NewJob::new("email").with_data(json!({"to": "couple@example.com"})))
//!     .await?;
//! assert!(queue.job(&id).await?.is_some());
//!
//! handle.graceful_shutdown().await?;
//! # Ok(())
//! # }
//! ```
use thiserror::Error;

use crate::{cron::CronError, store::StoreError};

pub mod backoff;
pub mod cron;
pub mod job;
pub mod prelude;
pub mod processor;
pub mod pruner;
pub mod queue;
pub mod scheduler;
pub mod store;

/// The errors this crate's operations can fail with.
#[derive(Debug, Error)]
pub enum TaskmillError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("invalid cron expression: {0}")]
    Cron(#[from] CronError),
    #[error("scheduled task {0} not found")]
    TaskNotFound(String),
    /// A shared lock was poisoned by a panic elsewhere.
    #[error("internal state corrupted")]
    BadState,
    /// The queue or scheduler loop was spawned a second time.
    #[error("already started")]
    AlreadyStarted,
    #[error("failed to shut down cleanly")]
    GracefulShutdownFailed,
}
