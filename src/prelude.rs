//! The commonly used types, re-exported for glob import.
pub use crate::{
    backoff::BackoffTable,
    cron::CronExpr,
    job::{builder::NewJob, JobId, JobMetadata, JobPriority, JobRecord, JobStatus},
    processor::{FnProcessor, Processor, ProcessorError, ProcessorRegistry},
    pruner::PrunerConfig,
    queue::{JobQueue, QueueConfig, QueueHandle, QueueStats},
    scheduler::{default_tasks, ScheduledTask, Scheduler, TaskDefinition, TaskUpdate},
    store::JobStore,
    TaskmillError,
};
