//! Cron-style scheduled tasks.
//!
//! The scheduler keeps an in-memory table of tasks, each pairing a cron
//! expression with a job type and payload. A tick loop evaluates the table
//! once a minute and enqueues a job for every due task; the queue engine does
//! the actual work. The table is process-local and rebuilt on restart, which
//! is why [`default_tasks`] exists.
//!
//! A task fires at most once per calendar minute: the tick that observes a
//! matching minute records it in `last_run`, and later ticks inside the same
//! minute skip the task.
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::{
    cron::{truncate_to_minute, CronExpr},
    job::builder::NewJob,
    queue::JobQueue,
    store::JobStore,
    TaskmillError,
};

const TICK_INTERVAL: Duration = Duration::from_secs(60);

/// The metadata source tag stamped on every job a scheduled task enqueues.
pub const SCHEDULED_TASK_SOURCE: &str = "scheduled_task";

/// A registered scheduled task.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledTask {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub cron_expression: String,
    /// Parsed form of `cron_expression`, kept in sync by the scheduler so
    /// ticks evaluate without re-parsing.
    cron: CronExpr,
    /// The job type enqueued when the task fires.
    pub job_type: String,
    /// The payload of every job this task enqueues.
    pub job_data: Value,
    pub is_active: bool,
    pub last_run: Option<DateTime<Utc>>,
    /// Advisory next occurrence, recomputed whenever the task fires or its
    /// expression changes. `None` when the expression has no occurrence
    /// within the evaluator's horizon.
    pub next_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A request to register a new scheduled task.
#[derive(Debug, Clone)]
pub struct TaskDefinition {
    pub(crate) name: String,
    pub(crate) description: Option<String>,
    pub(crate) cron_expression: String,
    pub(crate) job_type: String,
    pub(crate) job_data: Value,
    pub(crate) is_active: bool,
}

impl TaskDefinition {
    pub fn new(
        name: impl Into<String>,
        cron_expression: impl Into<String>,
        job_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: None,
            cron_expression: cron_expression.into(),
            job_type: job_type.into(),
            job_data: Value::Null,
            is_active: true,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.job_data = data;
        self
    }

    /// Registers the task disabled; it will not fire until activated.
    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// A partial update to an existing task. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub cron_expression: Option<String>,
    pub job_type: Option<String>,
    pub job_data: Option<Value>,
    pub is_active: Option<bool>,
}

/// The task set a fresh deployment starts from.
pub fn default_tasks() -> Vec<TaskDefinition> {
    vec![
        TaskDefinition::new("Nightly vendor sync", "0 2 * * *", "vendor_sync")
            .with_description("Refresh vendor availability and pricing data"),
        TaskDefinition::new("Weekly data cleanup", "0 3 * * 0", "data_cleanup")
            .with_description("Remove stale drafts and expired share links"),
        TaskDefinition::new("Monthly usage report", "0 6 1 * *", "report_generation")
            .with_description("Generate the previous month's usage report"),
        TaskDefinition::new("Hourly health check", "0 * * * *", "health_check"),
        TaskDefinition::new("Daily credit refresh", "0 0 * * *", "credit_refresh")
            .with_description("Queue per-account credit refresh batches"),
        TaskDefinition::new(
            "Credit refresh worker",
            "0,5,10,15,20,25,30,35,40,45,50,55 * * * *",
            "credit_refresh_worker",
        )
        .with_data(json!({"batch_size": 50})),
    ]
}

struct SchedulerInner<S: JobStore> {
    queue: JobQueue<S>,
    tasks: Mutex<Vec<ScheduledTask>>,
    id_counter: AtomicU64,
    running: AtomicBool,
    cancellation_token: Mutex<Option<CancellationToken>>,
}

/// The scheduled task manager.
///
/// Cheap to clone; clones share the same task table.
pub struct Scheduler<S: JobStore> {
    inner: Arc<SchedulerInner<S>>,
}

impl<S: JobStore> Clone for Scheduler<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> Scheduler<S>
where
    S: JobStore,
{
    /// A scheduler with an empty task table.
    pub fn new(queue: JobQueue<S>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                queue,
                tasks: Mutex::new(Vec::new()),
                id_counter: AtomicU64::new(1),
                running: AtomicBool::new(false),
                cancellation_token: Mutex::new(None),
            }),
        }
    }

    /// A scheduler pre-seeded with [`default_tasks`].
    pub fn with_default_tasks(queue: JobQueue<S>) -> Result<Self, TaskmillError> {
        let scheduler = Self::new(queue);
        for definition in default_tasks() {
            let id = format!(
                "default_{}",
                definition.name.to_lowercase().replace(' ', "_")
            );
            scheduler.insert_task(id, definition)?;
        }
        Ok(scheduler)
    }

    /// Registers a task, validating its cron expression up front. A malformed
    /// expression is rejected here rather than silently never firing.
    pub fn add_task(&self, definition: TaskDefinition) -> Result<ScheduledTask, TaskmillError> {
        let id = format!("custom_{}", self.inner.id_counter.fetch_add(1, Ordering::SeqCst));
        self.insert_task(id, definition)
    }

    fn insert_task(
        &self,
        id: String,
        definition: TaskDefinition,
    ) -> Result<ScheduledTask, TaskmillError> {
        let expr: CronExpr = definition.cron_expression.parse()?;
        let now = Utc::now();
        let task = ScheduledTask {
            id,
            name: definition.name,
            description: definition.description,
            cron_expression: definition.cron_expression,
            job_type: definition.job_type,
            job_data: definition.job_data,
            is_active: definition.is_active,
            last_run: None,
            next_run: expr.next_run(now).ok(),
            cron: expr,
            created_at: now,
            updated_at: now,
        };
        self.inner
            .tasks
            .lock()
            .map_err(|_| TaskmillError::BadState)?
            .push(task.clone());
        tracing::debug!(task_id = %task.id, "Registered scheduled task {}", task.name);
        Ok(task)
    }

    /// Patches a task. A changed cron expression is re-validated and
    /// `next_run` recomputed.
    pub fn update_task(&self, id: &str, update: TaskUpdate) -> Result<ScheduledTask, TaskmillError> {
        let new_expr = update
            .cron_expression
            .as_deref()
            .map(CronExpr::parse)
            .transpose()?;

        let mut tasks = self.inner.tasks.lock().map_err(|_| TaskmillError::BadState)?;
        let task = tasks
            .iter_mut()
            .find(|task| task.id == id)
            .ok_or_else(|| TaskmillError::TaskNotFound(id.to_owned()))?;

        if let Some(name) = update.name {
            task.name = name;
        }
        if let Some(description) = update.description {
            task.description = Some(description);
        }
        if let Some(job_type) = update.job_type {
            task.job_type = job_type;
        }
        if let Some(job_data) = update.job_data {
            task.job_data = job_data;
        }
        if let Some(is_active) = update.is_active {
            task.is_active = is_active;
        }
        if let (Some(cron_expression), Some(expr)) = (update.cron_expression, new_expr) {
            task.cron_expression = cron_expression;
            task.next_run = expr.next_run(Utc::now()).ok();
            task.cron = expr;
        }
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    /// Removes a task, returning its final state.
    pub fn remove_task(&self, id: &str) -> Result<ScheduledTask, TaskmillError> {
        let mut tasks = self.inner.tasks.lock().map_err(|_| TaskmillError::BadState)?;
        let position = tasks
            .iter()
            .position(|task| task.id == id)
            .ok_or_else(|| TaskmillError::TaskNotFound(id.to_owned()))?;
        Ok(tasks.remove(position))
    }

    pub fn set_task_active(&self, id: &str, is_active: bool) -> Result<ScheduledTask, TaskmillError> {
        self.update_task(
            id,
            TaskUpdate {
                is_active: Some(is_active),
                ..Default::default()
            },
        )
    }

    pub fn task(&self, id: &str) -> Result<Option<ScheduledTask>, TaskmillError> {
        Ok(self
            .inner
            .tasks
            .lock()
            .map_err(|_| TaskmillError::BadState)?
            .iter()
            .find(|task| task.id == id)
            .cloned())
    }

    /// A snapshot of the current task table.
    pub fn tasks(&self) -> Result<Vec<ScheduledTask>, TaskmillError> {
        Ok(self
            .inner
            .tasks
            .lock()
            .map_err(|_| TaskmillError::BadState)?
            .clone())
    }

    /// Starts the tick loop: an immediate evaluation pass, then one every
    /// minute. Calling `start` on a running scheduler is a no-op.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let token = CancellationToken::new();
        if let Ok(mut slot) = self.inner.cancellation_token.lock() {
            *slot = Some(token.clone());
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tracing::debug!("Scheduler tick loop started");
            loop {
                if token.is_cancelled() {
                    break;
                }
                Self::evaluate_tasks_at(&inner, Utc::now()).await;
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(TICK_INTERVAL) => {}
                }
            }
            tracing::debug!("Shutting down the scheduler");
        });
    }

    /// Stops the tick loop. An evaluation pass already in flight finishes on
    /// its own. Calling `stop` on a stopped scheduler is a no-op; a stopped
    /// scheduler can be started again.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut slot) = self.inner.cancellation_token.lock() {
            if let Some(token) = slot.take() {
                token.cancel();
            }
        }
    }

    /// One tick: enqueue a job for every task due at `now` and record the
    /// firing.
    ///
    /// The table lock is never held across an await; due tasks are snapshot
    /// first and written back individually after their enqueue settles.
    async fn evaluate_tasks_at(inner: &SchedulerInner<S>, now: DateTime<Utc>) {
        let due: Vec<ScheduledTask> = {
            let tasks = match inner.tasks.lock() {
                Ok(tasks) => tasks,
                Err(_) => {
                    tracing::error!("Scheduled task table lock poisoned, skipping tick");
                    return;
                }
            };
            tasks
                .iter()
                .filter(|task| Self::is_due(task, now))
                .cloned()
                .collect()
        };

        for task in due {
            let job = NewJob::new(task.job_type.clone())
                .with_data(task.job_data.clone())
                .from_source(SCHEDULED_TASK_SOURCE)
                .with_description(task.name.clone());
            match inner.queue.enqueue(job).await {
                Ok(job_id) => {
                    tracing::info!(
                        task_id = %task.id,
                        %job_id,
                        "Scheduled task {} enqueued job {job_id}",
                        task.name
                    );
                    Self::record_firing(inner, &task.id, now);
                }
                Err(err) => {
                    // One failed task must not stop the rest of the tick.
                    tracing::error!(
                        ?err,
                        task_id = %task.id,
                        "Failed to enqueue job for scheduled task {}: {err}",
                        task.name
                    );
                }
            }
        }
    }

    fn is_due(task: &ScheduledTask, now: DateTime<Utc>) -> bool {
        if !task.is_active {
            return false;
        }
        if task
            .last_run
            .is_some_and(|last| truncate_to_minute(last) == truncate_to_minute(now))
        {
            return false;
        }
        task.cron.matches(now)
    }

    fn record_firing(inner: &SchedulerInner<S>, task_id: &str, now: DateTime<Utc>) {
        let Ok(mut tasks) = inner.tasks.lock() else {
            return;
        };
        // The task may have been removed while its job was being enqueued.
        if let Some(task) = tasks.iter_mut().find(|task| task.id == task_id) {
            task.last_run = Some(now);
            task.next_run = task.cron.next_run(now).ok();
            task.updated_at = now;
        }
    }
}
