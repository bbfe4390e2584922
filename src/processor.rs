//! The processor contract and registry.
//!
//! A processor is the only code that knows how to execute a given job type's
//! payload. The engine hands it the full job record and persists whatever it
//! resolves to.
//!
//! When the engine's timeout elapses the in-flight `run` future is dropped,
//! not left running: execution stops at its next await point and side effects
//! past that point never happen. A processor whose work must survive a
//! timeout has to commit it before awaiting, or make it idempotent so the
//! retry can redo it.
use std::{collections::HashMap, fmt, future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::Value;

use crate::job::JobRecord;

/// The error type processors fail with. The engine only records its message
/// on the job record.
pub type ProcessorError = Box<dyn std::error::Error + Send + Sync>;

/// An async handler for one job type.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Executes the job, resolving to an opaque success payload.
    async fn run(&self, job: JobRecord) -> Result<Value, ProcessorError>;

    /// Per-processor override of the engine's default job timeout. On
    /// expiry the `run` future is dropped, cancelling it at its next await
    /// point.
    fn timeout(&self) -> Option<Duration> {
        None
    }
}

/// Adapts a closure returning a future into a [`Processor`].
pub struct FnProcessor<F> {
    f: F,
    timeout: Option<Duration>,
}

impl<F> FnProcessor<F> {
    pub fn new(f: F) -> Self {
        Self { f, timeout: None }
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..self
        }
    }
}

#[async_trait]
impl<F, Fut> Processor for FnProcessor<F>
where
    F: Fn(JobRecord) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ProcessorError>> + Send,
{
    async fn run(&self, job: JobRecord) -> Result<Value, ProcessorError> {
        (self.f)(job).await
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// The mapping from job type to processor, injected into the queue engine at
/// construction.
///
/// An explicit value rather than a process-wide registry so that independent
/// engines (and tests) can carry independent processor tables.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a processor for a job type. Registering the same type again
    /// silently replaces the previous processor.
    pub fn register(
        mut self,
        job_type: impl Into<String>,
        processor: impl Processor + 'static,
    ) -> Self {
        self.processors.insert(job_type.into(), Arc::new(processor));
        self
    }

    /// Registers a closure as the processor for a job type.
    pub fn register_fn<F, Fut>(self, job_type: impl Into<String>, f: F) -> Self
    where
        F: Fn(JobRecord) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ProcessorError>> + Send + 'static,
    {
        self.register(job_type, FnProcessor::new(f))
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.processors.contains_key(job_type)
    }

    pub(crate) fn get(&self, job_type: &str) -> Option<Arc<dyn Processor>> {
        self.processors.get(job_type).cloned()
    }
}

impl fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&str> = self.processors.keys().map(String::as_str).collect();
        types.sort_unstable();
        f.debug_struct("ProcessorRegistry")
            .field("types", &types)
            .finish()
    }
}
