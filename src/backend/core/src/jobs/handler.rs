//! Handler contract and registry.
//!
//! This module provides:
//!
//! - **JobHandler trait**: The interface each job type implements
//! - **JobFailure**: The explicit failure sum type a handler returns
//! - **JobContext**: Progress reporting and cancellation for a running job
//! - **HandlerRegistry**: Job-type to handler-factory map populated at startup

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::job::{AccountId, Job, JobId, JobResult};
use super::store::JobStore;
use crate::error::{BackofficeError, ErrorCode};

// ═══════════════════════════════════════════════════════════════════════════════
// Job Failure
// ═══════════════════════════════════════════════════════════════════════════════

/// Kinds of failure that retrying cannot fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermanentKind {
    InvalidInput,
    PermissionDenied,
    NotFound,
    Other,
}

impl fmt::Display for PermanentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidInput => "invalid input",
            Self::PermissionDenied => "permission denied",
            Self::NotFound => "not found",
            Self::Other => "permanent failure",
        };
        f.write_str(name)
    }
}

/// Why a job attempt did not produce a result.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum JobFailure {
    /// Transient failure; eligible for retry while budget remains
    #[error("{message}")]
    Recoverable { message: String },

    /// Failure that will recur on every attempt
    #[error("{kind}: {message}")]
    Permanent { kind: PermanentKind, message: String },

    /// The attempt exceeded its execution timeout
    #[error("job timed out after {}s", .after.as_secs())]
    TimedOut { after: Duration },

    /// The job was cancelled while running
    #[error("job was cancelled")]
    Cancelled,
}

impl JobFailure {
    /// Create a retryable failure.
    pub fn recoverable(message: impl Into<String>) -> Self {
        Self::Recoverable {
            message: message.into(),
        }
    }

    /// Create a non-retryable failure of the given kind.
    pub fn permanent(kind: PermanentKind, message: impl Into<String>) -> Self {
        Self::Permanent {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::permanent(PermanentKind::InvalidInput, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::permanent(PermanentKind::PermissionDenied, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::permanent(PermanentKind::NotFound, message)
    }

    /// Whether the default policy considers this failure worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Recoverable { .. } | Self::TimedOut { .. })
    }

    /// Error code used for logging and metrics.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Recoverable { .. } => ErrorCode::JobExecutionFailed,
            Self::Permanent { kind, .. } => match kind {
                PermanentKind::InvalidInput => ErrorCode::InvalidInput,
                PermanentKind::PermissionDenied => ErrorCode::Forbidden,
                PermanentKind::NotFound => ErrorCode::RecordNotFound,
                PermanentKind::Other => ErrorCode::JobExecutionFailed,
            },
            Self::TimedOut { .. } => ErrorCode::JobTimeout,
            Self::Cancelled => ErrorCode::JobCancelled,
        }
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Recoverable { .. } => "recoverable",
            Self::Permanent { .. } => "permanent",
            Self::TimedOut { .. } => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }
}

impl From<BackofficeError> for JobFailure {
    fn from(error: BackofficeError) -> Self {
        let message = error.user_message().to_string();
        match error.code() {
            ErrorCode::ValidationError
            | ErrorCode::InvalidInput
            | ErrorCode::DeserializationError => Self::invalid_input(message),
            ErrorCode::Forbidden => Self::permission_denied(message),
            ErrorCode::RecordNotFound | ErrorCode::JobNotFound => Self::not_found(message),
            ErrorCode::JobCancelled => Self::Cancelled,
            code if code.is_retryable() => Self::recoverable(message),
            _ => Self::permanent(PermanentKind::Other, message),
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Context
// ═══════════════════════════════════════════════════════════════════════════════

/// Context passed to a handler for one execution attempt.
#[derive(Clone)]
pub struct JobContext {
    job_id: JobId,
    job_type: String,
    account_id: AccountId,
    attempt: u32,
    store: Arc<JobStore>,
    cancellation: CancellationToken,
}

impl JobContext {
    pub(crate) fn new(job: &Job, store: Arc<JobStore>, cancellation: CancellationToken) -> Self {
        Self {
            job_id: job.id,
            job_type: job.job_type.clone(),
            account_id: job.account_id,
            attempt: job.attempt(),
            store,
            cancellation,
        }
    }

    /// Get the job ID.
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Get the job type.
    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    /// Get the current attempt number (1-indexed).
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Persist a progress snapshot into the stored job immediately.
    ///
    /// Ignored once the job has left the Running state.
    pub fn update_progress(&self, percent: f64, message: impl Into<String>, step: impl Into<String>) {
        let message = message.into();
        let step = step.into();
        self.store.update(&self.job_id, |job| {
            if job.status == super::job::JobStatus::Running {
                job.set_progress(percent, message, step);
            }
        });
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves once cancellation is requested.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    /// Run a future, abandoning it if the job is cancelled first.
    pub async fn cancellable<F, T>(&self, future: F) -> Result<T, JobFailure>
    where
        F: std::future::Future<Output = T>,
    {
        tokio::select! {
            result = future => Ok(result),
            _ = self.cancellation.cancelled() => Err(JobFailure::Cancelled),
        }
    }

    /// Log a message associated with this job.
    pub fn log_info(&self, message: &str) {
        tracing::info!(
            job_id = %self.job_id,
            job_type = %self.job_type,
            account_id = self.account_id,
            attempt = self.attempt,
            message
        );
    }

    /// Log a warning associated with this job.
    pub fn log_warn(&self, message: &str) {
        tracing::warn!(
            job_id = %self.job_id,
            job_type = %self.job_type,
            account_id = self.account_id,
            attempt = self.attempt,
            message
        );
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Handler Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// The trait every job type implements.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Execute one attempt of the job.
    ///
    /// Return `JobFailure::recoverable` for transient failures that should be
    /// retried and one of the permanent constructors for failures that will
    /// not go away. Long-running handlers should call
    /// [`JobContext::update_progress`] and check [`JobContext::is_cancelled`]
    /// between units of work.
    async fn execute(&self, job: &Job, ctx: &JobContext) -> Result<JobResult, JobFailure>;

    /// Decide whether a failed attempt should be retried.
    ///
    /// The default retries recoverable failures and timeouts while the
    /// job's retry budget remains. Cancellation is never passed here.
    fn should_retry(&self, job: &Job, failure: &JobFailure) -> bool {
        failure.is_transient() && job.has_retries_left()
    }
}

/// Builds a handler instance for each execution.
pub type HandlerFactory = Arc<dyn Fn() -> Arc<dyn JobHandler> + Send + Sync>;

// ═══════════════════════════════════════════════════════════════════════════════
// Handler Registry
// ═══════════════════════════════════════════════════════════════════════════════

/// Maps job-type tags to handler factories.
#[derive(Default)]
pub struct HandlerRegistry {
    factories: RwLock<HashMap<String, HandlerFactory>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for a job type, replacing any previous one.
    pub fn register<F, H>(&self, job_type: impl Into<String>, factory: F)
    where
        F: Fn() -> H + Send + Sync + 'static,
        H: JobHandler + 'static,
    {
        let job_type = job_type.into();
        let factory: HandlerFactory = Arc::new(move || Arc::new(factory()) as Arc<dyn JobHandler>);

        if self.factories.write().insert(job_type.clone(), factory).is_some() {
            tracing::warn!(job_type = %job_type, "Replacing previously registered job handler");
        } else {
            tracing::info!(job_type = %job_type, "Registered job handler");
        }
    }

    /// Build a handler for a job type.
    ///
    /// A missing registration or a panicking factory is returned as a
    /// permanent failure; the panic does not unwind into the caller.
    pub fn create(&self, job_type: &str) -> Result<Arc<dyn JobHandler>, JobFailure> {
        let factory = self.factories.read().get(job_type).cloned().ok_or_else(|| {
            JobFailure::permanent(
                PermanentKind::Other,
                format!("no handler registered for job type '{}'", job_type),
            )
        })?;

        catch_unwind(AssertUnwindSafe(|| factory())).map_err(|payload| {
            JobFailure::permanent(
                PermanentKind::Other,
                format!("handler factory panicked: {}", panic_message(payload)),
            )
        })
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.factories.read().contains_key(job_type)
    }

    /// Registered job types, sorted.
    pub fn job_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.read().keys().cloned().collect();
        types.sort();
        types
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("job_types", &self.job_types())
            .finish()
    }
}
