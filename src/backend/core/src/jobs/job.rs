//! Job records and lifecycle types.
//!
//! This module provides the data side of the job engine:
//!
//! - **Job**: The stored record of one submitted unit of work
//! - **JobStatus**: The lifecycle states a job moves through
//! - **JobPriority**: Dispatch ordering for the pending queue
//! - **JobResult**: The outcome a handler reports back
//! - **JobRequest**: Submission options for `JobManager::create_job_with`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Account (tenant) identifier owning a job.
pub type AccountId = i64;

/// Free-form JSON parameters passed to a handler.
pub type JobParameters = serde_json::Map<String, serde_json::Value>;

// ═══════════════════════════════════════════════════════════════════════════════
// Job Identification
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique identifier for a job instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Create a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Status
// ═══════════════════════════════════════════════════════════════════════════════

/// Status of a job.
///
/// ```text
/// Queued ──▶ Running ──▶ Completed
///   │  ▲        │  └────▶ Failed
///   │  │        ├───────▶ Cancelled
///   │  └─ Retrying ◀─┘
///   └──────────────────▶ Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is waiting in the pending queue
    Queued,
    /// Job is currently being executed
    Running,
    /// Job completed successfully
    Completed,
    /// Job failed and will not be retried
    Failed,
    /// Job was cancelled
    Cancelled,
    /// Job failed and is waiting out its backoff delay
    Retrying,
}

impl JobStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [JobStatus; 6] = [
        Self::Queued,
        Self::Running,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
        Self::Retrying,
    ];

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Check if the job can still be cancelled by a caller.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }

    /// Stable lowercase name, identical to the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Retrying => "retrying",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Priority
// ═══════════════════════════════════════════════════════════════════════════════

/// Priority level for jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    /// Lowest priority - processed when nothing else is waiting
    Low = 0,
    /// Normal priority - default for most jobs
    Normal = 1,
    /// High priority - processed before normal jobs
    High = 2,
    /// Critical priority - processed first
    Critical = 3,
}

impl Default for JobPriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(name)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Result
// ═══════════════════════════════════════════════════════════════════════════════

/// Outcome reported by a handler, stored on the job once it finishes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    /// Whether the work succeeded
    pub success: bool,
    /// Handler-defined output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JobParameters>,
    /// Failure description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Non-fatal issues encountered along the way
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl JobResult {
    /// A successful result without output data.
    pub fn success() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    /// A successful result carrying output data.
    pub fn with_data(data: JobParameters) -> Self {
        Self {
            success: true,
            data: Some(data),
            ..Default::default()
        }
    }

    /// An unsuccessful result with an error message.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Add a warning.
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    /// Replace the warnings.
    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Request
// ═══════════════════════════════════════════════════════════════════════════════

/// Submission options for a new job.
///
/// `max_retries` and `timeout_seconds` fall back to the manager's configured
/// defaults when left unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub job_type: String,
    pub account_id: AccountId,
    #[serde(default)]
    pub parameters: JobParameters,
    #[serde(default)]
    pub priority: JobPriority,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl JobRequest {
    pub fn new(job_type: impl Into<String>, account_id: AccountId) -> Self {
        Self {
            job_type: job_type.into(),
            account_id,
            parameters: JobParameters::new(),
            priority: JobPriority::default(),
            max_retries: None,
            timeout_seconds: None,
        }
    }

    pub fn with_parameters(mut self, parameters: JobParameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Set a single parameter.
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = Some(timeout_seconds);
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Record
// ═══════════════════════════════════════════════════════════════════════════════

/// The stored record of one submitted job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier
    pub id: JobId,
    /// Handler selector
    pub job_type: String,
    /// Owning account
    pub account_id: AccountId,
    /// Handler input
    pub parameters: JobParameters,
    /// Dispatch priority
    pub priority: JobPriority,
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// Execution timeout per attempt (seconds)
    pub timeout_seconds: u64,
    /// Current status
    pub status: JobStatus,
    /// When the job was created
    pub created_at: DateTime<Utc>,
    /// When the latest attempt started
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,
    /// Progress percentage (0-100)
    pub progress_percentage: f64,
    /// Latest progress message
    pub progress_message: String,
    /// Latest step label
    pub current_step: String,
    /// Number of retries performed so far
    pub retry_count: u32,
    /// Error from the most recent failed attempt
    pub last_error: Option<String>,
    /// Final outcome
    pub result: Option<JobResult>,
}

impl Job {
    /// Create a queued job from a request whose defaults have been resolved.
    pub fn new(
        id: JobId,
        request: JobRequest,
        max_retries: u32,
        timeout_seconds: u64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            job_type: request.job_type,
            account_id: request.account_id,
            parameters: request.parameters,
            priority: request.priority,
            max_retries,
            timeout_seconds,
            status: JobStatus::Queued,
            created_at,
            started_at: None,
            completed_at: None,
            progress_percentage: 0.0,
            progress_message: String::new(),
            current_step: String::new(),
            retry_count: 0,
            last_error: None,
            result: None,
        }
    }

    /// Execution timeout per attempt.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// 1-indexed attempt number of the current or latest execution.
    pub fn attempt(&self) -> u32 {
        self.retry_count + 1
    }

    /// Check whether the retry budget still allows another attempt.
    pub fn has_retries_left(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Mark as running.
    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Running;
        self.started_at = Some(now);
    }

    /// Mark as completed with the handler's result.
    pub fn mark_completed(&mut self, result: JobResult, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.completed_at = Some(now);
        self.progress_percentage = 100.0;
        self.result = Some(result);
    }

    /// Mark as terminally failed.
    pub fn mark_failed(&mut self, error: &str, now: DateTime<Utc>) {
        self.status = JobStatus::Failed;
        self.completed_at = Some(now);
        self.last_error = Some(error.to_string());
        self.result = Some(JobResult::failure(error));
    }

    /// Mark as waiting for a retry, consuming one unit of the retry budget.
    pub fn mark_retrying(&mut self, error: &str) {
        self.status = JobStatus::Retrying;
        self.retry_count += 1;
        self.last_error = Some(error.to_string());
    }

    /// Put a retrying job back in line.
    pub fn mark_requeued(&mut self) {
        self.status = JobStatus::Queued;
    }

    /// Mark as cancelled.
    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(now);
    }

    /// Record a progress snapshot. Percentages are clamped to [0, 100]; NaN becomes 0.
    pub fn set_progress(&mut self, percent: f64, message: impl Into<String>, step: impl Into<String>) {
        self.progress_percentage = if percent.is_nan() {
            0.0
        } else {
            percent.clamp(0.0, 100.0)
        };
        self.progress_message = message.into();
        self.current_step = step.into();
    }

    /// Wall time of the latest attempt, if it finished.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
