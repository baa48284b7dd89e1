//! Background job engine for the back-office.
//!
//! This module provides an in-process job system with:
//!
//! - **Job records**: Lifecycle, progress and result tracking per job
//! - **Handlers**: Trait-based units of work registered per job type
//! - **Queue**: Priority-ordered pending queue
//! - **Worker pool**: Bounded concurrent execution with timeouts and cancellation
//! - **Retries**: Exponential backoff on cancellable timers
//! - **Sweeper**: Periodic eviction of old terminal jobs
//! - **Stats**: Rolling 24 hour summary
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                                JobManager                                    │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐    ┌─────────────┐  │
//! │  │  Handler    │    │  JobStore   │    │  JobQueue   │    │ WorkerPool  │  │
//! │  │  Registry   │───▶│ (+ account  │───▶│ (priority)  │───▶│ (semaphore, │  │
//! │  │             │    │   index)    │    │             │    │  timeout)   │  │
//! │  └─────────────┘    └─────────────┘    └─────────────┘    └─────────────┘  │
//! │                            ▲                  ▲                  │         │
//! │                            │                  └── RetryScheduler ◀┘         │
//! │                            └──────────────── Sweeper                        │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use backoffice_core::jobs::{
//!     JobContext, JobFailure, JobHandler, JobManager, JobRequest, JobResult,
//! };
//!
//! struct ImportMessages;
//!
//! #[async_trait]
//! impl JobHandler for ImportMessages {
//!     async fn execute(&self, job: &Job, ctx: &JobContext) -> Result<JobResult, JobFailure> {
//!         ctx.update_progress(50.0, "Fetching", "fetch");
//!         Ok(JobResult::success())
//!     }
//! }
//!
//! let manager = JobManager::new(config.jobs.clone())?;
//! manager.register_handler("ebay_messages", || ImportMessages);
//! manager.start();
//!
//! let id = manager.create_job_with(JobRequest::new("ebay_messages", account_id))?;
//! ```

pub mod builtin;
pub mod clock;
pub mod handler;
pub mod job;
pub mod manager;
pub mod queue;
pub mod retry;
pub mod stats;
pub mod store;
pub mod sweeper;
pub mod worker;

pub use builtin::{register_builtin_handlers, CsvImportHandler, EchoHandler};
pub use clock::{Clock, ManualClock, SystemClock};
pub use handler::{HandlerFactory, HandlerRegistry, JobContext, JobFailure, JobHandler, PermanentKind};
pub use job::{
    AccountId, Job, JobId, JobParameters, JobPriority, JobRequest, JobResult, JobStatus,
};
pub use manager::JobManager;
pub use queue::{JobQueue, QueuedJob};
pub use retry::{backoff_delay, RetryScheduler, MAX_BACKOFF_SECS};
pub use stats::{JobStats, JobTypeStats, STATS_WINDOW_HOURS};
pub use store::JobStore;
pub use sweeper::{COMPLETED_RETENTION_HOURS, FAILED_RETENTION_HOURS};
pub use worker::{PoolSnapshot, WorkerPool, WorkerStats};
