//! Job Manager - the public surface of the job engine.
//!
//! The manager owns every moving part and is the only type collaborators
//! talk to:
//!
//! ```text
//! create_job ──▶ JobStore (Queued) ──▶ JobQueue ──▶ dispatcher
//!                                                      │ acquire slot
//!                                                      ▼
//!                                   WorkerPool::run (timeout, cancel)
//!                                                      │
//!                       ┌──────────────┬───────────────┼──────────────┐
//!                       ▼              ▼               ▼              ▼
//!                   Completed       Failed     Retrying ──timer──▶ Queued
//!                                                            (RetryScheduler)
//! ```
//!
//! A sweeper task evicts old terminal jobs in the background.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::OwnedSemaphorePermit;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::clock::{Clock, SystemClock};
use super::handler::{panic_message, HandlerRegistry, JobContext, JobFailure, JobHandler};
use super::job::{
    AccountId, Job, JobId, JobParameters, JobPriority, JobRequest, JobResult, JobStatus,
};
use super::queue::JobQueue;
use super::retry::{backoff_delay, RetryScheduler};
use super::stats::JobStats;
use super::store::JobStore;
use super::sweeper::{spawn_sweeper, sweep_guarded};
use super::worker::{PoolSnapshot, WorkerPool};
use crate::config::JobsConfig;
use crate::error::{BackofficeError, Result};

/// Orchestrates submission, dispatch, retries and cleanup of background jobs.
///
/// Cloning is cheap; clones share the same engine.
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: JobsConfig,
    clock: Arc<dyn Clock>,
    registry: HandlerRegistry,
    store: Arc<JobStore>,
    queue: JobQueue,
    pool: WorkerPool,
    retries: RetryScheduler,
    shutdown: CancellationToken,
    accepting: AtomicBool,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl JobManager {
    /// Create a manager using the system clock.
    ///
    /// Fails with `InvalidConfiguration` if `config` cannot run jobs (no
    /// workers, zero intervals or timeouts).
    pub fn new(config: JobsConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a manager with an explicit time source.
    pub fn with_clock(config: JobsConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let pool = WorkerPool::new(config.max_workers);

        Ok(Self {
            inner: Arc::new(ManagerInner {
                config,
                clock,
                registry: HandlerRegistry::new(),
                store: Arc::new(JobStore::new()),
                queue: JobQueue::new(),
                pool,
                retries: RetryScheduler::new(),
                shutdown: CancellationToken::new(),
                accepting: AtomicBool::new(true),
                started: AtomicBool::new(false),
                tasks: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Spawn the dispatcher and sweeper. Must be called from inside a tokio runtime.
    ///
    /// Calling it more than once has no effect.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let dispatcher = tokio::spawn(dispatch_loop(self.inner.clone()));
        let sweeper = spawn_sweeper(
            self.inner.store.clone(),
            self.inner.clock.clone(),
            self.inner.config.cleanup_interval,
            self.inner.shutdown.child_token(),
        );
        self.inner.tasks.lock().extend([dispatcher, sweeper]);

        tracing::info!(
            max_workers = self.inner.config.max_workers,
            cleanup_interval_secs = self.inner.config.cleanup_interval.as_secs(),
            "Job manager started"
        );
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Handler registration
    // ─────────────────────────────────────────────────────────────────────────

    /// Register the handler factory for a job type, replacing any previous one.
    pub fn register_handler<F, H>(&self, job_type: impl Into<String>, factory: F)
    where
        F: Fn() -> H + Send + Sync + 'static,
        H: JobHandler + 'static,
    {
        self.inner.registry.register(job_type, factory);
    }

    /// Job types with a registered handler.
    pub fn registered_job_types(&self) -> Vec<String> {
        self.inner.registry.job_types()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Submission & lookup
    // ─────────────────────────────────────────────────────────────────────────

    /// Submit a job and return its id immediately.
    pub fn create_job(
        &self,
        job_type: impl Into<String>,
        account_id: AccountId,
        parameters: JobParameters,
        priority: JobPriority,
        max_retries: u32,
        timeout_seconds: u64,
    ) -> Result<JobId> {
        self.create_job_with(
            JobRequest::new(job_type, account_id)
                .with_parameters(parameters)
                .with_priority(priority)
                .with_max_retries(max_retries)
                .with_timeout(timeout_seconds),
        )
    }

    /// Submit a job described by a request, filling unset bounds from config.
    pub fn create_job_with(&self, request: JobRequest) -> Result<JobId> {
        let inner = &self.inner;

        if !inner.accepting.load(Ordering::SeqCst) {
            return Err(BackofficeError::shutting_down());
        }
        if !inner.registry.contains(&request.job_type) {
            return Err(BackofficeError::handler_not_registered(request.job_type));
        }

        let max_retries = request
            .max_retries
            .unwrap_or(inner.config.default_max_retries);
        let timeout_seconds = request
            .timeout_seconds
            .unwrap_or(inner.config.default_timeout.as_secs());
        if timeout_seconds == 0 {
            return Err(BackofficeError::validation(
                "timeout_seconds must be greater than zero",
            ));
        }

        let id = JobId::new();
        let job = Job::new(id, request, max_retries, timeout_seconds, inner.clock.now());
        let job_type = job.job_type.clone();
        let account_id = job.account_id;
        let priority = job.priority;

        if !inner.store.insert(job) {
            return Err(BackofficeError::internal(format!("duplicate job id {}", id)));
        }
        if let Err(e) = inner.queue.push(id, priority) {
            inner.store.evict_where(|job| job.id == id);
            return Err(e);
        }

        metrics::counter!("backoffice_jobs_created_total", "job_type" => job_type.clone())
            .increment(1);
        tracing::info!(
            job_id = %id,
            job_type = %job_type,
            account_id,
            priority = %priority,
            "Job queued"
        );

        Ok(id)
    }

    /// Snapshot of a job.
    pub fn get_job(&self, job_id: &JobId) -> Option<Job> {
        self.inner.store.get(job_id)
    }

    /// Jobs for an account, newest first, optionally filtered by status.
    pub fn get_jobs_by_account(&self, account_id: AccountId, status: Option<JobStatus>) -> Vec<Job> {
        self.inner.store.jobs_for_account(account_id, status)
    }

    /// Cancel a queued or running job.
    ///
    /// Queued jobs are cancelled outright. Running jobs are signalled and
    /// their execution task is aborted at its next suspension point; a
    /// handler that never yields may keep running after this returns `true`.
    /// Returns `false` for retrying, terminal and unknown jobs.
    pub fn cancel_job(&self, job_id: &JobId) -> bool {
        let inner = &self.inner;
        let now = inner.clock.now();

        let previous = inner
            .store
            .update(job_id, |job| {
                if job.status.is_cancellable() {
                    let previous = job.status;
                    job.mark_cancelled(now);
                    Some((previous, job.job_type.clone()))
                } else {
                    None
                }
            })
            .flatten();

        let Some((previous, job_type)) = previous else {
            return false;
        };

        match previous {
            JobStatus::Queued => {
                inner.queue.remove(job_id);
            }
            _ => {
                inner.pool.cancel(job_id);
            }
        }

        metrics::counter!("backoffice_jobs_cancelled_total", "job_type" => job_type.clone())
            .increment(1);
        tracing::info!(
            job_id = %job_id,
            job_type = %job_type,
            previous_status = %previous,
            "Job cancelled"
        );
        true
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Introspection & maintenance
    // ─────────────────────────────────────────────────────────────────────────

    /// Summary of the last 24 hours.
    pub fn get_job_stats(&self) -> JobStats {
        let jobs = self.inner.store.snapshot();
        JobStats::compute_or_default(&jobs, self.inner.clock.now())
    }

    /// Run one cleanup pass now. Returns the number of evicted jobs.
    pub fn sweep_now(&self) -> usize {
        sweep_guarded(&self.inner.store, self.inner.clock.as_ref())
    }

    pub fn pool_stats(&self) -> PoolSnapshot {
        self.inner.pool.snapshot()
    }

    /// Number of stored jobs currently in `status`.
    pub fn count_jobs(&self, status: JobStatus) -> usize {
        self.inner.store.count_with_status(status)
    }

    pub fn queue_depth(&self) -> usize {
        self.inner.queue.len()
    }

    /// Number of retries waiting out their backoff.
    pub fn pending_retries(&self) -> usize {
        self.inner.retries.pending()
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &JobsConfig {
        &self.inner.config
    }

    /// Stop accepting work, cancel running jobs and pending retries, and wait
    /// for worker slots to be released, bounded by `shutdown_timeout`.
    pub async fn shutdown(&self) -> Result<()> {
        let inner = &self.inner;
        if !inner.accepting.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        tracing::info!(
            running = inner.pool.running_count(),
            queued = inner.queue.len(),
            "Shutting down job manager"
        );

        inner.shutdown.cancel();
        let cancelled = inner.pool.cancel_all();
        inner.retries.shutdown();
        inner.queue.close();

        let tasks: Vec<JoinHandle<()>> = inner.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }

        let drained = inner.pool.drain(inner.config.shutdown_timeout).await;
        match &drained {
            Ok(()) => tracing::info!(cancelled, "Job manager stopped"),
            Err(e) => tracing::warn!(cancelled, error = %e, "Job manager stopped with work still running"),
        }
        drained
    }
}

impl fmt::Debug for JobManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobManager")
            .field("config", &self.inner.config)
            .field("registry", &self.inner.registry)
            .field("jobs", &self.inner.store.len())
            .field("queued", &self.inner.queue.len())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Dispatch
// ═══════════════════════════════════════════════════════════════════════════════

async fn dispatch_loop(inner: Arc<ManagerInner>) {
    tracing::debug!("Job dispatcher started");

    loop {
        let permit = tokio::select! {
            permit = inner.pool.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = inner.shutdown.cancelled() => break,
        };

        let entry = tokio::select! {
            entry = inner.queue.pop() => match entry {
                Some(entry) => entry,
                None => break,
            },
            _ = inner.shutdown.cancelled() => break,
        };

        inner.dispatch(entry.id, permit);
    }

    tracing::debug!("Job dispatcher stopped");
}

impl ManagerInner {
    fn dispatch(self: &Arc<Self>, job_id: JobId, permit: OwnedSemaphorePermit) {
        let token = self.shutdown.child_token();
        self.pool.track(job_id, token.clone());

        // Cancelled or vanished while waiting in the queue
        let Some(job) = self.store.begin_execution(&job_id, self.clock.now()) else {
            self.pool.untrack(&job_id);
            return;
        };

        let handler = match self.registry.create(&job.job_type) {
            Ok(handler) => handler,
            Err(failure) => {
                self.pool.untrack(&job_id);
                self.fail(&job, &failure.to_string());
                return;
            }
        };

        let inner = self.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let ctx = JobContext::new(&job, inner.store.clone(), token.clone());

            tracing::info!(
                job_id = %job.id,
                job_type = %job.job_type,
                account_id = job.account_id,
                attempt = job.attempt(),
                "Job started"
            );

            let outcome = inner.pool.run(&job, handler.clone(), ctx, token).await;
            inner.finish(&job, handler.as_ref(), outcome);
        });
    }

    /// Apply the outcome of one attempt. Results for jobs that are no longer
    /// Running are discarded.
    fn finish(
        self: &Arc<Self>,
        job: &Job,
        handler: &dyn JobHandler,
        outcome: std::result::Result<JobResult, JobFailure>,
    ) {
        let now = self.clock.now();

        let failure = match outcome {
            Ok(result) => {
                let applied = self.update_if_running(&job.id, |stored| {
                    stored.mark_completed(result, now);
                });
                if applied {
                    metrics::counter!("backoffice_jobs_completed_total", "job_type" => job.job_type.clone())
                        .increment(1);
                    let duration_ms = self
                        .store
                        .get(&job.id)
                        .and_then(|stored| stored.duration())
                        .map(|d| d.num_milliseconds());
                    tracing::info!(
                        job_id = %job.id,
                        job_type = %job.job_type,
                        account_id = job.account_id,
                        attempt = job.attempt(),
                        duration_ms,
                        "Job completed"
                    );
                } else {
                    tracing::debug!(job_id = %job.id, "Discarding result for job no longer running");
                }
                return;
            }
            Err(failure) => failure,
        };

        if failure == JobFailure::Cancelled {
            let applied = self.update_if_running(&job.id, |stored| stored.mark_cancelled(now));
            if applied {
                metrics::counter!("backoffice_jobs_cancelled_total", "job_type" => job.job_type.clone())
                    .increment(1);
                tracing::info!(job_id = %job.id, job_type = %job.job_type, "Job cancelled while running");
            }
            return;
        }

        if matches!(failure, JobFailure::TimedOut { .. }) {
            metrics::counter!("backoffice_jobs_timed_out_total", "job_type" => job.job_type.clone())
                .increment(1);
        }

        let Some(current) = self.store.get(&job.id) else {
            return;
        };
        if current.status != JobStatus::Running {
            tracing::debug!(job_id = %job.id, status = %current.status, "Discarding failure for job no longer running");
            return;
        }

        let mut message = failure.to_string();
        let retry = current.has_retries_left()
            && match catch_unwind(AssertUnwindSafe(|| handler.should_retry(&current, &failure))) {
                Ok(retry) => retry,
                Err(payload) => {
                    let panic = panic_message(payload);
                    tracing::error!(
                        job_id = %job.id,
                        job_type = %job.job_type,
                        panic = %panic,
                        "Retry policy panicked, failing job"
                    );
                    message = format!("{}; retry policy panicked: {}", message, panic);
                    false
                }
            };

        if retry {
            let retry_count = self
                .store
                .update(&job.id, |stored| {
                    (stored.status == JobStatus::Running).then(|| {
                        stored.mark_retrying(&message);
                        stored.retry_count
                    })
                })
                .flatten();
            let Some(retry_count) = retry_count else {
                return;
            };

            let delay = backoff_delay(retry_count);
            metrics::counter!("backoffice_jobs_retried_total", "job_type" => job.job_type.clone())
                .increment(1);
            tracing::warn!(
                job_id = %job.id,
                job_type = %job.job_type,
                account_id = job.account_id,
                attempt = job.attempt(),
                error_code = %failure.code(),
                error = %message,
                retry_count,
                delay_secs = delay.as_secs(),
                "Job failed, retry scheduled"
            );

            let weak = Arc::downgrade(self);
            let job_id = job.id;
            self.retries
                .schedule(job_id, delay, move || requeue(&weak, job_id));
        } else {
            self.fail(&current, &message);
            tracing::warn!(
                job_id = %job.id,
                error_code = %failure.code(),
                kind = failure.label(),
                "Job will not be retried"
            );
        }
    }

    /// Terminally fail a job that is still running.
    fn fail(&self, job: &Job, message: &str) {
        let now = self.clock.now();
        let applied = self.update_if_running(&job.id, |stored| stored.mark_failed(message, now));
        if applied {
            metrics::counter!("backoffice_jobs_failed_total", "job_type" => job.job_type.clone())
                .increment(1);
            tracing::error!(
                job_id = %job.id,
                job_type = %job.job_type,
                account_id = job.account_id,
                attempt = job.attempt(),
                error = %message,
                "Job failed"
            );
        }
    }

    fn update_if_running<F>(&self, job_id: &JobId, f: F) -> bool
    where
        F: FnOnce(&mut Job),
    {
        self.store
            .update(job_id, |stored| {
                if stored.status == JobStatus::Running {
                    f(stored);
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false)
    }
}

/// Move a retrying job back to the queue once its backoff has elapsed.
fn requeue(inner: &Weak<ManagerInner>, job_id: JobId) -> Result<()> {
    let inner = inner
        .upgrade()
        .ok_or_else(BackofficeError::shutting_down)?;

    let priority = inner
        .store
        .update(&job_id, |job| {
            (job.status == JobStatus::Retrying).then(|| {
                job.mark_requeued();
                job.priority
            })
        })
        .ok_or_else(|| BackofficeError::job_not_found(job_id))?;

    // No longer retrying; nothing to do.
    let Some(priority) = priority else {
        return Ok(());
    };

    if let Err(e) = inner.queue.push(job_id, priority) {
        let now = inner.clock.now();
        let message = format!("failed to re-queue after backoff: {}", e.user_message());
        let failed = inner
            .store
            .update(&job_id, |job| {
                if job.status == JobStatus::Queued {
                    job.mark_failed(&message, now);
                    Some(job.job_type.clone())
                } else {
                    None
                }
            })
            .flatten();
        if let Some(job_type) = failed {
            metrics::counter!("backoffice_jobs_failed_total", "job_type" => job_type).increment(1);
        }
        return Err(e);
    }

    tracing::info!(job_id = %job_id, "Job re-queued after backoff");
    Ok(())
}
