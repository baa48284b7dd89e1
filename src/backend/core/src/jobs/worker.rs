//! Worker pool for bounded concurrent job execution.
//!
//! The `WorkerPool` provides:
//! - A fixed number of execution slots backed by a tokio Semaphore
//! - Per-attempt timeout enforcement
//! - Cooperative cancellation of running attempts
//! - Pool statistics for the health endpoint

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use super::handler::{panic_message, JobContext, JobFailure, JobHandler};
use super::job::{Job, JobId, JobResult};
use crate::error::{BackofficeError, ErrorCode, Result};

/// Statistics for the worker pool.
#[derive(Debug, Clone, Default)]
pub struct WorkerStats {
    /// Total attempts processed
    pub processed: Arc<AtomicU64>,
    /// Attempts that returned a result
    pub succeeded: Arc<AtomicU64>,
    /// Attempts that failed, timed out or were cancelled
    pub failed: Arc<AtomicU64>,
    /// Currently running attempts
    pub active: Arc<AtomicU64>,
}

impl WorkerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }
}

/// Point-in-time view of the pool, as exposed by `/health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub max_workers: usize,
    pub available_slots: usize,
    pub active: u64,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
}

/// Bounded set of execution slots.
pub struct WorkerPool {
    max_workers: usize,
    semaphore: Arc<Semaphore>,
    running: DashMap<JobId, CancellationToken>,
    stats: WorkerStats,
}

impl WorkerPool {
    /// Create a pool with `max_workers` slots.
    pub fn new(max_workers: usize) -> Self {
        tracing::info!(max_workers, "Worker pool created");

        Self {
            max_workers,
            semaphore: Arc::new(Semaphore::new(max_workers)),
            running: DashMap::new(),
            stats: WorkerStats::new(),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            max_workers: self.max_workers,
            available_slots: self.available_permits(),
            active: self.stats.active(),
            processed: self.stats.processed(),
            succeeded: self.stats.succeeded(),
            failed: self.stats.failed(),
        }
    }

    /// Wait for a free slot. The slot is released when the permit drops.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        Ok(self.semaphore.clone().acquire_owned().await?)
    }

    /// Register the cancellation token of a job about to run.
    pub fn track(&self, job_id: JobId, token: CancellationToken) {
        self.running.insert(job_id, token);
    }

    pub fn untrack(&self, job_id: &JobId) {
        self.running.remove(job_id);
    }

    /// Signal a running job to stop. Returns `false` if it is not running here.
    pub fn cancel(&self, job_id: &JobId) -> bool {
        match self.running.get(job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Signal every running job to stop.
    pub fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        for entry in self.running.iter() {
            entry.value().cancel();
            cancelled += 1;
        }
        cancelled
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Execute one attempt of `job` in its own task under the job's timeout.
    ///
    /// The handler task is aborted when the timeout fires or the token is
    /// cancelled. Abort only takes effect at the handler's next suspension
    /// point, so a handler that never yields keeps running detached.
    pub async fn run(
        &self,
        job: &Job,
        handler: Arc<dyn JobHandler>,
        ctx: JobContext,
        token: CancellationToken,
    ) -> std::result::Result<JobResult, JobFailure> {
        let timeout = job.timeout();
        let started = Instant::now();

        let active = self.stats.active.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::gauge!("backoffice_jobs_running").set(active as f64);

        let task_job = job.clone();
        let mut task = tokio::spawn(async move { handler.execute(&task_job, &ctx).await });

        let outcome = tokio::select! {
            joined = &mut task => match joined {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err(JobFailure::recoverable(format!(
                    "handler panicked: {}",
                    panic_message(e.into_panic())
                ))),
                Err(_) => Err(JobFailure::Cancelled),
            },
            _ = tokio::time::sleep(timeout) => {
                token.cancel();
                task.abort();
                Err(JobFailure::TimedOut { after: timeout })
            }
            _ = token.cancelled() => {
                task.abort();
                Err(JobFailure::Cancelled)
            }
        };

        self.untrack(&job.id);
        self.stats.processed.fetch_add(1, Ordering::Relaxed);
        if outcome.is_ok() {
            self.stats.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
        }
        let active = self.stats.active.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        metrics::gauge!("backoffice_jobs_running").set(active as f64);
        metrics::histogram!(
            "backoffice_job_duration_seconds",
            "job_type" => job.job_type.clone(),
        )
        .record(started.elapsed().as_secs_f64());

        outcome
    }

    /// Wait until every slot is free, then close the pool.
    pub async fn drain(&self, timeout: Duration) -> Result<()> {
        let permits = u32::try_from(self.max_workers).unwrap_or(u32::MAX);
        let drained = tokio::time::timeout(timeout, self.semaphore.acquire_many(permits)).await;
        self.semaphore.close();

        match drained {
            Ok(Ok(_all)) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(BackofficeError::with_internal(
                ErrorCode::ServiceUnavailable,
                "Timed out waiting for running jobs",
                format!(
                    "{} job(s) still running after {:?}",
                    self.stats.active(),
                    timeout
                ),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::job::JobRequest;
    use crate::jobs::store::JobStore;
    use async_trait::async_trait;
    use chrono::Utc;

    struct Sleepy(Duration);

    #[async_trait]
    impl JobHandler for Sleepy {
        async fn execute(&self, _job: &Job, _ctx: &JobContext) -> std::result::Result<JobResult, JobFailure> {
            tokio::time::sleep(self.0).await;
            Ok(JobResult::success())
        }
    }

    struct Panicky;

    #[async_trait]
    impl JobHandler for Panicky {
        async fn execute(&self, _job: &Job, _ctx: &JobContext) -> std::result::Result<JobResult, JobFailure> {
            panic!("row parser blew up");
        }
    }

    fn job(timeout_seconds: u64) -> Job {
        Job::new(
            JobId::new(),
            JobRequest::new("test", 1),
            0,
            timeout_seconds,
            Utc::now(),
        )
    }

    async fn run(pool: &WorkerPool, job: &Job, handler: Arc<dyn JobHandler>, token: CancellationToken) -> std::result::Result<JobResult, JobFailure> {
        let ctx = JobContext::new(job, Arc::new(JobStore::new()), token.clone());
        pool.track(job.id, token.clone());
        pool.run(job, handler, ctx, token).await
    }

    #[test]
    fn test_worker_stats() {
        let stats = WorkerStats::new();
        assert_eq!(stats.processed(), 0);
        assert_eq!(stats.active(), 0);

        stats.processed.fetch_add(1, Ordering::Relaxed);
        assert_eq!(stats.processed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_success() {
        let pool = WorkerPool::new(2);
        let job = job(10);
        let result = run(&pool, &job, Arc::new(Sleepy(Duration::from_secs(1))), CancellationToken::new()).await;

        assert_eq!(result, Ok(JobResult::success()));
        assert_eq!(pool.stats().succeeded(), 1);
        assert_eq!(pool.stats().active(), 0);
        assert_eq!(pool.running_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_times_out() {
        let pool = WorkerPool::new(1);
        let job = job(2);
        let token = CancellationToken::new();
        let result = run(&pool, &job, Arc::new(Sleepy(Duration::from_secs(60))), token.clone()).await;

        assert_eq!(result, Err(JobFailure::TimedOut { after: Duration::from_secs(2) }));
        assert!(token.is_cancelled());
        assert_eq!(pool.stats().failed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_cancelled() {
        let pool = Arc::new(WorkerPool::new(1));
        let job = job(600);
        let token = CancellationToken::new();

        let handle = {
            let pool = pool.clone();
            let job = job.clone();
            let token = token.clone();
            tokio::spawn(async move {
                run(&pool, &job, Arc::new(Sleepy(Duration::from_secs(60))), token).await
            })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(pool.cancel(&job.id));
        assert_eq!(handle.await.unwrap(), Err(JobFailure::Cancelled));
        assert!(!pool.cancel(&job.id));
    }

    #[tokio::test]
    async fn test_panic_is_recoverable() {
        let pool = WorkerPool::new(1);
        let job = job(10);
        let result = run(&pool, &job, Arc::new(Panicky), CancellationToken::new()).await;

        match result {
            Err(JobFailure::Recoverable { message }) => {
                assert!(message.contains("row parser blew up"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_drain_waits_for_permits() {
        let pool = WorkerPool::new(2);
        let permit = pool.acquire().await.unwrap();
        assert_eq!(pool.available_permits(), 1);

        let err = pool.drain(Duration::from_millis(20)).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ServiceUnavailable);
        drop(permit);

        // Closed after drain
        assert!(pool.acquire().await.is_err());
    }
}
