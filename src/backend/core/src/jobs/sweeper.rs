//! Periodic eviction of old terminal jobs.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::clock::Clock;
use super::job::{Job, JobStatus};
use super::store::JobStore;

/// How long a completed job stays visible, in hours.
pub const COMPLETED_RETENTION_HOURS: i64 = 24;

/// How long a failed or cancelled job stays visible, in hours.
pub const FAILED_RETENTION_HOURS: i64 = 168;

/// Retention for a job in the given status; `None` for non-terminal statuses.
pub fn retention_for(status: JobStatus) -> Option<chrono::Duration> {
    match status {
        JobStatus::Completed => Some(chrono::Duration::hours(COMPLETED_RETENTION_HOURS)),
        JobStatus::Failed | JobStatus::Cancelled => {
            Some(chrono::Duration::hours(FAILED_RETENTION_HOURS))
        }
        JobStatus::Queued | JobStatus::Running | JobStatus::Retrying => None,
    }
}

/// Whether a job has outlived its retention at `now`.
pub fn is_expired(job: &Job, now: DateTime<Utc>) -> bool {
    match (retention_for(job.status), job.completed_at) {
        (Some(retention), Some(completed_at)) => now - completed_at > retention,
        _ => false,
    }
}

/// Run one sweep over the store. Returns the number of evicted jobs.
pub fn sweep_once(store: &JobStore, now: DateTime<Utc>) -> usize {
    let evicted = store.evict_where(|job| is_expired(job, now));
    if !evicted.is_empty() {
        metrics::counter!("backoffice_jobs_swept_total").increment(evicted.len() as u64);
        tracing::info!(evicted = evicted.len(), "Swept expired jobs");
    }
    evicted.len()
}

/// Run one sweep, containing any panic raised while scanning.
pub fn sweep_guarded(store: &JobStore, clock: &dyn Clock) -> usize {
    match catch_unwind(AssertUnwindSafe(|| sweep_once(store, clock.now()))) {
        Ok(evicted) => evicted,
        Err(_) => {
            tracing::error!("Job sweep panicked; will retry on next interval");
            0
        }
    }
}

/// Spawn the periodic sweep loop. It runs until `shutdown` is cancelled.
pub fn spawn_sweeper(
    store: Arc<JobStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so the first sweep
        // happens one interval after startup.
        ticker.tick().await;

        tracing::info!(interval_secs = interval.as_secs(), "Job sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    sweep_guarded(&store, clock.as_ref());
                }
                _ = shutdown.cancelled() => break,
            }
        }

        tracing::info!("Job sweeper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::clock::ManualClock;
    use crate::jobs::job::{JobId, JobRequest, JobResult};
    use chrono::Duration as ChronoDuration;

    fn finished(status: JobStatus, completed_at: DateTime<Utc>) -> Job {
        let mut job = Job::new(
            JobId::new(),
            JobRequest::new("echo", 3),
            0,
            300,
            completed_at - ChronoDuration::minutes(1),
        );
        match status {
            JobStatus::Completed => job.mark_completed(JobResult::success(), completed_at),
            JobStatus::Failed => job.mark_failed("boom", completed_at),
            JobStatus::Cancelled => job.mark_cancelled(completed_at),
            other => job.status = other,
        }
        job
    }

    #[test]
    fn test_retention_boundaries() {
        let now = Utc::now();
        let store = JobStore::new();

        let old_completed = finished(JobStatus::Completed, now - ChronoDuration::hours(25));
        let fresh_completed = finished(JobStatus::Completed, now - ChronoDuration::hours(23));
        let old_failed = finished(JobStatus::Failed, now - ChronoDuration::hours(169));
        let fresh_failed = finished(JobStatus::Failed, now - ChronoDuration::hours(167));
        let old_cancelled = finished(JobStatus::Cancelled, now - ChronoDuration::hours(169));

        for job in [&old_completed, &fresh_completed, &old_failed, &fresh_failed, &old_cancelled] {
            store.insert(job.clone());
        }

        assert_eq!(sweep_once(&store, now), 3);
        assert!(store.get(&old_completed.id).is_none());
        assert!(store.get(&old_failed.id).is_none());
        assert!(store.get(&old_cancelled.id).is_none());
        assert!(store.get(&fresh_completed.id).is_some());
        assert!(store.get(&fresh_failed.id).is_some());

        let remaining = store.jobs_for_account(3, None);
        assert_eq!(remaining.len(), 2);
    }

    #[test]
    fn test_non_terminal_jobs_are_kept() {
        let now = Utc::now();
        let store = JobStore::new();

        // Non-terminal status with a stale timestamp is still never evicted
        let mut retrying = finished(JobStatus::Retrying, now);
        retrying.completed_at = Some(now - ChronoDuration::days(30));
        store.insert(retrying);

        let mut queued = finished(JobStatus::Queued, now);
        queued.created_at = now - ChronoDuration::days(30);
        store.insert(queued);

        assert_eq!(sweep_once(&store, now), 0);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_sweep_guarded_uses_clock() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        let store = JobStore::new();
        store.insert(finished(JobStatus::Completed, start));

        assert_eq!(sweep_guarded(&store, &clock), 0);
        clock.advance(ChronoDuration::hours(24) + ChronoDuration::seconds(1));
        assert_eq!(sweep_guarded(&store, &clock), 1);
        assert!(store.is_empty());
    }

    /// Panics on its first reading, then behaves like a fixed clock.
    struct FlakyClock {
        now: DateTime<Utc>,
        readings: std::sync::atomic::AtomicU32,
    }

    impl Clock for FlakyClock {
        fn now(&self) -> DateTime<Utc> {
            if self.readings.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                panic!("clock source unavailable");
            }
            self.now
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_loop_survives_panicking_pass() {
        let now = Utc::now();
        let clock = Arc::new(FlakyClock {
            now,
            readings: std::sync::atomic::AtomicU32::new(0),
        });
        let store = Arc::new(JobStore::new());
        store.insert(finished(JobStatus::Failed, now - ChronoDuration::hours(200)));

        let shutdown = CancellationToken::new();
        let handle = spawn_sweeper(
            store.clone(),
            clock.clone(),
            Duration::from_secs(60),
            shutdown.clone(),
        );

        // First pass panics and evicts nothing
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(store.len(), 1);
        assert!(!handle.is_finished());

        // The loop is still alive and the next pass evicts
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(store.is_empty());

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_loop_runs_and_stops() {
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let store = Arc::new(JobStore::new());
        store.insert(finished(JobStatus::Completed, start - ChronoDuration::hours(48)));

        let shutdown = CancellationToken::new();
        let handle = spawn_sweeper(
            store.clone(),
            clock.clone(),
            Duration::from_secs(3600),
            shutdown.clone(),
        );

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(store.len(), 1);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(store.is_empty());

        shutdown.cancel();
        handle.await.unwrap();
    }
}
