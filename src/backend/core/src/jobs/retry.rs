//! Retry backoff and delayed re-queue timers.
//!
//! Backoff is a fixed exponential schedule: `min(300, 2^retry_count)` seconds.
//! A waiting retry runs as its own timer task and never holds a worker slot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::job::JobId;
use crate::error::Result;

/// Upper bound on a single backoff delay, in seconds.
pub const MAX_BACKOFF_SECS: u64 = 300;

/// Delay before re-queueing a job that has been retried `retry_count` times.
pub fn backoff_delay(retry_count: u32) -> Duration {
    let secs = 2u64
        .checked_pow(retry_count)
        .map_or(MAX_BACKOFF_SECS, |secs| secs.min(MAX_BACKOFF_SECS));
    Duration::from_secs(secs)
}

/// Cancellable timers that fire a re-queue callback after a delay.
#[derive(Debug, Default)]
pub struct RetryScheduler {
    timers: Arc<DashMap<JobId, Timer>>,
    generation: AtomicU64,
    shutdown: CancellationToken,
}

/// A pending timer; `generation` tells a replaced timer apart from its successor.
#[derive(Debug)]
struct Timer {
    generation: u64,
    handle: JoinHandle<()>,
}

impl RetryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `on_fire` for `job_id` once `delay` has elapsed.
    ///
    /// Errors returned by `on_fire` are logged. A timer scheduled for a job
    /// that already has one replaces it.
    pub fn schedule<F>(&self, job_id: JobId, delay: Duration, on_fire: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            tracing::warn!(job_id = %job_id, "Retry scheduler stopped, dropping retry");
            return;
        }

        let timers = self.timers.clone();
        let shutdown = self.shutdown.clone();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    if let Err(e) = on_fire() {
                        tracing::error!(
                            job_id = %job_id,
                            error = %e,
                            "Failed to re-queue job after backoff"
                        );
                    }
                }
                _ = shutdown.cancelled() => {
                    tracing::debug!(job_id = %job_id, "Retry timer cancelled by shutdown");
                }
            }
            timers.remove_if(&job_id, |_, timer| timer.generation == generation);
        });

        if let Some(previous) = self.timers.insert(job_id, Timer { generation, handle }) {
            previous.handle.abort();
        }
        // The timer may have finished before it was recorded.
        self.timers.remove_if(&job_id, |_, timer| timer.handle.is_finished());

        tracing::debug!(job_id = %job_id, delay_secs = delay.as_secs(), "Retry scheduled");
    }

    /// Cancel the pending timer for a job. Returns `true` if one was waiting.
    pub fn cancel(&self, job_id: &JobId) -> bool {
        match self.timers.remove(job_id) {
            Some((_, timer)) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every pending timer and refuse new ones.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        for entry in self.timers.iter() {
            entry.value().handle.abort();
        }
        self.timers.clear();
    }

    /// Number of timers still waiting.
    pub fn pending(&self) -> usize {
        self.timers.len()
    }
}
