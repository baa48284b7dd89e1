//! Rolling 24 hour job statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::job::{Job, JobStatus};
use crate::error::{BackofficeError, Result};

/// Width of the statistics window, in hours.
pub const STATS_WINDOW_HOURS: i64 = 24;

/// Per job-type counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTypeStats {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Aggregate summary of recent jobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobStats {
    /// Jobs created inside the window
    pub total_jobs: usize,
    /// Window counts per status
    pub by_status: HashMap<JobStatus, usize>,
    /// Window counts per job type
    pub by_type: HashMap<String, JobTypeStats>,
    /// Distinct accounts that created jobs inside the window
    pub active_accounts: usize,
    /// Jobs currently queued, across the whole store
    pub queued: usize,
    /// Jobs currently running, across the whole store
    pub running: usize,
    pub window_hours: i64,
    pub generated_at: Option<DateTime<Utc>>,
}

impl JobStats {
    /// Count for one status (0 when absent).
    pub fn status_count(&self, status: JobStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }

    /// Aggregate `jobs` as seen at `now`.
    pub fn compute<'a, I>(jobs: I, now: DateTime<Utc>) -> Result<Self>
    where
        I: IntoIterator<Item = &'a Job>,
    {
        let window_start = now
            .checked_sub_signed(chrono::Duration::hours(STATS_WINDOW_HOURS))
            .ok_or_else(|| {
                BackofficeError::internal(format!("stats window underflows at {}", now))
            })?;

        let mut stats = JobStats {
            by_status: JobStatus::ALL.iter().map(|s| (*s, 0)).collect(),
            window_hours: STATS_WINDOW_HOURS,
            generated_at: Some(now),
            ..Default::default()
        };
        let mut accounts = HashSet::new();

        for job in jobs {
            match job.status {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Running => stats.running += 1,
                _ => {}
            }

            if job.created_at < window_start {
                continue;
            }

            stats.total_jobs += 1;
            *stats.by_status.entry(job.status).or_insert(0) += 1;
            accounts.insert(job.account_id);

            let per_type = stats.by_type.entry(job.job_type.clone()).or_default();
            per_type.total += 1;
            match job.status {
                JobStatus::Completed => per_type.completed += 1,
                JobStatus::Failed => per_type.failed += 1,
                _ => {}
            }
        }

        stats.active_accounts = accounts.len();
        Ok(stats)
    }

    /// Like [`JobStats::compute`], but logs failures and returns an empty summary.
    pub fn compute_or_default<'a, I>(jobs: I, now: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = &'a Job>,
    {
        Self::compute(jobs, now).unwrap_or_else(|e| {
            e.log();
            tracing::error!(error = %e, "Failed to compute job statistics");
            JobStats {
                window_hours: STATS_WINDOW_HOURS,
                ..Default::default()
            }
        })
    }
}
