//! In-memory job store with a per-account index.
//!
//! Both maps live behind one `parking_lot::Mutex`, so a job and its index
//! entry are always inserted and evicted together. Every method takes the
//! lock for the duration of a single call and never across an `.await`.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

use super::job::{AccountId, Job, JobId, JobStatus};

#[derive(Debug, Default)]
struct StoreInner {
    jobs: HashMap<JobId, Job>,
    by_account: HashMap<AccountId, Vec<JobId>>,
}

impl StoreInner {
    fn unindex(&mut self, account_id: AccountId, id: JobId) {
        if let Some(ids) = self.by_account.get_mut(&account_id) {
            ids.retain(|existing| *existing != id);
            if ids.is_empty() {
                self.by_account.remove(&account_id);
            }
        }
    }
}

/// Thread-safe map of job id to job record.
#[derive(Debug, Default)]
pub struct JobStore {
    inner: Mutex<StoreInner>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new job and index it under its account.
    ///
    /// Returns `false` without touching anything if the id is already present.
    pub fn insert(&self, job: Job) -> bool {
        let mut inner = self.inner.lock();
        if inner.jobs.contains_key(&job.id) {
            return false;
        }
        inner.by_account.entry(job.account_id).or_default().push(job.id);
        inner.jobs.insert(job.id, job);
        true
    }

    /// Snapshot of a single job.
    pub fn get(&self, id: &JobId) -> Option<Job> {
        self.inner.lock().jobs.get(id).cloned()
    }

    /// Mutate a job in place. Returns `None` if the job does not exist.
    pub fn update<F, R>(&self, id: &JobId, f: F) -> Option<R>
    where
        F: FnOnce(&mut Job) -> R,
    {
        self.inner.lock().jobs.get_mut(id).map(f)
    }

    /// Atomically move a queued job to Running and return a snapshot of it.
    ///
    /// Returns `None` when the job is gone or no longer queued (for example
    /// because it was cancelled while waiting).
    pub fn begin_execution(&self, id: &JobId, now: DateTime<Utc>) -> Option<Job> {
        let mut inner = self.inner.lock();
        let job = inner.jobs.get_mut(id)?;
        if job.status != JobStatus::Queued {
            return None;
        }
        job.mark_running(now);
        Some(job.clone())
    }

    /// Jobs for one account, newest first, optionally filtered by status.
    pub fn jobs_for_account(&self, account_id: AccountId, status: Option<JobStatus>) -> Vec<Job> {
        let inner = self.inner.lock();
        let Some(ids) = inner.by_account.get(&account_id) else {
            return Vec::new();
        };

        let mut jobs: Vec<Job> = ids
            .iter()
            .rev()
            .filter_map(|id| inner.jobs.get(id))
            .filter(|job| status.map_or(true, |s| job.status == s))
            .cloned()
            .collect();
        drop(inner);

        // Stable sort keeps later submissions first among equal timestamps.
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    /// Snapshot of every stored job.
    pub fn snapshot(&self) -> Vec<Job> {
        self.inner.lock().jobs.values().cloned().collect()
    }

    /// Number of stored jobs with the given status.
    pub fn count_with_status(&self, status: JobStatus) -> usize {
        self.inner
            .lock()
            .jobs
            .values()
            .filter(|job| job.status == status)
            .count()
    }

    /// Remove every job matching `predicate` from the store and the account index.
    pub fn evict_where<F>(&self, mut predicate: F) -> Vec<JobId>
    where
        F: FnMut(&Job) -> bool,
    {
        let mut inner = self.inner.lock();
        let doomed: Vec<(JobId, AccountId)> = inner
            .jobs
            .values()
            .filter(|job| predicate(job))
            .map(|job| (job.id, job.account_id))
            .collect();

        for (id, account_id) in &doomed {
            inner.jobs.remove(id);
            inner.unindex(*account_id, *id);
        }

        doomed.into_iter().map(|(id, _)| id).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::job::JobRequest;
    use chrono::Duration;

    fn job_for(account_id: AccountId, created_at: DateTime<Utc>) -> Job {
        Job::new(
            JobId::new(),
            JobRequest::new("echo", account_id),
            3,
            300,
            created_at,
        )
    }

    #[test]
    fn test_insert_and_get() {
        let store = JobStore::new();
        let job = job_for(1, Utc::now());
        let id = job.id;

        assert!(store.insert(job.clone()));
        assert!(!store.insert(job));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&id).unwrap().id, id);
        assert_eq!(store.get(&id).unwrap().status, JobStatus::Queued);
        assert!(store.get(&JobId::new()).is_none());
    }

    #[test]
    fn test_jobs_for_account_newest_first() {
        let store = JobStore::new();
        let now = Utc::now();
        let older = job_for(5, now - Duration::minutes(10));
        let newer = job_for(5, now);
        let other = job_for(6, now);

        store.insert(older.clone());
        store.insert(newer.clone());
        store.insert(other);

        let jobs = store.jobs_for_account(5, None);
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, newer.id);
        assert_eq!(jobs[1].id, older.id);

        assert!(store.jobs_for_account(99, None).is_empty());
    }

    #[test]
    fn test_jobs_for_account_status_filter() {
        let store = JobStore::new();
        let first = job_for(5, Utc::now());
        let second = job_for(5, Utc::now());
        store.insert(first.clone());
        store.insert(second.clone());

        store.update(&first.id, |job| job.mark_cancelled(Utc::now()));

        let cancelled = store.jobs_for_account(5, Some(JobStatus::Cancelled));
        assert_eq!(cancelled.len(), 1);
        assert_eq!(cancelled[0].id, first.id);

        let queued = store.jobs_for_account(5, Some(JobStatus::Queued));
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].id, second.id);
    }

    #[test]
    fn test_begin_execution_only_from_queued() {
        let store = JobStore::new();
        let job = job_for(1, Utc::now());
        let id = job.id;
        store.insert(job);

        let running = store.begin_execution(&id, Utc::now()).unwrap();
        assert_eq!(running.status, JobStatus::Running);
        assert!(running.started_at.is_some());

        // Second dispatch of the same id is refused
        assert!(store.begin_execution(&id, Utc::now()).is_none());
        assert!(store.begin_execution(&JobId::new(), Utc::now()).is_none());
    }

    #[test]
    fn test_evict_removes_index_entries() {
        let store = JobStore::new();
        let keep = job_for(1, Utc::now());
        let drop_me = job_for(2, Utc::now());
        store.insert(keep.clone());
        store.insert(drop_me.clone());

        let evicted = store.evict_where(|job| job.account_id == 2);
        assert_eq!(evicted, vec![drop_me.id]);
        assert_eq!(store.len(), 1);
        assert!(store.jobs_for_account(2, None).is_empty());
        assert_eq!(store.jobs_for_account(1, None).len(), 1);
    }

    #[test]
    fn test_count_with_status() {
        let store = JobStore::new();
        for _ in 0..3 {
            store.insert(job_for(1, Utc::now()));
        }
        assert_eq!(store.count_with_status(JobStatus::Queued), 3);
        assert_eq!(store.count_with_status(JobStatus::Running), 0);
    }
}
