//! Pending queue with priority ordering.
//!
//! The queue holds job ids only; the record itself lives in the store.
//! Entries are ordered by priority, then by submission sequence, so equal
//! priorities dispatch in FIFO order.

use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use tokio::sync::Notify;

use super::job::{JobId, JobPriority};
use crate::error::{BackofficeError, Result};

/// A job waiting for dispatch.
#[derive(Debug, Clone, Copy)]
pub struct QueuedJob {
    pub id: JobId,
    pub priority: JobPriority,
    seq: u64,
}

impl Eq for QueuedJob {}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Unbounded priority queue of job ids awaiting a worker.
#[derive(Debug, Default)]
pub struct JobQueue {
    heap: Mutex<BinaryHeap<QueuedJob>>,
    next_seq: AtomicU64,
    notify: Notify,
    closed: AtomicBool,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a job id. Fails once the queue is closed.
    pub fn push(&self, id: JobId, priority: JobPriority) -> Result<()> {
        if self.is_closed() {
            return Err(BackofficeError::shutting_down());
        }
        let seq = self.next_seq.fetch_add(1, AtomicOrdering::Relaxed);
        let depth = {
            let mut heap = self.heap.lock();
            heap.push(QueuedJob { id, priority, seq });
            heap.len()
        };
        metrics::gauge!("backoffice_jobs_queue_depth").set(depth as f64);
        self.notify.notify_one();
        Ok(())
    }

    /// Take the highest-priority job without waiting.
    pub fn try_pop(&self) -> Option<QueuedJob> {
        let (entry, depth) = {
            let mut heap = self.heap.lock();
            let entry = heap.pop();
            (entry, heap.len())
        };
        if entry.is_some() {
            metrics::gauge!("backoffice_jobs_queue_depth").set(depth as f64);
        }
        entry
    }

    /// Wait for the highest-priority job. Returns `None` once the queue is closed.
    pub async fn pop(&self) -> Option<QueuedJob> {
        loop {
            // Register interest before checking so a concurrent push is not missed.
            let notified = self.notify.notified();
            if self.is_closed() {
                return None;
            }
            if let Some(entry) = self.try_pop() {
                return Some(entry);
            }
            notified.await;
        }
    }

    /// Drop a job id from the queue. Returns `true` if it was waiting.
    pub fn remove(&self, id: &JobId) -> bool {
        let mut heap = self.heap.lock();
        let before = heap.len();
        heap.retain(|entry| entry.id != *id);
        let removed = heap.len() != before;
        if removed {
            metrics::gauge!("backoffice_jobs_queue_depth").set(heap.len() as f64);
        }
        removed
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.heap.lock().iter().any(|entry| entry.id == *id)
    }

    /// Stop accepting work and wake every waiter.
    pub fn close(&self) {
        self.closed.store(true, AtomicOrdering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(AtomicOrdering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_priority_then_fifo() {
        let queue = JobQueue::new();
        let low = JobId::new();
        let normal_a = JobId::new();
        let normal_b = JobId::new();
        let critical = JobId::new();

        queue.push(low, JobPriority::Low).unwrap();
        queue.push(normal_a, JobPriority::Normal).unwrap();
        queue.push(critical, JobPriority::Critical).unwrap();
        queue.push(normal_b, JobPriority::Normal).unwrap();

        let order: Vec<JobId> = std::iter::from_fn(|| queue.try_pop().map(|e| e.id)).collect();
        assert_eq!(order, vec![critical, normal_a, normal_b, low]);
    }

    #[test]
    fn test_remove() {
        let queue = JobQueue::new();
        let a = JobId::new();
        let b = JobId::new();
        queue.push(a, JobPriority::Normal).unwrap();
        queue.push(b, JobPriority::Normal).unwrap();

        assert!(queue.remove(&a));
        assert!(!queue.remove(&a));
        assert!(!queue.contains(&a));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.try_pop().unwrap().id, b);
    }

    #[test]
    fn test_push_after_close_fails() {
        let queue = JobQueue::new();
        queue.close();
        let err = queue.push(JobId::new(), JobPriority::High).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::ServiceUnavailable);
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = Arc::new(JobQueue::new());
        let id = JobId::new();

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.push(id, JobPriority::Normal).unwrap();

        let entry = waiter.await.unwrap().unwrap();
        assert_eq!(entry.id, id);
    }

    #[tokio::test]
    async fn test_close_wakes_waiters() {
        let queue = Arc::new(JobQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();
        assert!(waiter.await.unwrap().is_none());
    }
}
