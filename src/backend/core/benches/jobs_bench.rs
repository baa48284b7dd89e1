//! Benchmarks for the job engine
//!
//! Run with: cargo bench

use async_trait::async_trait;
use backoffice_core::config::JobsConfig;
use backoffice_core::jobs::{
    Job, JobContext, JobFailure, JobHandler, JobId, JobManager, JobPriority, JobQueue, JobRequest,
    JobResult, JobStatus,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;

struct Noop;

#[async_trait]
impl JobHandler for Noop {
    async fn execute(&self, _job: &Job, _ctx: &JobContext) -> Result<JobResult, JobFailure> {
        Ok(JobResult::success())
    }
}

fn manager(max_workers: usize) -> JobManager {
    let manager = JobManager::new(JobsConfig::default().with_max_workers(max_workers))
        .expect("valid jobs config");
    manager.register_handler("noop", || Noop);
    manager
}

/// Benchmark job submission into an idle engine.
fn bench_submission(c: &mut Criterion) {
    let mut group = c.benchmark_group("job_submission");

    for batch in [100usize, 1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), batch, |b, &count| {
            b.iter(|| {
                let manager = manager(4);
                for i in 0..count {
                    let request = JobRequest::new("noop", (i % 50) as i64)
                        .with_parameter("sku", format!("SKU-{}", i));
                    black_box(manager.create_job_with(request).ok());
                }
                manager
            });
        });
    }
    group.finish();
}

/// Benchmark priority queue push/pop.
fn bench_queue(c: &mut Criterion) {
    let priorities = [
        JobPriority::Low,
        JobPriority::Normal,
        JobPriority::High,
        JobPriority::Critical,
    ];

    c.bench_function("queue_push_pop_1000", |b| {
        b.iter(|| {
            let queue = JobQueue::new();
            for i in 0..1_000 {
                let _ = queue.push(JobId::new(), priorities[i % priorities.len()]);
            }
            while let Some(entry) = queue.try_pop() {
                black_box(entry);
            }
        });
    });
}

/// Benchmark submit-to-completion for a batch of no-op jobs.
fn bench_end_to_end(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();

    let mut group = c.benchmark_group("job_end_to_end");
    group.sample_size(20);

    for workers in [1usize, 4, 16].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(workers), workers, |b, &workers| {
            b.to_async(&runtime).iter(|| async move {
                let manager = manager(workers);
                manager.start();

                let ids: Vec<JobId> = (0..200)
                    .filter_map(|i| manager.create_job_with(JobRequest::new("noop", i)).ok())
                    .collect();

                for id in &ids {
                    while manager.get_job(id).map(|job| job.status) != Some(JobStatus::Completed) {
                        tokio::time::sleep(Duration::from_micros(50)).await;
                    }
                }

                let _ = manager.shutdown().await;
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_submission, bench_queue, bench_end_to_end);
criterion_main!(benches);
