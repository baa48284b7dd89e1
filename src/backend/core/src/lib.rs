#![allow(clippy::result_large_err)]
//! # Back-office Core
//!
//! In-process background job engine for a multi-tenant e-commerce back-office.
//!
//! ## Architecture
//!
//! - **Jobs**: Handler registry, priority queue, bounded worker pool,
//!   retries with exponential backoff, cancellation, cleanup and stats
//! - **API**: Axum HTTP surface for submitting and inspecting jobs
//! - **Telemetry**: Structured logging, optional OTLP tracing, Prometheus metrics
//! - **Config**: Layered file and environment configuration

pub mod api;
pub mod config;
pub mod error;
pub mod jobs;
pub mod telemetry;

pub use error::{BackofficeError, ErrorCode, ErrorContext, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, JobsConfig};
    pub use crate::error::{
        BackofficeError, ErrorCode, ErrorContext, Result,
    };
    pub use crate::jobs::{
        AccountId, Job, JobContext, JobFailure, JobHandler, JobId, JobManager, JobParameters,
        JobPriority, JobRequest, JobResult, JobStats, JobStatus,
    };
}
