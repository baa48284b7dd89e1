//! Prometheus metrics for the job engine and HTTP API.
//!
//! Metrics are emitted through the `metrics` facade from wherever the event
//! happens; this module installs the Prometheus recorder, describes every
//! series, and records per-request HTTP metrics.
//!
//! | Metric | Kind | Labels |
//! |--------|------|--------|
//! | `backoffice_jobs_created_total` | counter | `job_type` |
//! | `backoffice_jobs_completed_total` | counter | `job_type` |
//! | `backoffice_jobs_failed_total` | counter | `job_type` |
//! | `backoffice_jobs_cancelled_total` | counter | `job_type` |
//! | `backoffice_jobs_retried_total` | counter | `job_type` |
//! | `backoffice_jobs_timed_out_total` | counter | `job_type` |
//! | `backoffice_jobs_swept_total` | counter | |
//! | `backoffice_jobs_queue_depth` | gauge | |
//! | `backoffice_jobs_running` | gauge | |
//! | `backoffice_job_duration_seconds` | histogram | `job_type` |
//! | `backoffice_errors_total` | counter | `code`, `category` |
//! | `http_requests_total` | counter | `method`, `path`, `status_code` |
//! | `http_request_duration_seconds` | histogram | `method`, `path`, `status_code` |

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Deserialize;
use std::collections::HashMap;

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Histogram buckets for durations (in seconds)
    #[serde(default = "default_duration_buckets")]
    pub duration_buckets: Vec<f64>,

    /// Global labels to add to all metrics
    #[serde(default)]
    pub global_labels: HashMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            duration_buckets: default_duration_buckets(),
            global_labels: HashMap::new(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

// Jobs run from milliseconds up to the five minute default timeout
fn default_duration_buckets() -> Vec<f64> {
    vec![
        0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0,
    ]
}

/// Initialize the metrics subsystem.
///
/// Returns `None` when metrics are disabled.
///
/// # Errors
///
/// Returns an error if the buckets are empty or a recorder is already installed.
pub fn init_metrics(
    config: &MetricsConfig,
    service_name: &str,
) -> anyhow::Result<Option<PrometheusHandle>> {
    if !config.enabled {
        return Ok(None);
    }

    let mut builder = PrometheusBuilder::new();
    for (key, value) in &config.global_labels {
        builder = builder.add_global_label(key, value);
    }
    builder = builder.set_buckets(&config.duration_buckets)?;

    let handle = builder.install_recorder()?;
    register_metric_descriptions();

    tracing::info!(
        service_name = %service_name,
        buckets = config.duration_buckets.len(),
        "Metrics initialized"
    );

    Ok(Some(handle))
}

/// Register all metric descriptions.
pub fn register_metric_descriptions() {
    // Job lifecycle
    describe_counter!("backoffice_jobs_created_total", "Jobs accepted for execution");
    describe_counter!("backoffice_jobs_completed_total", "Jobs that completed");
    describe_counter!("backoffice_jobs_failed_total", "Jobs that ended in failure");
    describe_counter!("backoffice_jobs_cancelled_total", "Jobs cancelled by request");
    describe_counter!(
        "backoffice_jobs_retried_total",
        "Failed attempts scheduled for another try"
    );
    describe_counter!(
        "backoffice_jobs_timed_out_total",
        "Attempts stopped by their execution timeout"
    );
    describe_counter!(
        "backoffice_jobs_swept_total",
        "Terminal jobs evicted by the cleanup sweeper"
    );

    // Engine state
    describe_gauge!("backoffice_jobs_queue_depth", "Jobs waiting for a worker");
    describe_gauge!("backoffice_jobs_running", "Jobs currently executing");
    describe_histogram!(
        "backoffice_job_duration_seconds",
        "Handler execution time per attempt in seconds"
    );

    // Errors
    describe_counter!("backoffice_errors_total", "Errors by code and category");

    // HTTP
    describe_counter!("http_requests_total", "Total number of HTTP requests");
    describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );
}

/// Record one served HTTP request.
pub fn record_http_request(method: &str, path: &str, status_code: u16, duration_seconds: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", path.to_string()),
        ("status_code", status_code.to_string()),
    ];
    counter!("http_requests_total", &labels).increment(1);
    histogram!("http_request_duration_seconds", &labels).record(duration_seconds);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_config_defaults() {
        let config = MetricsConfig::default();
        assert!(config.enabled);
        assert!(!config.duration_buckets.is_empty());
        assert!(config
            .duration_buckets
            .windows(2)
            .all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_disabled_metrics_install_nothing() {
        let config = MetricsConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(init_metrics(&config, "test").unwrap().is_none());
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_http_request("GET", "/health", 200, 0.001);
    }

    #[test]
    fn test_local_recorder_renders_described_series() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            register_metric_descriptions();
            record_http_request("GET", "/health", 200, 0.002);
        });
        let rendered = handle.render();
        assert!(rendered.contains("http_requests_total"));
    }
}
