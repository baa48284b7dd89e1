//! Telemetry: Logging, Tracing, and Metrics Infrastructure.
//!
//! This module provides the telemetry stack for the back-office server:
//!
//! - **Logging**: Structured JSON/pretty/compact logging with `EnvFilter`
//! - **Tracing**: Optional OpenTelemetry export over OTLP
//! - **Metrics**: Prometheus recorder for job lifecycle metrics
//!
//! # Example
//!
//! ```rust,no_run
//! use backoffice_core::telemetry::{TelemetryConfig, init_telemetry};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let handle = init_telemetry(&TelemetryConfig::default())?;
//! // ... run the server ...
//! handle.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod logging;
pub mod metrics;
pub mod tracing;

pub use self::logging::{init_logging, LogFormat, LoggingConfig};
pub use self::metrics::{init_metrics, register_metric_descriptions, MetricsConfig};
pub use self::tracing::{build_tracer, shutdown_tracing, TracingConfig};

use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;

/// Unified telemetry configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// Service name for identification in traces and metrics
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Service version
    #[serde(default = "default_service_version")]
    pub service_version: String,

    /// Environment (development, staging, production)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Tracing configuration
    #[serde(default)]
    pub tracing: TracingConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            service_version: default_service_version(),
            environment: default_environment(),
            logging: LoggingConfig::default(),
            tracing: TracingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

fn default_service_name() -> String {
    "backoffice".to_string()
}

fn default_service_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_environment() -> String {
    std::env::var("BACKOFFICE_ENVIRONMENT").unwrap_or_else(|_| "development".to_string())
}

/// Initialize the complete telemetry stack.
///
/// Must be called once, from inside a tokio runtime when OTLP export is enabled.
///
/// # Errors
///
/// Returns an error if any component fails to initialize.
pub fn init_telemetry(config: &TelemetryConfig) -> anyhow::Result<TelemetryHandle> {
    // Metrics first so early log lines can't race the recorder install
    let metrics = init_metrics(&config.metrics, &config.service_name)?;

    let tracer = build_tracer(&config.tracing, config)?;
    let tracing_enabled = tracer.is_some();

    init_logging(&config.logging, &config.environment, tracer)?;

    ::tracing::info!(
        service_name = %config.service_name,
        version = %config.service_version,
        environment = %config.environment,
        otlp = tracing_enabled,
        metrics = metrics.is_some(),
        "Telemetry initialized"
    );

    Ok(TelemetryHandle {
        metrics,
        tracing_enabled,
    })
}

/// Handle for managing telemetry lifecycle.
pub struct TelemetryHandle {
    /// Prometheus handle for rendering `/metrics`, when enabled
    pub metrics: Option<PrometheusHandle>,
    tracing_enabled: bool,
}

impl TelemetryHandle {
    /// Gracefully shutdown all telemetry components.
    pub fn shutdown(self) {
        if self.tracing_enabled {
            // Flush remaining spans
            shutdown_tracing();
        }
        ::tracing::info!("Telemetry shutdown complete");
    }
}
