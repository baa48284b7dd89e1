//! Distributed tracing export over OpenTelemetry OTLP.
//!
//! Export is off by default. When enabled, a batch OTLP pipeline is
//! installed and its tracer is handed to the logging subscriber as a
//! `tracing-opentelemetry` layer.

use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{self as sdktrace, Sampler};
use opentelemetry_sdk::Resource;
use serde::Deserialize;

use super::TelemetryConfig;

/// Tracing configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TracingConfig {
    /// Whether to export spans
    #[serde(default)]
    pub enabled: bool,

    /// OTLP gRPC endpoint
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Fraction of root traces to sample (0.0-1.0)
    #[serde(default = "default_sample_ratio")]
    pub sample_ratio: f64,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            sample_ratio: default_sample_ratio(),
        }
    }
}

fn default_sample_ratio() -> f64 {
    1.0
}

/// Default OTLP collector endpoint.
pub const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";

/// Build and install the OTLP tracer, or return `None` when export is disabled.
///
/// # Errors
///
/// Returns an error if the exporter pipeline cannot be installed.
pub fn build_tracer(
    config: &TracingConfig,
    telemetry: &TelemetryConfig,
) -> anyhow::Result<Option<sdktrace::Tracer>> {
    if !config.enabled {
        return Ok(None);
    }

    let endpoint = config.endpoint.as_deref().unwrap_or(DEFAULT_OTLP_ENDPOINT);

    let resource = Resource::new(vec![
        opentelemetry::KeyValue::new("service.name", telemetry.service_name.clone()),
        opentelemetry::KeyValue::new("service.version", telemetry.service_version.clone()),
        opentelemetry::KeyValue::new("deployment.environment", telemetry.environment.clone()),
    ]);

    let sampler = Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
        config.sample_ratio.clamp(0.0, 1.0),
    )));

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .with_trace_config(
            sdktrace::config()
                .with_resource(resource)
                .with_sampler(sampler),
        )
        .install_batch(opentelemetry_sdk::runtime::Tokio)?;

    opentelemetry::global::set_text_map_propagator(
        opentelemetry_sdk::propagation::TraceContextPropagator::new(),
    );

    tracing::debug!(endpoint = %endpoint, "OTLP trace export enabled");
    Ok(Some(tracer))
}

/// Shutdown the tracing subsystem, flushing any remaining spans.
pub fn shutdown_tracing() {
    opentelemetry::global::shutdown_tracer_provider();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_tracer_is_none() {
        let telemetry = TelemetryConfig::default();
        let tracer = build_tracer(&telemetry.tracing, &telemetry).unwrap();
        assert!(tracer.is_none());
    }
}
