//! Configuration management.
//!
//! Values come from an optional config file layered under environment
//! variables prefixed with `BACKOFFICE`, using `__` as the section
//! separator (e.g. `BACKOFFICE__JOBS__MAX_WORKERS=8`).

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::{BackofficeError, ErrorCode, ErrorContext, Result};
use crate::telemetry::TelemetryConfig;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "BACKOFFICE";

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Job engine configuration
    #[serde(default)]
    pub jobs: JobsConfig,

    /// Logging, tracing and metrics configuration
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    /// `host:port` string suitable for binding.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    /// Number of jobs that may run concurrently
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// How often the sweeper evicts old terminal jobs
    #[serde(default = "default_cleanup_interval", with = "humantime_serde")]
    pub cleanup_interval: Duration,

    /// Upper bound on waiting for running jobs during shutdown
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,

    /// Execution timeout for jobs submitted without one
    #[serde(default = "default_job_timeout", with = "humantime_serde")]
    pub default_timeout: Duration,

    /// Retry budget for jobs submitted without one
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            cleanup_interval: default_cleanup_interval(),
            shutdown_timeout: default_shutdown_timeout(),
            default_timeout: default_job_timeout(),
            default_max_retries: default_max_retries(),
        }
    }
}

impl JobsConfig {
    /// Set the number of worker slots.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(BackofficeError::configuration("jobs.max_workers must be at least 1"));
        }
        if self.cleanup_interval.is_zero() {
            return Err(BackofficeError::configuration("jobs.cleanup_interval must be non-zero"));
        }
        if self.shutdown_timeout.is_zero() {
            return Err(BackofficeError::configuration("jobs.shutdown_timeout must be non-zero"));
        }
        if self.default_timeout.as_secs() == 0 {
            return Err(BackofficeError::configuration(
                "jobs.default_timeout must be at least one second",
            ));
        }
        Ok(())
    }
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_max_workers() -> usize { 4 }
fn default_cleanup_interval() -> Duration { Duration::from_secs(3600) }
fn default_shutdown_timeout() -> Duration { Duration::from_secs(30) }
fn default_job_timeout() -> Duration { Duration::from_secs(300) }
fn default_max_retries() -> u32 { 3 }

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(environment())
            .build()
            .context(ErrorCode::ConfigurationError, "Failed to read environment configuration")?;
        Self::from_settings(settings)
    }

    /// Load from a specific file path, with environment overrides on top.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(environment())
            .build()
            .context(
                ErrorCode::ConfigurationError,
                format!("Failed to read config file {}", path.display()),
            )?;
        Self::from_settings(settings)
    }

    fn from_settings(settings: config::Config) -> Result<Self> {
        let cfg: Config = settings
            .try_deserialize()
            .context(ErrorCode::ConfigurationError, "Configuration has invalid values")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.jobs.validate()
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}
