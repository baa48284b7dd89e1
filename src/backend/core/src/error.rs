//! Error type shared by the job engine and its HTTP surface.
//!
//! Every failure carries an [`ErrorCode`]. The code decides the HTTP status,
//! whether a job hitting it is worth retrying, and how loudly it is logged.
//! The message is safe to return to API clients; the optional detail is
//! only logged.
//!
//! ```rust,ignore
//! use backoffice_core::error::{ErrorCode, ErrorContext, Result};
//!
//! fn read_mapping(path: &Path) -> Result<String> {
//!     std::fs::read_to_string(path)
//!         .context(ErrorCode::ConfigurationError, "Column mapping is unreadable")
//! }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, BackofficeError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Stable error codes. Clients match on the serialized form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Job lifecycle
    JobNotFound,
    HandlerNotRegistered,
    InvalidStateTransition,
    JobExecutionFailed,
    JobTimeout,
    JobCancelled,

    // Caller input
    ValidationError,
    InvalidInput,
    RecordNotFound,
    Forbidden,
    DeserializationError,

    // Startup
    ConfigurationError,
    InvalidConfiguration,

    // Engine
    SerializationError,
    ServiceUnavailable,
    InternalError,
}

impl ErrorCode {
    /// Wire name, identical to the serde form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::JobNotFound => "JOB_NOT_FOUND",
            Self::HandlerNotRegistered => "HANDLER_NOT_REGISTERED",
            Self::InvalidStateTransition => "INVALID_STATE_TRANSITION",
            Self::JobExecutionFailed => "JOB_EXECUTION_FAILED",
            Self::JobTimeout => "JOB_TIMEOUT",
            Self::JobCancelled => "JOB_CANCELLED",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::InvalidInput => "INVALID_INPUT",
            Self::RecordNotFound => "RECORD_NOT_FOUND",
            Self::Forbidden => "FORBIDDEN",
            Self::DeserializationError => "DESERIALIZATION_ERROR",
            Self::ConfigurationError => "CONFIGURATION_ERROR",
            Self::InvalidConfiguration => "INVALID_CONFIGURATION",
            Self::SerializationError => "SERIALIZATION_ERROR",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    pub const fn http_status(&self) -> StatusCode {
        match self {
            Self::JobNotFound | Self::RecordNotFound => StatusCode::NOT_FOUND,
            Self::InvalidStateTransition | Self::JobCancelled => StatusCode::CONFLICT,
            // Submitting an unknown job type is a caller mistake
            Self::HandlerNotRegistered
            | Self::ValidationError
            | Self::InvalidInput
            | Self::DeserializationError => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::JobTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::JobExecutionFailed
            | Self::ConfigurationError
            | Self::InvalidConfiguration
            | Self::SerializationError
            | Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether a job that failed with this code may succeed on another attempt.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::JobExecutionFailed | Self::JobTimeout | Self::ServiceUnavailable
        )
    }

    /// Errors caused by the request rather than the engine.
    pub fn is_caller_error(&self) -> bool {
        self.http_status().is_client_error()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Error, Debug)]
pub struct BackofficeError {
    code: ErrorCode,
    message: Cow<'static, str>,
    /// Operator-facing detail, never sent to clients
    detail: Option<String>,
    job_id: Option<String>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for BackofficeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        if let Some(detail) = &self.detail {
            write!(f, " ({})", detail)?;
        }
        Ok(())
    }
}

impl BackofficeError {
    pub fn new(code: ErrorCode, message: impl Into<Cow<'static, str>>) -> Self {
        counter!("backoffice_errors_total", "code" => code.as_str()).increment(1);
        Self {
            code,
            message: message.into(),
            detail: None,
            job_id: None,
            source: None,
        }
    }

    /// Client message plus a detail that only reaches the logs.
    pub fn with_internal(
        code: ErrorCode,
        message: impl Into<Cow<'static, str>>,
        detail: impl Into<String>,
    ) -> Self {
        Self::new(code, message).with_detail(detail)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An internal error occurred", detail)
    }

    pub fn validation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    /// A record a job depends on (listing, account, file) is missing.
    pub fn not_found(kind: &str, id: impl fmt::Display) -> Self {
        Self::new(ErrorCode::RecordNotFound, format!("{} not found: {}", kind, id))
    }

    pub fn configuration(detail: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InvalidConfiguration, "Invalid configuration", detail)
    }

    pub fn handler_not_registered(job_type: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::HandlerNotRegistered,
            format!("No handler registered for job type '{}'", job_type),
        )
    }

    /// Unknown id, or a terminal job the sweeper already evicted.
    pub fn job_not_found(job_id: impl fmt::Display) -> Self {
        let id = job_id.to_string();
        Self::new(ErrorCode::JobNotFound, format!("Job not found: {}", id)).for_job(id)
    }

    pub fn invalid_state_transition(
        job_id: impl fmt::Display,
        from: impl fmt::Display,
        to: impl fmt::Display,
    ) -> Self {
        let id = job_id.to_string();
        Self::new(
            ErrorCode::InvalidStateTransition,
            format!("Job {} cannot transition from {} to {}", id, from, to),
        )
        .for_job(id)
    }

    pub fn shutting_down() -> Self {
        Self::new(ErrorCode::ServiceUnavailable, "The job manager is shutting down")
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Tag the error with the job it concerns.
    pub fn for_job(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Message safe to return to API clients.
    pub fn user_message(&self) -> &str {
        &self.message
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Caller errors go to debug, engine trouble to warn or error.
    pub fn log(&self) {
        let code = self.code.as_str();
        let status = self.http_status().as_u16();
        let job_id = self.job_id.as_deref().unwrap_or("-");

        if self.code.is_caller_error() {
            tracing::debug!(error_code = code, http_status = status, job_id, message = %self.message, "Request rejected");
        } else if self.code.is_retryable() {
            tracing::warn!(
                error_code = code,
                http_status = status,
                job_id,
                message = %self.message,
                detail = ?self.detail,
                "Job engine degraded"
            );
        } else {
            tracing::error!(
                error_code = code,
                http_status = status,
                job_id,
                message = %self.message,
                detail = ?self.detail,
                source = ?self.source,
                "Job engine error"
            );
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HTTP
// ═══════════════════════════════════════════════════════════════════════════════

/// Error body returned by the API. Shares `success`/`error`/`error_code`
/// with the success envelope so clients parse both the same way.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub error_code: ErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl From<&BackofficeError> for ErrorResponse {
    fn from(error: &BackofficeError) -> Self {
        Self {
            success: false,
            error: error.message.to_string(),
            error_code: error.code,
            job_id: error.job_id.clone(),
            timestamp: Utc::now(),
        }
    }
}

impl IntoResponse for BackofficeError {
    fn into_response(self) -> Response {
        self.log();
        (self.http_status(), Json(ErrorResponse::from(&self))).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Wrapping foreign errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Wrap a foreign error under a code and a client-safe message, keeping
/// the original as source and its text as detail.
pub trait ErrorContext<T> {
    fn context(self, code: ErrorCode, message: impl Into<Cow<'static, str>>) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, code: ErrorCode, message: impl Into<Cow<'static, str>>) -> Result<T> {
        self.map_err(|e| {
            BackofficeError::new(code, message)
                .with_detail(e.to_string())
                .with_source(e)
        })
    }
}

impl From<serde_json::Error> for BackofficeError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_io() {
            ErrorCode::SerializationError
        } else {
            ErrorCode::DeserializationError
        };
        Self::new(code, "Malformed JSON payload")
            .with_detail(error.to_string())
            .with_source(error)
    }
}

impl From<tokio::sync::AcquireError> for BackofficeError {
    fn from(error: tokio::sync::AcquireError) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, "Worker pool is closed").with_source(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ErrorCode::JobNotFound.http_status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ErrorCode::HandlerNotRegistered.http_status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ErrorCode::InvalidStateTransition.http_status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ErrorCode::ServiceUnavailable.http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_retryable_codes() {
        assert!(ErrorCode::JobTimeout.is_retryable());
        assert!(ErrorCode::JobExecutionFailed.is_retryable());
        assert!(!ErrorCode::JobCancelled.is_retryable());
        assert!(!ErrorCode::HandlerNotRegistered.is_retryable());
    }

    #[test]
    fn test_caller_errors() {
        assert!(ErrorCode::ValidationError.is_caller_error());
        assert!(ErrorCode::JobNotFound.is_caller_error());
        assert!(!ErrorCode::JobTimeout.is_caller_error());
        assert!(!ErrorCode::InternalError.is_caller_error());
    }

    #[test]
    fn test_wire_name_matches_serde() {
        for code in [
            ErrorCode::JobNotFound,
            ErrorCode::InvalidConfiguration,
            ErrorCode::DeserializationError,
        ] {
            let json = serde_json::to_value(code).unwrap();
            assert_eq!(json, code.as_str());
        }
    }

    #[test]
    fn test_job_errors_carry_job_id() {
        let error = BackofficeError::invalid_state_transition("j-1", "completed", "cancelled");
        assert_eq!(error.code(), ErrorCode::InvalidStateTransition);
        assert_eq!(error.job_id(), Some("j-1"));
        assert!(error.user_message().contains("from completed to cancelled"));

        let error = BackofficeError::handler_not_registered("csv_import");
        assert!(error.user_message().contains("csv_import"));
        assert!(error.job_id().is_none());
    }

    #[test]
    fn test_context_wraps_source() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "mapping.toml missing",
        ));
        let error = result
            .context(ErrorCode::ConfigurationError, "Column mapping is unreadable")
            .unwrap_err();
        assert_eq!(error.code(), ErrorCode::ConfigurationError);
        assert_eq!(error.user_message(), "Column mapping is unreadable");
        assert_eq!(error.detail(), Some("mapping.toml missing"));
        assert!(std::error::Error::source(&error).is_some());
    }

    #[test]
    fn test_error_response_body() {
        let error = BackofficeError::job_not_found("abc");
        let json = serde_json::to_value(ErrorResponse::from(&error)).unwrap();

        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "Job not found: abc");
        assert_eq!(json["error_code"], "JOB_NOT_FOUND");
        assert_eq!(json["job_id"], "abc");
    }

    #[test]
    fn test_detail_stays_out_of_response() {
        let error = BackofficeError::internal("pool exhausted on shard 3");
        assert_eq!(
            error.to_string(),
            "INTERNAL_ERROR: An internal error occurred (pool exhausted on shard 3)"
        );

        let json = serde_json::to_value(ErrorResponse::from(&error)).unwrap();
        assert!(!json.to_string().contains("shard 3"));
        assert!(json.get("job_id").is_none());
    }

    #[test]
    fn test_from_serde_json_error() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let error: BackofficeError = parse.unwrap_err().into();
        assert_eq!(error.code(), ErrorCode::DeserializationError);
        assert!(error.detail().is_some());
    }
}
