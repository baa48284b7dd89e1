//! HTTP API for the back-office job engine.
//!
//! # Routes
//!
//! | Method | Path | Action |
//! |--------|------|--------|
//! | GET | `/health` | Liveness and worker pool snapshot |
//! | GET | `/metrics` | Prometheus text exposition |
//! | POST | `/api/v1/jobs` | Submit a job (202) |
//! | GET | `/api/v1/jobs/:id` | Fetch a job |
//! | POST | `/api/v1/jobs/:id/cancel` | Cancel a queued or running job |
//! | GET | `/api/v1/accounts/:account_id/jobs` | List an account's jobs, optional `?status=` |
//! | GET | `/api/v1/stats` | 24 hour summary |
//!
//! Successful responses use the [`ApiResponse`] envelope; failures are
//! rendered by [`BackofficeError`](crate::error::BackofficeError).

pub mod handlers;
pub mod middleware;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::jobs::JobManager;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: JobManager,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(manager: JobManager) -> Self {
        Self {
            manager,
            metrics: None,
        }
    }

    /// Attach the Prometheus handle served on `/metrics`.
    pub fn with_metrics(mut self, handle: Option<PrometheusHandle>) -> Self {
        self.metrics = handle;
        self
    }
}

/// Build the API router.
///
/// # Example
///
/// ```rust,ignore
/// let state = AppState::new(manager).with_metrics(telemetry.metrics.clone());
/// let app = build_router(state);
/// ```
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Unversioned endpoints
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::prometheus_metrics))
        // V1 API
        .nest("/api/v1", v1_router())
        // Middleware
        .layer(axum_middleware::from_fn(middleware::record_http_metrics))
        .layer(axum_middleware::from_fn(middleware::request_id_headers))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}

fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/jobs", post(handlers::create_job))
        .route("/jobs/:id", get(handlers::get_job))
        .route("/jobs/:id/cancel", post(handlers::cancel_job))
        .route("/accounts/:account_id/jobs", get(handlers::list_account_jobs))
        .route("/stats", get(handlers::get_stats))
}

/// API response wrapper.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            error_code: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            error_code: None,
        }
    }

    pub fn from_error(err: &crate::error::BackofficeError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(err.user_message().to_string()),
            error_code: Some(err.code().to_string()),
        }
    }
}
