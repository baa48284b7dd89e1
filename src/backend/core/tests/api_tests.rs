//! HTTP route tests driven through the router with `oneshot`.
//!
//! Tests cover:
//! - Health and metrics endpoints
//! - Job submission, lookup and cancellation
//! - Account listing and stats
//! - Error envelopes and status codes

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use backoffice_core::api::{build_router, AppState};
use backoffice_core::config::JobsConfig;
use backoffice_core::jobs::{register_builtin_handlers, JobManager};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::{json, Value};
use tower::ServiceExt;

// ============================================================================
// Helpers
// ============================================================================

/// Manager that is never started, so submitted jobs stay queued.
fn manager() -> JobManager {
    let manager = JobManager::new(JobsConfig::default()).unwrap();
    register_builtin_handlers(&manager);
    manager
}

fn app(manager: &JobManager) -> Router {
    build_router(AppState::new(manager.clone()))
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn submit(manager: &JobManager, body: Value) -> String {
    let (status, body) = send(app(manager), post_json("/api/v1/jobs", body)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    body["data"]["id"].as_str().unwrap().to_string()
}

// ============================================================================
// Health and Metrics
// ============================================================================

#[tokio::test]
async fn test_health_reports_pool() {
    let manager = manager();
    let (status, body) = send(app(&manager), get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["workers"]["max_workers"], 4);
    assert_eq!(body["queue_depth"], 0);
    assert_eq!(body["running_jobs"], 0);
    assert_eq!(body["pending_retries"], 0);
}

#[tokio::test]
async fn test_health_unavailable_after_shutdown() {
    let manager = manager();
    manager.shutdown().await.unwrap();

    let (status, body) = send(app(&manager), get("/health")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "shutting_down");
}

#[tokio::test]
async fn test_metrics_renders_prometheus_text() {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    metrics::with_local_recorder(&recorder, || {
        metrics::counter!("backoffice_jobs_created_total", "job_type" => "echo").increment(3);
    });

    let manager = manager();
    let app = build_router(AppState::new(manager).with_metrics(Some(handle)));
    let response = app.oneshot(get("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("backoffice_jobs_created_total"));
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let manager = manager();
    let request = Request::builder()
        .uri("/health")
        .header("x-request-id", "req-123")
        .body(Body::empty())
        .unwrap();
    let response = app(&manager).oneshot(request).await.unwrap();
    assert_eq!(response.headers()["x-request-id"], "req-123");
}

// ============================================================================
// Jobs
// ============================================================================

#[tokio::test]
async fn test_create_job_returns_accepted() {
    let manager = manager();
    let (status, body) = send(
        app(&manager),
        post_json(
            "/api/v1/jobs",
            json!({
                "job_type": "echo",
                "account_id": 12,
                "parameters": {"marketplace": "ebay"},
                "priority": "high",
                "max_retries": 1,
                "timeout_seconds": 45
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["success"], true);
    let data = &body["data"];
    assert_eq!(data["status"], "queued");
    assert_eq!(data["priority"], "high");
    assert_eq!(data["account_id"], 12);
    assert_eq!(data["max_retries"], 1);
    assert_eq!(data["timeout_seconds"], 45);
    assert_eq!(data["parameters"]["marketplace"], "ebay");
    assert_eq!(manager.queue_depth(), 1);
}

#[tokio::test]
async fn test_create_job_applies_defaults() {
    let manager = manager();
    let (status, body) = send(
        app(&manager),
        post_json("/api/v1/jobs", json!({"job_type": "csv_import", "account_id": 3})),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["priority"], "normal");
    assert_eq!(body["data"]["max_retries"], 3);
    assert_eq!(body["data"]["timeout_seconds"], 300);
}

#[tokio::test]
async fn test_create_unknown_job_type() {
    let manager = manager();
    let (status, body) = send(
        app(&manager),
        post_json("/api/v1/jobs", json!({"job_type": "amazon_orders", "account_id": 1})),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);
    assert_eq!(body["error_code"], "HANDLER_NOT_REGISTERED");
    assert_eq!(manager.queue_depth(), 0);
}

#[tokio::test]
async fn test_create_job_rejects_bad_input() {
    let manager = manager();

    let (status, body) = send(
        app(&manager),
        post_json("/api/v1/jobs", json!({"job_type": "  ", "account_id": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error_code"], "VALIDATION_ERROR");

    let (status, _) = send(
        app(&manager),
        post_json(
            "/api/v1/jobs",
            json!({"job_type": "echo", "account_id": 1, "timeout_seconds": 0}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    // Missing account_id
    let (status, _) = send(app(&manager), post_json("/api/v1/jobs", json!({"job_type": "echo"}))).await;
    assert!(status.is_client_error());

    assert_eq!(manager.queue_depth(), 0);
}

#[tokio::test]
async fn test_get_job() {
    let manager = manager();
    let id = submit(&manager, json!({"job_type": "echo", "account_id": 5})).await;

    let (status, body) = send(app(&manager), get(&format!("/api/v1/jobs/{}", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], id.as_str());
    assert_eq!(body["data"]["job_type"], "echo");
    assert_eq!(body["data"]["progress_percentage"], 0.0);
}

#[tokio::test]
async fn test_get_unknown_job() {
    let manager = manager();
    let (status, body) = send(
        app(&manager),
        get(&format!("/api/v1/jobs/{}", uuid::Uuid::new_v4())),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_code"], "JOB_NOT_FOUND");

    let (status, _) = send(app(&manager), get("/api/v1/jobs/not-a-uuid")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cancel_job() {
    let manager = manager();
    let id = submit(&manager, json!({"job_type": "echo", "account_id": 5})).await;
    let uri = format!("/api/v1/jobs/{}/cancel", id);

    let (status, body) = send(app(&manager), post_empty(&uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "cancelled");
    assert_eq!(manager.queue_depth(), 0);

    // Terminal jobs cannot be cancelled again
    let (status, body) = send(app(&manager), post_empty(&uri)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error_code"], "INVALID_STATE_TRANSITION");

    let unknown = format!("/api/v1/jobs/{}/cancel", uuid::Uuid::new_v4());
    let (status, _) = send(app(&manager), post_empty(&unknown)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ============================================================================
// Accounts and Stats
// ============================================================================

#[tokio::test]
async fn test_list_account_jobs() {
    let manager = manager();
    let first = submit(&manager, json!({"job_type": "echo", "account_id": 9})).await;
    let second = submit(&manager, json!({"job_type": "echo", "account_id": 9})).await;
    submit(&manager, json!({"job_type": "echo", "account_id": 10})).await;
    send(app(&manager), post_empty(&format!("/api/v1/jobs/{}/cancel", first))).await;

    let (status, body) = send(app(&manager), get("/api/v1/accounts/9/jobs")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let (status, body) = send(app(&manager), get("/api/v1/accounts/9/jobs?status=queued")).await;
    assert_eq!(status, StatusCode::OK);
    let jobs = body["data"].as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["id"], second.as_str());

    let (status, body) = send(app(&manager), get("/api/v1/accounts/404/jobs")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].as_array().unwrap().is_empty());

    let (status, _) = send(app(&manager), get("/api/v1/accounts/9/jobs?status=sleeping")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_stats() {
    let manager = manager();
    submit(&manager, json!({"job_type": "echo", "account_id": 1})).await;
    submit(&manager, json!({"job_type": "csv_import", "account_id": 2})).await;

    let (status, body) = send(app(&manager), get("/api/v1/stats")).await;
    assert_eq!(status, StatusCode::OK);
    let data = &body["data"];
    assert_eq!(data["total_jobs"], 2);
    assert_eq!(data["queued"], 2);
    assert_eq!(data["by_status"]["queued"], 2);
    assert_eq!(data["by_type"]["csv_import"]["total"], 1);
    assert_eq!(data["active_accounts"], 2);
    assert_eq!(data["window_hours"], 24);
}
