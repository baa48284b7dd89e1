//! Back-office server - Main entry point

use backoffice_core::{
    api::{self, AppState},
    config::Config,
    jobs::{register_builtin_handlers, JobManager},
    telemetry,
};

/// Environment variable naming an optional config file.
const CONFIG_PATH_ENV: &str = "BACKOFFICE_CONFIG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let loaded = match std::env::var(CONFIG_PATH_ENV) {
        Ok(path) => Config::from_file(&path),
        Err(_) => Config::load(),
    };
    let config = loaded.unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config: {}. Using defaults.", e);
        Config::default()
    });

    // Initialize telemetry
    let telemetry = telemetry::init_telemetry(&config.telemetry)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        max_workers = config.jobs.max_workers,
        "Starting back-office server"
    );

    // Job engine
    let manager = JobManager::new(config.jobs.clone())?;
    register_builtin_handlers(&manager);
    manager.start();
    tracing::info!(
        job_types = ?manager.registered_job_types(),
        "Job manager started"
    );

    // Build router
    let state = AppState::new(manager.clone()).with_metrics(telemetry.metrics.clone());
    let app = api::build_router(state);

    // Start server
    let addr = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Starting HTTP server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup
    if let Err(e) = manager.shutdown().await {
        tracing::warn!(error = %e, "Job manager did not shut down cleanly");
    }
    telemetry.shutdown();
    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
