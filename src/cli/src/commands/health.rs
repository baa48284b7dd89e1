//! Health check command.
//!
//! Queries the `/health` endpoint and displays worker pool and queue state.

use anyhow::Result;
use clap::Args;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct HealthArgs {
    /// Include worker pool details
    #[arg(short, long)]
    detailed: bool,
}

fn field_u64(value: &serde_json::Value, key: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_u64())
        .map(|n| n.to_string())
        .unwrap_or_else(|| "?".to_string())
}

pub async fn execute(args: HealthArgs, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let health: serde_json::Value = client.get_raw("/health").await?;

    format.emit(&health, |health| {
        let status = health
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");

        output::section("Job engine");
        output::field("Status", status);
        output::field("API URL", client.base_url());
        if let Some(version) = health.get("version").and_then(|v| v.as_str()) {
            output::field("Version", version);
        }
        output::field("Queue depth", field_u64(health, "queue_depth"));
        output::field("Running jobs", field_u64(health, "running_jobs"));
        output::field("Pending retries", field_u64(health, "pending_retries"));

        if args.detailed {
            if let Some(workers) = health.get("workers") {
                output::section("Workers");
                for key in ["max_workers", "available_slots", "active", "processed", "succeeded", "failed"] {
                    output::field(key, field_u64(workers, key));
                }
            }
        }

        println!();
        if status == "healthy" {
            output::success("Accepting jobs");
        } else {
            output::failure(&format!("Engine reports '{}'", status));
        }
        Ok(())
    })
}
