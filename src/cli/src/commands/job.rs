//! Job commands: submit, status, list, cancel, and stats.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Subcommand, ValueEnum};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tabled::Tabled;
use uuid::Uuid;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum JobCommands {
    /// Submit a new job
    Submit {
        /// Registered job type (e.g. csv_import, ebay_listing_sync)
        job_type: String,

        /// Owning account ID [default: saved `account` setting]
        #[arg(short, long)]
        account: Option<i64>,

        /// Job parameter as key=value; values are parsed as JSON, falling back to a string
        #[arg(short, long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Job priority
        #[arg(long, default_value = "normal")]
        priority: Priority,

        /// Maximum retries after the first attempt
        #[arg(long)]
        max_retries: Option<u32>,

        /// Per-attempt timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Show a job's status and progress
    Status {
        /// Job ID
        id: Uuid,
    },

    /// List jobs for an account, newest first
    List {
        /// Account ID [default: saved `account` setting]
        #[arg(short, long)]
        account: Option<i64>,

        /// Only show jobs in this status
        #[arg(short, long)]
        status: Option<StatusFilter>,
    },

    /// Cancel a queued or running job
    Cancel {
        /// Job ID
        id: Uuid,
    },

    /// Show aggregate job statistics for the last 24 hours
    Stats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatusFilter {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    Retrying,
}

impl StatusFilter {
    fn as_str(self) -> &'static str {
        match self {
            StatusFilter::Queued => "queued",
            StatusFilter::Running => "running",
            StatusFilter::Completed => "completed",
            StatusFilter::Failed => "failed",
            StatusFilter::Cancelled => "cancelled",
            StatusFilter::Retrying => "retrying",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Wire types
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
struct SubmitJobRequest {
    job_type: String,
    account_id: i64,
    parameters: BTreeMap<String, serde_json::Value>,
    priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct JobResponse {
    id: Uuid,
    job_type: String,
    account_id: i64,
    #[serde(default)]
    parameters: serde_json::Value,
    priority: String,
    max_retries: u32,
    timeout_seconds: u64,
    status: String,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    progress_percentage: f64,
    #[serde(default)]
    progress_message: String,
    #[serde(default)]
    current_step: String,
    #[serde(default)]
    retry_count: u32,
    last_error: Option<String>,
    result: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct JobTypeStats {
    total: usize,
    completed: usize,
    failed: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct StatsResponse {
    total_jobs: usize,
    by_status: BTreeMap<String, usize>,
    by_type: BTreeMap<String, JobTypeStats>,
    active_accounts: usize,
    queued: usize,
    running: usize,
    window_hours: i64,
}

/// Row representation for table output.
#[derive(Tabled)]
struct JobRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Type")]
    job_type: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Priority")]
    priority: String,
    #[tabled(rename = "Progress")]
    progress: String,
    #[tabled(rename = "Retries")]
    retries: String,
    #[tabled(rename = "Created")]
    created_at: String,
}

impl From<&JobResponse> for JobRow {
    fn from(job: &JobResponse) -> Self {
        Self {
            id: job.id.to_string(),
            job_type: job.job_type.clone(),
            status: job.status.clone(),
            priority: job.priority.clone(),
            progress: format!("{:.0}%", job.progress_percentage),
            retries: format!("{}/{}", job.retry_count, job.max_retries),
            created_at: format_time(&job.created_at),
        }
    }
}

#[derive(Tabled)]
struct TypeRow {
    #[tabled(rename = "Job Type")]
    job_type: String,
    #[tabled(rename = "Total")]
    total: usize,
    #[tabled(rename = "Completed")]
    completed: usize,
    #[tabled(rename = "Failed")]
    failed: usize,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Parameter parsing
// ═══════════════════════════════════════════════════════════════════════════════

/// Parse `key=value` pairs into a parameter map.
///
/// Values that parse as JSON keep their type (`limit=50` is a number,
/// `dry_run=true` a bool); anything else is sent as a string.
fn parse_params(pairs: &[String]) -> Result<BTreeMap<String, serde_json::Value>> {
    let mut params = BTreeMap::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .with_context(|| format!("Invalid parameter '{}', expected KEY=VALUE", pair))?;
        let key = key.trim();
        if key.is_empty() {
            anyhow::bail!("Invalid parameter '{}', key is empty", pair);
        }
        let value = serde_json::from_str(raw)
            .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
        params.insert(key.to_string(), value);
    }
    Ok(params)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Execution
// ═══════════════════════════════════════════════════════════════════════════════

/// Explicit `--account`, else the saved default.
fn pick_account(flag: Option<i64>, saved: Option<i64>) -> Result<i64> {
    flag.or(saved).context(
        "No account given; pass --account or save one with `backoffice config set account <id>`",
    )
}

pub async fn execute(
    cmd: JobCommands,
    client: &ApiClient,
    format: OutputFormat,
    saved_account: Option<i64>,
) -> Result<()> {
    match cmd {
        JobCommands::Submit {
            job_type,
            account,
            params,
            priority,
            max_retries,
            timeout,
        } => {
            let body = SubmitJobRequest {
                job_type,
                account_id: pick_account(account, saved_account)?,
                parameters: parse_params(&params)?,
                priority,
                max_retries,
                timeout_seconds: timeout,
            };

            let job: JobResponse = client.post("/api/v1/jobs", &body).await?;
            format.emit(&job, |job| {
                output::success(&format!("Queued {} job {}", job.job_type, job.id));
                output::field("Account", job.account_id);
                output::field("Priority", &job.priority);
                output::note(&format!("Follow it with `backoffice job status {}`", job.id));
                Ok(())
            })?;
        }

        JobCommands::Status { id } => {
            let job: JobResponse = client.get(&format!("/api/v1/jobs/{}", id)).await?;
            format.emit(&job, print_job_detail)?;
        }

        JobCommands::List { account, status } => {
            let account = pick_account(account, saved_account)?;
            let mut path = format!("/api/v1/accounts/{}/jobs", account);
            if let Some(status) = status {
                path.push_str("?status=");
                path.push_str(status.as_str());
            }

            let jobs: Vec<JobResponse> = client.get(&path).await?;
            format.emit(&jobs, |jobs| {
                let rows: Vec<JobRow> = jobs.iter().map(JobRow::from).collect();
                println!("{}", output::rows_table(&rows, "No jobs found."));
                Ok(())
            })?;
        }

        JobCommands::Cancel { id } => {
            let job: JobResponse = client
                .post_empty(&format!("/api/v1/jobs/{}/cancel", id))
                .await?;
            format.emit(&job, |job| {
                output::success(&format!("Job {} is now {}", job.id, job.status));
                Ok(())
            })?;
        }

        JobCommands::Stats => {
            let stats: StatsResponse = client.get("/api/v1/stats").await?;
            format.emit(&stats, print_stats)?;
        }
    }

    Ok(())
}

fn format_time(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn print_job_detail(job: &JobResponse) -> Result<()> {
    output::section(&format!("{} job {}", job.job_type, job.id));
    output::field("Status", output::status_label(&job.status));
    output::field("Progress", output::progress_bar(job.progress_percentage));
    if !job.progress_message.is_empty() {
        output::field("Message", &job.progress_message);
    }
    if !job.current_step.is_empty() {
        output::field("Step", &job.current_step);
    }
    output::field("Account", job.account_id);
    output::field("Priority", &job.priority);
    output::field("Attempts", format!("{} of {}", job.retry_count + 1, job.max_retries + 1));
    output::field("Timeout", format!("{}s", job.timeout_seconds));
    output::field("Created", format_time(&job.created_at));
    if let Some(started) = &job.started_at {
        output::field("Started", format_time(started));
    }
    if let (Some(started), Some(completed)) = (&job.started_at, &job.completed_at) {
        let took = (*completed - *started).num_milliseconds() as f64 / 1000.0;
        output::field("Finished", format!("{} ({:.1}s)", format_time(completed), took));
    }
    if let Some(err) = &job.last_error {
        output::field("Last error", err.red());
    }
    if let Some(result) = &job.result {
        output::section("Result");
        println!("{}", serde_json::to_string_pretty(result)?);
    }
    Ok(())
}

fn print_stats(stats: &StatsResponse) -> Result<()> {
    output::section(&format!("Jobs in the last {}h", stats.window_hours));
    output::field("Total", stats.total_jobs);
    output::field("Queued now", stats.queued);
    output::field("Running now", stats.running);
    output::field("Accounts", stats.active_accounts);
    for (status, count) in &stats.by_status {
        output::field(status, count);
    }

    let rows: Vec<TypeRow> = stats
        .by_type
        .iter()
        .map(|(job_type, s)| TypeRow {
            job_type: job_type.clone(),
            total: s.total,
            completed: s.completed,
            failed: s.failed,
        })
        .collect();
    output::section("By job type");
    println!("{}", output::rows_table(&rows, "No jobs in this window."));
    Ok(())
}
