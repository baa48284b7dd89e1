//! Back-office CLI - Command-line interface for the background job engine.
//!
//! Provides commands for job, health, and configuration management.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::config::{self, Settings};
use commands::{health, job};
use output::OutputFormat;

/// Default server address when neither a flag, env var nor config value is set.
const DEFAULT_API_URL: &str = "http://localhost:8080";

/// Back-office job engine CLI
#[derive(Parser)]
#[command(
    name = "backoffice",
    version,
    about = "Back-office background job engine",
    long_about = "CLI tool for submitting, inspecting and cancelling back-office jobs.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format [default: saved `output` setting, else table]
    #[arg(short, long, global = true)]
    output: Option<OutputFormat>,

    /// API server URL
    #[arg(long, global = true, env = "BACKOFFICE_API_URL")]
    api_url: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Job operations
    #[command(subcommand)]
    Job(job::JobCommands),

    /// Check server health
    Health(health::HealthArgs),

    /// Configuration management
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let settings = Settings::load_or_default();
    let (api_url, format) = resolve(&cli, &settings);
    let client = client::ApiClient::new(&api_url)?;

    let result = match cli.command {
        Commands::Job(cmd) => job::execute(cmd, &client, format, settings.account).await,
        Commands::Health(args) => health::execute(args, &client, format).await,
        Commands::Config(cmd) => config::execute(cmd, format).await,
    };

    if let Err(e) = result {
        output::failure(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}

/// Flags and `BACKOFFICE_API_URL` beat saved settings, which beat defaults.
fn resolve(cli: &Cli, settings: &Settings) -> (String, OutputFormat) {
    let api_url = cli
        .api_url
        .clone()
        .or_else(|| settings.api_url.clone())
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());
    let format = cli.output.or(settings.output).unwrap_or_default();
    (api_url, format)
}
