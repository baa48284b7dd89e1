//! Terminal rendering for the back-office CLI.
//!
//! Commands build one response value and hand it to [`OutputFormat::emit`].
//! JSON and YAML print the value as-is; table mode calls back into the
//! command so it can lay out fields, job tables and progress bars.

use anyhow::Result;
use clap::ValueEnum;
use colored::{ColoredString, Colorize};
use serde::{Deserialize, Serialize};
use tabled::{
    settings::{object::Columns, Alignment, Modify, Style},
    Table, Tabled,
};

/// Width of the progress bar in table mode.
const BAR_WIDTH: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human readable fields and tables
    #[default]
    Table,
    Json,
    Yaml,
}

impl OutputFormat {
    /// Serialized form for machine formats, `None` in table mode.
    pub fn encode<T: Serialize + ?Sized>(self, value: &T) -> Result<Option<String>> {
        Ok(match self {
            Self::Table => None,
            Self::Json => Some(serde_json::to_string_pretty(value)? + "\n"),
            Self::Yaml => Some(serde_yaml::to_string(value)?),
        })
    }

    /// Print `value` in a machine format, or hand it to `table` for humans.
    pub fn emit<T, F>(self, value: &T, table: F) -> Result<()>
    where
        T: Serialize + ?Sized,
        F: FnOnce(&T) -> Result<()>,
    {
        match self.encode(value)? {
            Some(text) => {
                print!("{}", text);
                Ok(())
            }
            None => table(value),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Messages
// ═══════════════════════════════════════════════════════════════════════════════

pub fn success(msg: &str) {
    println!("{} {}", "✓".green().bold(), msg);
}

pub fn note(msg: &str) {
    println!("{} {}", "•".blue().bold(), msg);
}

pub fn warning(msg: &str) {
    eprintln!("{} {}", "warning:".yellow().bold(), msg);
}

pub fn failure(msg: &str) {
    eprintln!("{} {}", "error:".red().bold(), msg);
}

// ═══════════════════════════════════════════════════════════════════════════════
// Table mode
// ═══════════════════════════════════════════════════════════════════════════════

pub fn section(title: &str) {
    println!("\n{}", title.bold().underline());
}

/// One `label: value` line, labels padded so values line up.
pub fn field(label: &str, value: impl std::fmt::Display) {
    println!("  {:<16} {}", format!("{}:", label).cyan(), value);
}

/// Render rows as a rounded table, or `empty` when there are none.
pub fn rows_table<R: Tabled>(rows: &[R], empty: &str) -> String {
    if rows.is_empty() {
        return empty.dimmed().to_string();
    }
    Table::new(rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::first()).with(Alignment::left()))
        .to_string()
}

/// Job status colored by how it ended.
pub fn status_label(status: &str) -> ColoredString {
    match status {
        "completed" => status.green(),
        "failed" => status.red().bold(),
        "cancelled" => status.dimmed(),
        "running" => status.cyan(),
        "retrying" => status.yellow(),
        _ => status.normal(),
    }
}

/// `[########------------]  40%` for a percentage in 0..=100.
pub fn progress_bar(percentage: f64) -> String {
    let pct = percentage.clamp(0.0, 100.0);
    let filled = ((pct / 100.0) * BAR_WIDTH as f64).round() as usize;
    format!(
        "[{}{}] {:>3.0}%",
        "#".repeat(filled),
        "-".repeat(BAR_WIDTH - filled),
        pct
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_progress_bar_bounds() {
        assert_eq!(progress_bar(0.0), format!("[{}]   0%", "-".repeat(BAR_WIDTH)));
        assert_eq!(progress_bar(100.0), format!("[{}] 100%", "#".repeat(BAR_WIDTH)));
        assert_eq!(progress_bar(250.0), progress_bar(100.0));
        assert_eq!(progress_bar(-3.0), progress_bar(0.0));
    }

    #[test]
    fn test_progress_bar_partial() {
        let bar = progress_bar(40.0);
        assert!(bar.starts_with("[########-"));
        assert!(bar.ends_with(" 40%"));
    }

    #[test]
    fn test_encode_machine_formats() {
        let value = json!({ "status": "queued", "retry_count": 0 });

        assert!(OutputFormat::Table.encode(&value).unwrap().is_none());

        let text = OutputFormat::Json.encode(&value).unwrap().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, value);

        let text = OutputFormat::Yaml.encode(&value).unwrap().unwrap();
        assert!(text.contains("status: queued"));
    }

    #[test]
    fn test_emit_only_calls_table_in_table_mode() {
        let mut called = false;
        OutputFormat::Table
            .emit(&json!([]), |_| {
                called = true;
                Ok(())
            })
            .unwrap();
        assert!(called);

        OutputFormat::Json
            .emit(&json!([]), |_| panic!("table renderer used for json"))
            .unwrap();
    }

    #[test]
    fn test_rows_table_empty_placeholder() {
        #[derive(Tabled)]
        struct Row {
            id: u32,
        }
        colored::control::set_override(false);
        assert_eq!(rows_table::<Row>(&[], "No jobs found."), "No jobs found.");
        assert!(rows_table(&[Row { id: 7 }], "none").contains('7'));
    }
}
