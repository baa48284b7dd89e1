//! Saved CLI settings.
//!
//! Settings live in `<config dir>/backoffice/cli.toml` (override with
//! `BACKOFFICE_CLI_CONFIG`). Only known keys are accepted and each is
//! validated on `set`, so a bad file is caught when written, not on the
//! next job submission. Command-line flags always win over saved values.

use anyhow::{bail, Context, Result};
use clap::{Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::output::{self, OutputFormat};

/// Environment variable pointing at an alternate settings file.
const SETTINGS_PATH_ENV: &str = "BACKOFFICE_CLI_CONFIG";

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Save a setting
    Set { key: SettingKey, value: String },

    /// Remove a saved setting
    Unset { key: SettingKey },

    /// Show saved settings
    Show,

    /// Print the settings file location
    Path,
}

/// Keys understood by `backoffice config`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SettingKey {
    /// Base URL of the job engine API
    ApiUrl,
    /// Account used when `--account` is omitted
    Account,
    /// Output format used when `--output` is omitted
    Output,
}

impl SettingKey {
    fn name(self) -> &'static str {
        match self {
            Self::ApiUrl => "api-url",
            Self::Account => "account",
            Self::Output => "output",
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputFormat>,
}

impl Settings {
    pub fn path() -> Result<PathBuf> {
        if let Some(path) = std::env::var_os(SETTINGS_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }
        let dir = dirs::config_dir().context("No config directory for this user")?;
        Ok(dir.join("backoffice").join("cli.toml"))
    }

    /// Saved settings, or defaults when the file is missing or unreadable.
    pub fn load_or_default() -> Self {
        Self::path()
            .and_then(|path| Self::read(&path))
            .unwrap_or_else(|e| {
                output::warning(&format!("ignoring saved settings: {:#}", e));
                Self::default()
            })
    }

    pub fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        std::fs::write(path, toml::to_string(self)?)
            .with_context(|| format!("writing {}", path.display()))
    }

    pub fn set(&mut self, key: SettingKey, value: &str) -> Result<()> {
        match key {
            SettingKey::ApiUrl => {
                let url = value.trim_end_matches('/');
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    bail!("api-url must start with http:// or https://, got '{}'", value);
                }
                self.api_url = Some(url.to_string());
            }
            SettingKey::Account => {
                let id: i64 = value
                    .parse()
                    .with_context(|| format!("account must be a numeric id, got '{}'", value))?;
                if id <= 0 {
                    bail!("account must be positive, got {}", id);
                }
                self.account = Some(id);
            }
            SettingKey::Output => {
                let format = OutputFormat::from_str(value, true)
                    .map_err(|_| anyhow::anyhow!("output must be table, json or yaml"))?;
                self.output = Some(format);
            }
        }
        Ok(())
    }

    /// Clear a key; returns whether it was set.
    pub fn unset(&mut self, key: SettingKey) -> bool {
        match key {
            SettingKey::ApiUrl => self.api_url.take().is_some(),
            SettingKey::Account => self.account.take().is_some(),
            SettingKey::Output => self.output.take().is_some(),
        }
    }

    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

pub async fn execute(cmd: ConfigCommands, format: OutputFormat) -> Result<()> {
    let path = Settings::path()?;

    match cmd {
        ConfigCommands::Set { key, value } => {
            let mut settings = Settings::read(&path)?;
            settings.set(key, &value)?;
            settings.write(&path)?;
            format.emit(&settings, |_| {
                output::success(&format!("Saved {} to {}", key.name(), path.display()));
                Ok(())
            })?;
        }

        ConfigCommands::Unset { key } => {
            let mut settings = Settings::read(&path)?;
            if settings.unset(key) {
                settings.write(&path)?;
                output::success(&format!("Removed {}", key.name()));
            } else {
                output::note(&format!("{} was not set", key.name()));
            }
        }

        ConfigCommands::Show => {
            let settings = Settings::read(&path)?;
            format.emit(&settings, |s| {
                output::section("Saved settings");
                if s.is_empty() {
                    output::note("nothing saved; built-in defaults apply");
                    return Ok(());
                }
                if let Some(url) = &s.api_url {
                    output::field("api-url", url);
                }
                if let Some(account) = s.account {
                    output::field("account", account);
                }
                if let Some(fmt) = s.output {
                    output::field("output", format!("{:?}", fmt).to_lowercase());
                }
                Ok(())
            })?;
        }

        ConfigCommands::Path => println!("{}", path.display()),
    }

    Ok(())
}
