use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_RETRY_COUNT: u64 = 10;
const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;

/// Metrics mode value that turns the scrape endpoint on.
pub const METRICS_MODE_ON: &str = "ON";

/// One plugin entry in the pipeline document: the registered name plus a
/// free-form payload handed through to the plugin untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameConfigPair {
    pub name: String,
    #[serde(default)]
    pub config: serde_yaml::Value,
}

/// `/metrics` endpoint settings. The endpoint is served only when `mode`
/// is exactly `ON`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub addr: String,
    #[serde(default)]
    pub prefix: String,
}

impl MetricsConfig {
    pub fn enabled(&self) -> bool {
        self.mode == METRICS_MODE_ON
    }
}

/// The pipeline configuration document.
///
/// Field names match the on-disk YAML schema; unknown fields are rejected so
/// a typoed key fails loudly instead of silently using a default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Accepted for document compatibility; profile collection is left to
    /// external tooling.
    #[serde(rename = "cpu-profile", default)]
    pub cpu_profile: String,
    #[serde(rename = "pid-filepath", default)]
    pub pid_file_path: String,
    #[serde(rename = "hide-banner", default)]
    pub hide_banner: bool,
    #[serde(rename = "log-file", default)]
    pub log_file: String,
    #[serde(rename = "log-level", default)]
    pub log_level: String,
    pub importer: NameConfigPair,
    #[serde(default)]
    pub processors: Vec<NameConfigPair>,
    pub exporter: NameConfigPair,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(rename = "retry-count", default = "default_retry_count")]
    pub retry_count: u64,
    /// Delay between retry attempts, in whole milliseconds. The unsigned
    /// type makes a negative delay unrepresentable.
    #[serde(rename = "retry-delay-ms", default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_retry_count() -> u64 {
    DEFAULT_RETRY_COUNT
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

impl PipelineConfig {
    /// Parses and validates a pipeline document.
    pub fn from_yaml_str(document: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(document).context("pipeline configuration was malformed yaml")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read pipeline configuration '{}'", path.display()))?;
        Self::from_yaml_str(&content)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.log_level.is_empty() && tracing::Level::from_str(&self.log_level).is_err() {
            bail!("log level ({}) was invalid", self.log_level);
        }

        if self.importer.name.trim().is_empty() {
            bail!("importer name cannot be empty");
        }
        for (idx, processor) in self.processors.iter().enumerate() {
            if processor.name.trim().is_empty() {
                bail!("processor [{idx}] name cannot be empty");
            }
        }
        if self.exporter.name.trim().is_empty() {
            bail!("exporter name cannot be empty");
        }

        if self.metrics.enabled() {
            self.metrics
                .addr
                .parse::<SocketAddr>()
                .with_context(|| {
                    format!("metrics addr ({}) was not a socket address", self.metrics.addr)
                })?;
        }

        Ok(())
    }
}

/// Operator-supplied inputs that arrive next to the document rather than
/// inside it.
#[derive(Debug, Clone)]
pub struct PipelineArgs {
    /// Root directory holding the cursor file and the per-plugin data
    /// directories.
    pub data_dir: PathBuf,
    /// Forces the cursor to this round at init, overriding whatever the
    /// metadata file holds.
    pub next_round_override: Option<u64>,
}

impl PipelineArgs {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            next_round_override: None,
        }
    }

    pub fn with_next_round_override(mut self, round: u64) -> Self {
        self.next_round_override = Some(round);
        self
    }
}
