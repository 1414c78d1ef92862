use crate::data::BlockData;
use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics::{describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Prefix applied to pipeline metric names when the configuration leaves it
/// empty.
pub const DEFAULT_METRICS_PREFIX: &str = "blockpipe";

static TRACING_INIT: OnceLock<()> = OnceLock::new();
static RECORDER: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs a tracing subscriber (if one is not already active).
///
/// The filter honours `RUST_LOG` when present and falls back to `log_level`
/// (or `info` when that is empty). When `log_file` is set, output is
/// appended there instead of stderr. Calling this function multiple times is
/// harmless.
pub fn init_tracing(log_level: &str, log_file: Option<&Path>) -> Result<()> {
    if TRACING_INIT.get().is_some() {
        return Ok(());
    }

    let fallback = if log_level.is_empty() {
        "info"
    } else {
        log_level
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file '{}'", path.display()))?;
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .try_init();
        }
    }

    let _ = TRACING_INIT.set(());
    Ok(())
}

/// Installs the process-wide Prometheus recorder, or returns the handle of
/// the one a previous pipeline in this process already installed. `None`
/// means a foreign recorder occupies the slot and no scrape handle exists.
pub fn install_metrics_recorder() -> Option<PrometheusHandle> {
    if let Some(handle) = RECORDER.get() {
        return Some(handle.clone());
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = RECORDER.set(handle.clone());
            Some(handle)
        }
        Err(_) => None,
    }
}

/// Serves the `/metrics` scrape endpoint until the listener fails.
pub async fn serve_metrics(addr: SocketAddr, handle: PrometheusHandle) -> Result<()> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {addr}"))?;
    tracing::info!(%addr, "metrics endpoint serving");
    axum::serve(listener, app)
        .await
        .context("metrics server terminated")?;
    Ok(())
}

/// Pipeline metric names, derived once from the configured prefix.
///
/// Timers are observed only on the successful path; the retry counter is the
/// one observation made on every attempt, so failed rounds never pollute the
/// per-stage timing histograms.
#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    retry_count: String,
    importer_time: String,
    processor_time: String,
    exporter_time: String,
    block_import_time: String,
    txns_per_block: String,
    imported_round: String,
    imported_txns: String,
}

impl PipelineMetrics {
    pub fn new(prefix: &str) -> Self {
        Self {
            retry_count: format!("{prefix}_pipeline_retry_count"),
            importer_time: format!("{prefix}_importer_time_seconds"),
            processor_time: format!("{prefix}_processor_time_seconds"),
            exporter_time: format!("{prefix}_exporter_time_seconds"),
            block_import_time: format!("{prefix}_block_import_time_seconds"),
            txns_per_block: format!("{prefix}_imported_txns_per_block"),
            imported_round: format!("{prefix}_imported_round"),
            imported_txns: format!("{prefix}_imported_txns"),
        }
    }

    /// Registers descriptions with the installed recorder. Safe to call
    /// before any recorder exists; the calls are then no-ops.
    pub fn describe(&self) {
        describe_histogram!(
            self.retry_count.clone(),
            "Number of retries performed before each pipeline attempt"
        );
        describe_histogram!(
            self.importer_time.clone(),
            "Time spent fetching a block from the importer"
        );
        describe_histogram!(
            self.processor_time.clone(),
            "Time spent in each processor, labeled by processor name"
        );
        describe_histogram!(
            self.exporter_time.clone(),
            "Time spent delivering a block to the exporter"
        );
        describe_histogram!(
            self.block_import_time.clone(),
            "End-to-end round time excluding the import itself"
        );
        describe_histogram!(
            self.txns_per_block.clone(),
            "Transactions carried by each imported block"
        );
        describe_gauge!(self.imported_round.clone(), "Last round exported");
        describe_gauge!(
            self.imported_txns.clone(),
            "Transactions in the last block, labeled by transaction type"
        );
    }

    pub fn observe_retry_count(&self, retry: u64) {
        histogram!(self.retry_count.clone()).record(retry as f64);
    }

    pub fn observe_importer_time(&self, elapsed: Duration) {
        histogram!(self.importer_time.clone()).record(elapsed.as_secs_f64());
    }

    pub fn observe_processor_time(&self, name: &str, elapsed: Duration) {
        histogram!(self.processor_time.clone(), "name" => name.to_owned())
            .record(elapsed.as_secs_f64());
    }

    pub fn observe_exporter_time(&self, elapsed: Duration) {
        histogram!(self.exporter_time.clone()).record(elapsed.as_secs_f64());
    }

    /// Success-path block statistics: end-to-end time, payset size, round
    /// gauge and per-type transaction counts.
    pub fn observe_block(&self, block: &BlockData, elapsed: Duration) {
        histogram!(self.block_import_time.clone()).record(elapsed.as_secs_f64());
        histogram!(self.txns_per_block.clone()).record(block.payset().len() as f64);
        gauge!(self.imported_round.clone()).set(block.round() as f64);

        let mut by_type: HashMap<&str, u64> = HashMap::new();
        for txn in block.payset() {
            *by_type.entry(txn.txn_type.as_str()).or_default() += 1;
        }
        for (txn_type, count) in by_type {
            gauge!(self.imported_txns.clone(), "type" => txn_type.to_owned()).set(count as f64);
        }
    }
}
