#![allow(dead_code)]

use anyhow::{bail, Result};
use blockpipe::{
    BlockData, Completed, Exporter, Genesis, Importer, InitProvider, MetadataStore,
    MetricsConfig, NameConfigPair, PipelineArgs, PipelineConfig, PipelineMetadata, PluginConfig,
    PluginFuture, PluginMetadata, PluginRegistry, Processor, Transaction,
};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Failure count meaning "fail every time".
pub const ALWAYS: u64 = u64::MAX;

/// Interleaved record of stage observations, for ordering assertions.
pub type EventLog = Arc<Mutex<Vec<(String, u64)>>>;

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

pub fn new_event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn test_genesis(seed: u8) -> Genesis {
    let mut hash = [0u8; 32];
    hash[0] = seed;
    Genesis::new(hash, "testnet")
}

/// Pipeline document used by most tests: short retry delay, metrics off.
pub fn base_config() -> PipelineConfig {
    PipelineConfig {
        cpu_profile: String::new(),
        pid_file_path: String::new(),
        hide_banner: false,
        log_file: String::new(),
        log_level: String::new(),
        importer: NameConfigPair {
            name: "test-importer".to_owned(),
            config: serde_yaml::Value::Null,
        },
        processors: Vec::new(),
        exporter: NameConfigPair {
            name: "test-exporter".to_owned(),
            config: serde_yaml::Value::Null,
        },
        metrics: MetricsConfig::default(),
        retry_count: 10,
        retry_delay_ms: 10,
    }
}

pub fn with_processors(mut config: PipelineConfig, names: &[&str]) -> PipelineConfig {
    config.processors = names
        .iter()
        .map(|name| NameConfigPair {
            name: (*name).to_owned(),
            config: serde_yaml::Value::Null,
        })
        .collect();
    config
}

pub fn make_block(round: u64, txns: usize) -> BlockData {
    let payset = (0..txns)
        .map(|idx| {
            let txn_type = if idx % 2 == 0 { "pay" } else { "axfer" };
            Transaction::new(txn_type, serde_json::json!({ "round": round, "idx": idx }))
        })
        .collect();
    BlockData::new(round, payset)
}

pub fn read_metadata(data_dir: &Path) -> PipelineMetadata {
    let bytes = std::fs::read(data_dir.join("metadata.json")).expect("metadata file should exist");
    serde_json::from_slice(&bytes).expect("metadata should be valid json")
}

pub fn seed_metadata(data_dir: &Path, genesis: &Genesis, next_round: u64) {
    MetadataStore::new(data_dir)
        .flush(&PipelineMetadata {
            genesis_hash: genesis.hash_base64(),
            network: genesis.network().to_owned(),
            next_round,
        })
        .expect("seeding metadata should succeed");
}

pub async fn wait_until(
    mut predicate: impl FnMut() -> bool,
    timeout: Duration,
    what: &str,
) -> Result<()> {
    let start = Instant::now();
    loop {
        if predicate() {
            return Ok(());
        }
        if start.elapsed() > timeout {
            bail!("timed out after {timeout:?} waiting for {what}");
        }
        sleep(Duration::from_millis(10)).await;
    }
}

/// What a scripted importer does once it runs past its last available round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhenExhausted {
    /// Behave like a real chain tip: park until shutdown, then error out.
    Wait,
    /// Fail the fetch immediately, driving the pipeline into retries.
    Fail,
}

#[derive(Default)]
pub struct ImporterState {
    pub requested: Vec<u64>,
    pub initialized: bool,
    pub closed: bool,
}

/// Importer serving rounds `0..limit` with two transactions each.
pub struct ScriptedImporter {
    genesis: Genesis,
    limit: u64,
    when_exhausted: WhenExhausted,
    shutdown: Option<CancellationToken>,
    state: Arc<Mutex<ImporterState>>,
    events: Option<EventLog>,
}

impl Importer for ScriptedImporter {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::new("test-importer", "serves scripted blocks")
    }

    fn init<'a>(
        &'a mut self,
        shutdown: CancellationToken,
        _config: PluginConfig,
    ) -> PluginFuture<'a, Genesis> {
        self.shutdown = Some(shutdown);
        self.state.lock().unwrap().initialized = true;
        let genesis = self.genesis.clone();
        Box::pin(async move { Ok(genesis) })
    }

    fn get_block<'a>(&'a mut self, round: u64) -> PluginFuture<'a, BlockData> {
        let state = self.state.clone();
        let events = self.events.clone();
        let shutdown = self.shutdown.clone();
        let limit = self.limit;
        let when_exhausted = self.when_exhausted;
        Box::pin(async move {
            state.lock().unwrap().requested.push(round);
            if round >= limit {
                match (when_exhausted, shutdown) {
                    (WhenExhausted::Wait, Some(token)) => {
                        token.cancelled().await;
                        bail!("importer shutting down");
                    }
                    _ => bail!("no block available for round {round}"),
                }
            }
            if let Some(events) = events {
                events.lock().unwrap().push(("import".to_owned(), round));
            }
            Ok(make_block(round, 2))
        })
    }

    fn close<'a>(&'a mut self) -> PluginFuture<'a, ()> {
        self.state.lock().unwrap().closed = true;
        Box::pin(async { Ok(()) })
    }
}

/// Registers a scripted importer under `test-importer` and hands back its
/// observation handle.
pub fn scripted_importer(
    registry: &mut PluginRegistry,
    genesis: &Genesis,
    limit: u64,
    when_exhausted: WhenExhausted,
    events: Option<EventLog>,
) -> Arc<Mutex<ImporterState>> {
    let state = Arc::new(Mutex::new(ImporterState::default()));
    let handle = state.clone();
    let genesis = genesis.clone();
    registry.register_importer("test-importer", move || {
        Box::new(ScriptedImporter {
            genesis: genesis.clone(),
            limit,
            when_exhausted,
            shutdown: None,
            state: state.clone(),
            events: events.clone(),
        })
    });
    handle
}

#[derive(Default)]
pub struct ProcessorState {
    pub processed: Vec<u64>,
    pub fail_remaining: HashMap<u64, u64>,
    pub fail_init: bool,
    pub init_round: Option<u64>,
    pub closed: bool,
}

/// Processor that passes blocks through unchanged, with per-round scripted
/// failures.
pub struct PassthroughProcessor {
    name: String,
    state: Arc<Mutex<ProcessorState>>,
    events: Option<EventLog>,
}

impl Processor for PassthroughProcessor {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::new(self.name.clone(), "passes blocks through")
    }

    fn init<'a>(
        &'a mut self,
        _shutdown: CancellationToken,
        provider: InitProvider,
        _config: PluginConfig,
    ) -> PluginFuture<'a, ()> {
        let mut state = self.state.lock().unwrap();
        state.init_round = Some(provider.next_round());
        let fail_init = state.fail_init;
        drop(state);
        Box::pin(async move {
            if fail_init {
                bail!("scripted processor init failure");
            }
            Ok(())
        })
    }

    fn process<'a>(&'a mut self, block: BlockData) -> PluginFuture<'a, BlockData> {
        let state = self.state.clone();
        let events = self.events.clone();
        let name = self.name.clone();
        Box::pin(async move {
            let round = block.round();
            {
                let mut state = state.lock().unwrap();
                if let Some(remaining) = state.fail_remaining.get_mut(&round) {
                    if *remaining == ALWAYS {
                        bail!("scripted processor failure at round {round}");
                    }
                    if *remaining > 0 {
                        *remaining -= 1;
                        bail!("scripted processor failure at round {round}");
                    }
                }
                state.processed.push(round);
            }
            if let Some(events) = events {
                events
                    .lock()
                    .unwrap()
                    .push((format!("process:{name}"), round));
            }
            Ok(block)
        })
    }

    fn close<'a>(&'a mut self) -> PluginFuture<'a, ()> {
        self.state.lock().unwrap().closed = true;
        Box::pin(async { Ok(()) })
    }
}

/// Registers a passthrough processor under `name`. `fail` lists
/// `(round, failure_count)` pairs; use [`ALWAYS`] for a permanent failure.
pub fn passthrough_processor(
    registry: &mut PluginRegistry,
    name: &str,
    fail: &[(u64, u64)],
    events: Option<EventLog>,
) -> Arc<Mutex<ProcessorState>> {
    let state = Arc::new(Mutex::new(ProcessorState {
        fail_remaining: fail.iter().copied().collect(),
        ..ProcessorState::default()
    }));
    let handle = state.clone();
    let name = name.to_owned();
    registry.register_processor(name.clone(), move || {
        Box::new(PassthroughProcessor {
            name: name.clone(),
            state: state.clone(),
            events: events.clone(),
        })
    });
    handle
}

#[derive(Default)]
pub struct ExporterState {
    /// Rounds successfully accepted.
    pub received: Vec<u64>,
    /// Every receive invocation, including failed ones.
    pub receive_attempts: Vec<u64>,
    /// Rounds whose completion callback ran successfully.
    pub completed: Vec<u64>,
    pub fail_receive: HashMap<u64, u64>,
    pub fail_complete: HashMap<u64, u64>,
    pub init_round: Option<u64>,
    pub closed: bool,
}

#[derive(Default)]
pub struct ExporterOptions {
    /// Expose the `Completed` capability.
    pub callback: bool,
    pub fail_receive: Vec<(u64, u64)>,
    pub fail_complete: Vec<(u64, u64)>,
    pub events: Option<EventLog>,
}

pub struct RecordingExporter {
    callback: bool,
    state: Arc<Mutex<ExporterState>>,
    events: Option<EventLog>,
}

impl Exporter for RecordingExporter {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::new("test-exporter", "records received rounds")
    }

    fn init<'a>(
        &'a mut self,
        _shutdown: CancellationToken,
        provider: InitProvider,
        _config: PluginConfig,
    ) -> PluginFuture<'a, ()> {
        self.state.lock().unwrap().init_round = Some(provider.next_round());
        Box::pin(async { Ok(()) })
    }

    fn receive<'a>(&'a mut self, block: &'a BlockData) -> PluginFuture<'a, ()> {
        let state = self.state.clone();
        let events = self.events.clone();
        let round = block.round();
        Box::pin(async move {
            {
                let mut state = state.lock().unwrap();
                state.receive_attempts.push(round);
                if let Some(remaining) = state.fail_remaining_receive(round) {
                    bail!("scripted exporter failure at round {round}: {remaining} left");
                }
                state.received.push(round);
            }
            if let Some(events) = events {
                events.lock().unwrap().push(("receive".to_owned(), round));
            }
            Ok(())
        })
    }

    fn close<'a>(&'a mut self) -> PluginFuture<'a, ()> {
        self.state.lock().unwrap().closed = true;
        Box::pin(async { Ok(()) })
    }

    fn as_completed(&mut self) -> Option<&mut dyn Completed> {
        if self.callback {
            Some(self)
        } else {
            None
        }
    }
}

impl ExporterState {
    fn fail_remaining_receive(&mut self, round: u64) -> Option<u64> {
        take_failure(&mut self.fail_receive, round)
    }

    fn fail_remaining_complete(&mut self, round: u64) -> Option<u64> {
        take_failure(&mut self.fail_complete, round)
    }
}

/// Consumes one scripted failure for `round`, returning how many were left
/// beforehand. `None` means the call should succeed.
fn take_failure(failures: &mut HashMap<u64, u64>, round: u64) -> Option<u64> {
    match failures.get_mut(&round) {
        Some(remaining) if *remaining == ALWAYS => Some(ALWAYS),
        Some(remaining) if *remaining > 0 => {
            let left = *remaining;
            *remaining -= 1;
            Some(left)
        }
        _ => None,
    }
}

impl Completed for RecordingExporter {
    fn on_complete<'a>(&'a mut self, block: &'a BlockData) -> PluginFuture<'a, ()> {
        let state = self.state.clone();
        let events = self.events.clone();
        let round = block.round();
        Box::pin(async move {
            {
                let mut state = state.lock().unwrap();
                if let Some(remaining) = state.fail_remaining_complete(round) {
                    bail!("scripted callback failure at round {round}: {remaining} left");
                }
                state.completed.push(round);
            }
            if let Some(events) = events {
                events.lock().unwrap().push(("complete".to_owned(), round));
            }
            Ok(())
        })
    }
}

/// Registers a recording exporter under `test-exporter`.
pub fn recording_exporter(
    registry: &mut PluginRegistry,
    options: ExporterOptions,
) -> Arc<Mutex<ExporterState>> {
    let state = Arc::new(Mutex::new(ExporterState {
        fail_receive: options.fail_receive.iter().copied().collect(),
        fail_complete: options.fail_complete.iter().copied().collect(),
        ..ExporterState::default()
    }));
    let handle = state.clone();
    let callback = options.callback;
    let events = options.events;
    registry.register_exporter("test-exporter", move || {
        Box::new(RecordingExporter {
            callback,
            state: state.clone(),
            events: events.clone(),
        })
    });
    handle
}

pub fn assert_is_contiguous(rounds: &[u64]) {
    for window in rounds.windows(2) {
        if let [lhs, rhs] = window {
            assert_eq!(rhs, &(lhs + 1), "rounds must increase monotonically");
        }
    }
}

pub fn pipeline_args(data_dir: &Path) -> PipelineArgs {
    PipelineArgs::new(data_dir)
}
