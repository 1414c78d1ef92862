//! Pipeline lifecycle: init, start, stop, wait and error observation.

use super::config::{PipelineArgs, PipelineConfig};
use super::metadata::{MetadataStore, PipelineMetadata};
use super::runner::{self, RunnerEnv};
use crate::plugins::{Exporter, Importer, InitProvider, PluginConfig, Processor, StageKind};
use crate::runtime::fatal::ErrorLatch;
use crate::runtime::progress::RoundTracker;
use crate::runtime::telemetry::{self, PipelineMetrics, DEFAULT_METRICS_PREFIX};
use anyhow::{anyhow, bail, Context, Result};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Name and tracing span of one wired plugin. The span tags every log line
/// the stage emits with `{kind, name}` so downstream log pipelines can
/// demultiplex a shared sink.
#[derive(Debug, Clone)]
pub(crate) struct StageTag {
    pub(crate) name: String,
    pub(crate) span: tracing::Span,
}

impl StageTag {
    fn new(kind: StageKind, name: &str) -> Self {
        Self {
            name: name.to_owned(),
            span: tracing::info_span!("plugin", kind = %kind, name = %name),
        }
    }
}

/// Which wired stage contributed a completion callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallbackSource {
    Importer,
    Processor(usize),
    Exporter,
}

/// The wired stages plus the callback registrations discovered at init.
/// Held behind one lock: the worker owns it for the duration of the run and
/// `stop` reclaims it afterwards to fan out the closes.
pub(crate) struct StageSet {
    pub(crate) importer: Box<dyn Importer>,
    pub(crate) importer_tag: StageTag,
    pub(crate) processors: Vec<Box<dyn Processor>>,
    pub(crate) processor_tags: Vec<StageTag>,
    pub(crate) exporter: Box<dyn Exporter>,
    pub(crate) exporter_tag: StageTag,
    pub(crate) callbacks: Vec<CallbackSource>,
}

/// Cursor state the runner mutates: the store, the record it flushes, and
/// the shared tracker stages observe through their init provider.
pub(crate) struct RunState {
    pub(crate) store: MetadataStore,
    pub(crate) metadata: PipelineMetadata,
    pub(crate) tracker: Arc<RoundTracker>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleState {
    Constructed,
    Initialized,
    Running,
    Stopped,
}

/// A wired pipeline instance. Transitions one way through
/// constructed → initialized → running → stopped.
pub struct Pipeline {
    cfg: PipelineConfig,
    args: PipelineArgs,
    shutdown: CancellationToken,
    stages: Arc<Mutex<StageSet>>,
    latch: ErrorLatch,
    metrics: Option<PipelineMetrics>,
    run_state: Option<RunState>,
    worker: Option<JoinHandle<()>>,
    state: LifecycleState,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").field("state", &self.state).finish()
    }
}

impl Pipeline {
    pub(crate) fn from_parts(
        cfg: PipelineConfig,
        args: PipelineArgs,
        importer: Box<dyn Importer>,
        processors: Vec<Box<dyn Processor>>,
        exporter: Box<dyn Exporter>,
    ) -> Self {
        let importer_tag = StageTag::new(StageKind::Importer, &importer.metadata().name);
        let processor_tags = processors
            .iter()
            .map(|p| StageTag::new(StageKind::Processor, &p.metadata().name))
            .collect();
        let exporter_tag = StageTag::new(StageKind::Exporter, &exporter.metadata().name);

        Self {
            cfg,
            args,
            shutdown: CancellationToken::new(),
            stages: Arc::new(Mutex::new(StageSet {
                importer,
                importer_tag,
                processors,
                processor_tags,
                exporter,
                exporter_tag,
                callbacks: Vec::new(),
            })),
            latch: ErrorLatch::new(),
            metrics: None,
            run_state: None,
            worker: None,
            state: LifecycleState::Constructed,
        }
    }

    /// Clone of the root shutdown token, for callers that integrate the
    /// pipeline with their own signal handling.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Prepares every stage for processing: plugin inits, cursor load and
    /// genesis verification, capability discovery, metrics wiring.
    ///
    /// Single-call: a second invocation is an error.
    pub async fn init(&mut self) -> Result<()> {
        if self.state != LifecycleState::Constructed {
            bail!("pipeline init called more than once");
        }
        tracing::info!("starting pipeline initialization");

        if self.cfg.metrics.prefix.is_empty() {
            self.cfg.metrics.prefix = DEFAULT_METRICS_PREFIX.to_owned();
        }
        let prometheus = if self.cfg.metrics.enabled() {
            telemetry::install_metrics_recorder()
        } else {
            None
        };
        let metrics = PipelineMetrics::new(&self.cfg.metrics.prefix);
        metrics.describe();

        if !self.cfg.pid_file_path.is_empty() {
            create_pid_file(Path::new(&self.cfg.pid_file_path))?;
        }

        let mut stages = self.stages.lock().await;

        // Importer first: the genesis it reports anchors everything else.
        let importer_name = stages.importer_tag.name.clone();
        let payload = serde_yaml::to_string(&self.cfg.importer.config)
            .context("could not serialize importer config")?;
        let plugin_config = PluginConfig::for_stage(
            &self.args.data_dir,
            StageKind::Importer,
            &importer_name,
            payload,
        );
        let span = stages.importer_tag.span.clone();
        let genesis = stages
            .importer
            .init(self.shutdown.clone(), plugin_config)
            .instrument(span)
            .await
            .with_context(|| format!("could not initialize importer ({importer_name})"))?;

        let genesis_hash = genesis.hash_base64();
        let initial = PipelineMetadata {
            genesis_hash: genesis_hash.clone(),
            network: genesis.network().to_owned(),
            next_round: 0,
        };
        let store = MetadataStore::new(&self.args.data_dir);
        let mut metadata = store
            .load_or_create(&initial)
            .context("could not read pipeline metadata")?;
        if metadata.genesis_hash != genesis_hash {
            bail!(
                "genesis hash in metadata does not match expected value: actual {}, expected {}",
                metadata.genesis_hash,
                genesis_hash
            );
        }
        if let Some(round) = self.args.next_round_override {
            tracing::info!(
                from = metadata.next_round,
                to = round,
                "overriding next round"
            );
            metadata.next_round = round;
        }
        tracing::info!(importer = %importer_name, "initialized importer");

        let tracker = Arc::new(RoundTracker::new(metadata.next_round));
        let provider = InitProvider::new(genesis, tracker.clone());

        for idx in 0..stages.processors.len() {
            let name = stages.processor_tags[idx].name.clone();
            let payload = serde_yaml::to_string(&self.cfg.processors[idx].config)
                .with_context(|| format!("could not serialize processor ({name}) config"))?;
            let plugin_config = PluginConfig::for_stage(
                &self.args.data_dir,
                StageKind::Processor,
                &name,
                payload,
            );
            let span = stages.processor_tags[idx].span.clone();
            stages.processors[idx]
                .init(self.shutdown.clone(), provider.clone(), plugin_config)
                .instrument(span)
                .await
                .with_context(|| format!("could not initialize processor ({name})"))?;
            tracing::info!(processor = %name, "initialized processor");
        }

        let exporter_name = stages.exporter_tag.name.clone();
        let payload = serde_yaml::to_string(&self.cfg.exporter.config)
            .context("could not serialize exporter config")?;
        let plugin_config = PluginConfig::for_stage(
            &self.args.data_dir,
            StageKind::Exporter,
            &exporter_name,
            payload,
        );
        let span = stages.exporter_tag.span.clone();
        stages
            .exporter
            .init(self.shutdown.clone(), provider.clone(), plugin_config)
            .instrument(span)
            .await
            .with_context(|| format!("could not initialize exporter ({exporter_name})"))?;
        tracing::info!(exporter = %exporter_name, "initialized exporter");

        // Capability discovery: optional interfaces, absence is not an error.
        let mut callbacks = Vec::new();
        if stages.importer.as_completed().is_some() {
            callbacks.push(CallbackSource::Importer);
        }
        for idx in 0..stages.processors.len() {
            if stages.processors[idx].as_completed().is_some() {
                callbacks.push(CallbackSource::Processor(idx));
            }
        }
        if stages.exporter.as_completed().is_some() {
            callbacks.push(CallbackSource::Exporter);
        }
        stages.callbacks = callbacks;

        let prefix = self.cfg.metrics.prefix.clone();
        if let Some(plugin_metrics) = stages.importer.as_metrics() {
            plugin_metrics.register_metrics(&prefix);
        }
        for processor in &stages.processors {
            if let Some(plugin_metrics) = processor.as_metrics() {
                plugin_metrics.register_metrics(&prefix);
            }
        }
        if let Some(plugin_metrics) = stages.exporter.as_metrics() {
            plugin_metrics.register_metrics(&prefix);
        }

        drop(stages);

        if self.cfg.metrics.enabled() {
            let addr: SocketAddr = self.cfg.metrics.addr.parse().with_context(|| {
                format!("metrics addr ({}) was not a socket address", self.cfg.metrics.addr)
            })?;
            match prometheus {
                Some(handle) => {
                    tokio::spawn(async move {
                        if let Err(err) = telemetry::serve_metrics(addr, handle).await {
                            let chain = format!("{err:#}");
                            tracing::error!(error = %chain, "metrics endpoint failed");
                        }
                    });
                }
                None => tracing::warn!(
                    "another metrics recorder is already installed; scrape endpoint not started"
                ),
            }
        }

        self.metrics = Some(metrics);
        self.run_state = Some(RunState {
            store,
            metadata,
            tracker,
        });
        self.state = LifecycleState::Initialized;
        Ok(())
    }

    /// Spawns the round-loop worker and returns immediately.
    pub fn start(&mut self) -> Result<()> {
        if self.state != LifecycleState::Initialized {
            bail!("pipeline must be initialized before start");
        }
        let (Some(run_state), Some(metrics)) = (self.run_state.take(), self.metrics.clone())
        else {
            bail!("pipeline must be initialized before start");
        };

        let stages = Arc::clone(&self.stages);
        let env = RunnerEnv {
            shutdown: self.shutdown.clone(),
            latch: self.latch.clone(),
            metrics,
            retry_count: self.cfg.retry_count,
            retry_delay: self.cfg.retry_delay(),
        };
        self.worker = Some(tokio::spawn(async move {
            let mut run_state = run_state;
            let mut stages = stages.lock().await;
            runner::run(&mut stages, &mut run_state, &env).await;
            tracing::info!("pipeline worker stopped");
        }));
        self.state = LifecycleState::Running;
        Ok(())
    }

    /// Blocks until the worker exits. A panic inside a stage surfaces here
    /// as a latched fatal error instead of crashing the process; the worker
    /// is not restarted. Waiting on an already-finished worker is a no-op.
    pub async fn wait(&mut self) {
        if let Some(worker) = self.worker.take() {
            match worker.await {
                Ok(()) => {}
                Err(err) if err.is_panic() => {
                    tracing::error!(error = %err, "pipeline worker panicked");
                    self.latch.set(anyhow!("pipeline worker panicked: {err}"));
                }
                Err(err) => {
                    tracing::error!(error = %err, "pipeline worker was aborted");
                }
            }
        }
    }

    /// Requests a graceful stop: cancels the shared token, waits for the
    /// worker, removes the PID file and closes every stage in declaration
    /// order. Close failures are logged and do not stop the fan-out.
    pub async fn stop(&mut self) {
        if self.state == LifecycleState::Stopped {
            return;
        }
        self.shutdown.cancel();
        self.wait().await;

        if !self.cfg.pid_file_path.is_empty() {
            if let Err(err) = fs::remove_file(&self.cfg.pid_file_path) {
                tracing::error!(
                    path = %self.cfg.pid_file_path,
                    error = %err,
                    "could not remove pid file"
                );
            }
        }

        let mut stages = self.stages.lock().await;
        let span = stages.importer_tag.span.clone();
        if let Err(err) = stages.importer.close().instrument(span).await {
            let chain = format!("{err:#}");
            tracing::error!(
                importer = %stages.importer_tag.name,
                error = %chain,
                "importer error on close"
            );
        }
        for idx in 0..stages.processors.len() {
            let span = stages.processor_tags[idx].span.clone();
            if let Err(err) = stages.processors[idx].close().instrument(span).await {
                let chain = format!("{err:#}");
                tracing::error!(
                    processor = %stages.processor_tags[idx].name,
                    error = %chain,
                    "processor error on close"
                );
            }
        }
        let span = stages.exporter_tag.span.clone();
        if let Err(err) = stages.exporter.close().instrument(span).await {
            let chain = format!("{err:#}");
            tracing::error!(
                exporter = %stages.exporter_tag.name,
                error = %chain,
                "exporter error on close"
            );
        }
        self.state = LifecycleState::Stopped;
    }

    /// Latest latched round error, cleared by the next successful round.
    pub fn error(&self) -> Option<Arc<anyhow::Error>> {
        self.latch.get()
    }
}

fn create_pid_file(path: &Path) -> Result<()> {
    fs::write(path, format!("{}\n", std::process::id()))
        .with_context(|| format!("failed to create pid file '{}'", path.display()))?;
    tracing::info!(path = %path.display(), "created pid file");
    Ok(())
}
