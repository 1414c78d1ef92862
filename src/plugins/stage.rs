use crate::data::{BlockData, Genesis};
use crate::runtime::progress::RoundTracker;
use anyhow::Error as AnyError;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Future returned by every plugin entry point. Boxed so the stage traits
/// stay object-safe and plugins can be held as trait objects by the pipeline.
pub type PluginFuture<'a, T> = BoxFuture<'a, anyhow::Result<T>>;

/// The three roles a plugin can occupy in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Importer,
    Processor,
    Exporter,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Importer => "importer",
            StageKind::Processor => "processor",
            StageKind::Exporter => "exporter",
        }
    }
}

impl core::fmt::Display for StageKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error surfaced by a plugin during a round, tagged with the stage that
/// produced it. This is what the pipeline latches as its last error.
#[derive(Debug)]
pub struct StageError {
    kind: StageKind,
    plugin: String,
    source: AnyError,
}

impl StageError {
    pub fn new(kind: StageKind, plugin: impl Into<String>, source: AnyError) -> Self {
        Self {
            kind,
            plugin: plugin.into(),
            source,
        }
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn into_source(self) -> AnyError {
        self.source
    }
}

impl core::fmt::Display for StageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} ({}) error: {}", self.kind, self.plugin, self.source)
    }
}

impl std::error::Error for StageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Identity a plugin reports about itself.
#[derive(Debug, Clone)]
pub struct PluginMetadata {
    pub name: String,
    pub description: String,
}

impl PluginMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Optional capability: a post-export hook invoked with the block after the
/// exporter accepted it, before the cursor advances to the next round.
pub trait Completed: Send {
    fn on_complete<'a>(&'a mut self, block: &'a BlockData) -> PluginFuture<'a, ()>;
}

/// Optional capability: lets a plugin register its own metric descriptions
/// under the pipeline's configured prefix. Registration happens once, at
/// init, before the worker starts.
pub trait PluginMetrics {
    fn register_metrics(&self, prefix: &str);
}

/// Handed to processors and the exporter at init time.
///
/// Carries the chain genesis and a live view of the pipeline cursor: the
/// tracker is the one the runner advances, so a stage that keeps the provider
/// observes every round transition.
#[derive(Debug, Clone)]
pub struct InitProvider {
    genesis: Genesis,
    round: Arc<RoundTracker>,
}

impl InitProvider {
    pub(crate) fn new(genesis: Genesis, round: Arc<RoundTracker>) -> Self {
        Self { genesis, round }
    }

    pub fn genesis(&self) -> &Genesis {
        &self.genesis
    }

    /// The round the pipeline will attempt next. Advances as rounds commit.
    pub fn next_round(&self) -> u64 {
        self.round.next_round()
    }
}
