pub mod data;
pub mod pipeline;
pub mod plugins;
pub mod runtime;

pub use data::{BlockData, Genesis, Transaction};
pub use pipeline::assembler::assemble;
pub use pipeline::config::{MetricsConfig, NameConfigPair, PipelineArgs, PipelineConfig};
pub use pipeline::lifecycle::Pipeline;
pub use pipeline::metadata::{MetadataStore, PipelineMetadata};
pub use plugins::{
    Completed, Exporter, Importer, InitProvider, PluginConfig, PluginFuture, PluginMetadata,
    PluginMetrics, PluginRegistry, Processor, StageError, StageKind,
};
pub use runtime::progress::RoundTracker;
pub use runtime::telemetry::{
    init_tracing, install_metrics_recorder, serve_metrics, PipelineMetrics,
    DEFAULT_METRICS_PREFIX,
};
