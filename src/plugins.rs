pub mod config;
pub mod exporter;
pub mod importer;
pub mod processor;
pub mod registry;
pub mod stage;

pub use config::PluginConfig;
pub use exporter::Exporter;
pub use importer::Importer;
pub use processor::Processor;
pub use registry::PluginRegistry;
pub use stage::{
    Completed, InitProvider, PluginFuture, PluginMetadata, PluginMetrics, StageError, StageKind,
};
