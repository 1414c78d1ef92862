use super::config::{PipelineArgs, PipelineConfig};
use super::lifecycle::Pipeline;
use crate::plugins::PluginRegistry;
use anyhow::{bail, Context, Result};

/// Resolves the plugin names in a configuration against the registry and
/// wires the instances into a pipeline. The returned pipeline is
/// constructed but not initialized; no plugin has been touched beyond its
/// constructor.
pub fn assemble(
    config: PipelineConfig,
    args: PipelineArgs,
    registry: &PluginRegistry,
) -> Result<Pipeline> {
    config.validate()?;
    if !args.data_dir.is_dir() {
        bail!("invalid data directory '{}'", args.data_dir.display());
    }

    let importer = registry
        .new_importer(&config.importer.name)
        .with_context(|| format!("could not build importer '{}'", config.importer.name))?;
    tracing::info!(importer = %config.importer.name, "found importer");

    let mut processors = Vec::with_capacity(config.processors.len());
    for entry in &config.processors {
        let processor = registry
            .new_processor(&entry.name)
            .with_context(|| format!("could not build processor '{}'", entry.name))?;
        tracing::info!(processor = %entry.name, "found processor");
        processors.push(processor);
    }

    let exporter = registry
        .new_exporter(&config.exporter.name)
        .with_context(|| format!("could not build exporter '{}'", config.exporter.name))?;
    tracing::info!(exporter = %config.exporter.name, "found exporter");

    Ok(Pipeline::from_parts(config, args, importer, processors, exporter))
}
