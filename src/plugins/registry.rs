use super::exporter::Exporter;
use super::importer::Importer;
use super::processor::Processor;
use anyhow::{bail, Result};
use std::collections::HashMap;

type ImporterCtor = Box<dyn Fn() -> Box<dyn Importer> + Send + Sync>;
type ProcessorCtor = Box<dyn Fn() -> Box<dyn Processor> + Send + Sync>;
type ExporterCtor = Box<dyn Fn() -> Box<dyn Exporter> + Send + Sync>;

/// Name-to-constructor maps for the three plugin kinds. The assembler
/// resolves the names in a pipeline document against one of these.
#[derive(Default)]
pub struct PluginRegistry {
    importers: HashMap<String, ImporterCtor>,
    processors: HashMap<String, ProcessorCtor>,
    exporters: HashMap<String, ExporterCtor>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_importer<F>(&mut self, name: impl Into<String>, ctor: F)
    where
        F: Fn() -> Box<dyn Importer> + Send + Sync + 'static,
    {
        self.importers.insert(name.into(), Box::new(ctor));
    }

    pub fn register_processor<F>(&mut self, name: impl Into<String>, ctor: F)
    where
        F: Fn() -> Box<dyn Processor> + Send + Sync + 'static,
    {
        self.processors.insert(name.into(), Box::new(ctor));
    }

    pub fn register_exporter<F>(&mut self, name: impl Into<String>, ctor: F)
    where
        F: Fn() -> Box<dyn Exporter> + Send + Sync + 'static,
    {
        self.exporters.insert(name.into(), Box::new(ctor));
    }

    pub fn new_importer(&self, name: &str) -> Result<Box<dyn Importer>> {
        match self.importers.get(name) {
            Some(ctor) => Ok(ctor()),
            None => bail!("no importer registered under '{name}'"),
        }
    }

    pub fn new_processor(&self, name: &str) -> Result<Box<dyn Processor>> {
        match self.processors.get(name) {
            Some(ctor) => Ok(ctor()),
            None => bail!("no processor registered under '{name}'"),
        }
    }

    pub fn new_exporter(&self, name: &str) -> Result<Box<dyn Exporter>> {
        match self.exporters.get(name) {
            Some(ctor) => Ok(ctor()),
            None => bail!("no exporter registered under '{name}'"),
        }
    }
}
