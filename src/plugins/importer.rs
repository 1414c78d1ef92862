use super::config::PluginConfig;
use super::stage::{Completed, PluginFuture, PluginMetadata, PluginMetrics};
use crate::data::{BlockData, Genesis};
use tokio_util::sync::CancellationToken;

/// Source stage: produces the block for a requested round.
///
/// `get_block` may block for as long as it takes the round to become
/// available upstream; a cooperative implementation watches the token it was
/// handed at init and returns promptly once shutdown is requested.
pub trait Importer: Send + 'static {
    fn metadata(&self) -> PluginMetadata;

    /// Called exactly once before any `get_block`. Returns the chain genesis
    /// the cursor file is verified against.
    fn init<'a>(
        &'a mut self,
        shutdown: CancellationToken,
        config: PluginConfig,
    ) -> PluginFuture<'a, Genesis>;

    fn get_block<'a>(&'a mut self, round: u64) -> PluginFuture<'a, BlockData>;

    /// Called at most once, during pipeline shutdown.
    fn close<'a>(&'a mut self) -> PluginFuture<'a, ()>;

    /// Optional completion capability, discovered at wiring time.
    fn as_completed(&mut self) -> Option<&mut dyn Completed> {
        None
    }

    /// Optional metrics capability, discovered at wiring time.
    fn as_metrics(&self) -> Option<&dyn PluginMetrics> {
        None
    }
}

impl std::fmt::Debug for dyn Importer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Importer").field(&self.metadata()).finish()
    }
}
