use super::config::PluginConfig;
use super::stage::{Completed, InitProvider, PluginFuture, PluginMetadata, PluginMetrics};
use crate::data::BlockData;
use tokio_util::sync::CancellationToken;

/// Transform stage: receives the block from the previous stage and returns
/// the (possibly rewritten) block for the next one. Invocations are strictly
/// sequential; a processor never sees two rounds concurrently.
pub trait Processor: Send + 'static {
    fn metadata(&self) -> PluginMetadata;

    fn init<'a>(
        &'a mut self,
        shutdown: CancellationToken,
        provider: InitProvider,
        config: PluginConfig,
    ) -> PluginFuture<'a, ()>;

    fn process<'a>(&'a mut self, block: BlockData) -> PluginFuture<'a, BlockData>;

    fn close<'a>(&'a mut self) -> PluginFuture<'a, ()>;

    fn as_completed(&mut self) -> Option<&mut dyn Completed> {
        None
    }

    fn as_metrics(&self) -> Option<&dyn PluginMetrics> {
        None
    }
}

impl std::fmt::Debug for dyn Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Processor").field(&self.metadata()).finish()
    }
}
