use super::config::PluginConfig;
use super::stage::{Completed, InitProvider, PluginFuture, PluginMetadata, PluginMetrics};
use crate::data::BlockData;
use tokio_util::sync::CancellationToken;

/// Sink stage: consumes the fully processed block. A round only commits
/// (cursor advance + flush) after `receive` returns success, so delivery is
/// at-least-once: the same block may be received again after a crash or a
/// failed completion callback.
pub trait Exporter: Send + 'static {
    fn metadata(&self) -> PluginMetadata;

    fn init<'a>(
        &'a mut self,
        shutdown: CancellationToken,
        provider: InitProvider,
        config: PluginConfig,
    ) -> PluginFuture<'a, ()>;

    fn receive<'a>(&'a mut self, block: &'a BlockData) -> PluginFuture<'a, ()>;

    fn close<'a>(&'a mut self) -> PluginFuture<'a, ()>;

    fn as_completed(&mut self) -> Option<&mut dyn Completed> {
        None
    }

    fn as_metrics(&self) -> Option<&dyn PluginMetrics> {
        None
    }
}

impl std::fmt::Debug for dyn Exporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Exporter").field(&self.metadata()).finish()
    }
}
