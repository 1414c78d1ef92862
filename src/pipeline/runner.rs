//! The round loop: one logical worker pulling, transforming and exporting
//! one round at a time, with bounded retry and cooperative cancellation.

use super::lifecycle::{CallbackSource, RunState, StageSet};
use crate::data::BlockData;
use crate::plugins::{StageError, StageKind};
use crate::runtime::fatal::ErrorLatch;
use crate::runtime::telemetry::PipelineMetrics;
use anyhow::Result;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

pub(crate) struct RunnerEnv {
    pub(crate) shutdown: CancellationToken,
    pub(crate) latch: ErrorLatch,
    pub(crate) metrics: PipelineMetrics,
    pub(crate) retry_count: u64,
    pub(crate) retry_delay: Duration,
}

/// Drives rounds until cancellation or retry exhaustion.
///
/// Any stage or callback failure latches the error and re-attempts the same
/// round from the importer; there is no partial progress within a round. The
/// retry budget resets only after a fully successful round.
pub(crate) async fn run(stages: &mut StageSet, state: &mut RunState, env: &RunnerEnv) {
    let mut retry: u64 = 0;
    loop {
        env.metrics.observe_retry_count(retry);
        if retry > env.retry_count {
            tracing::error!(
                retry_count = env.retry_count,
                "pipeline exceeded maximum retry count; stopping"
            );
            return;
        }

        if retry > 0 && !sleep_interruptible(env.retry_delay, &env.shutdown).await {
            return;
        }
        if env.shutdown.is_cancelled() {
            return;
        }

        match run_round(stages, state, &env.metrics).await {
            Ok(()) => {
                env.latch.clear();
                retry = 0;
            }
            Err(err) => {
                let chain = format!("{err:#}");
                tracing::error!(error = %chain, "pipeline round failed");
                env.latch.set(err);
                retry += 1;
            }
        }
    }
}

async fn run_round(
    stages: &mut StageSet,
    state: &mut RunState,
    metrics: &PipelineMetrics,
) -> Result<()> {
    let round = state.tracker.next_round();
    tracing::info!(round, "pipeline round");

    let import_start = Instant::now();
    let span = stages.importer_tag.span.clone();
    let mut block = match stages.importer.get_block(round).instrument(span).await {
        Ok(block) => block,
        Err(err) => {
            let name = stages.importer_tag.name.as_str();
            return Err(StageError::new(StageKind::Importer, name, err).into());
        }
    };
    metrics.observe_importer_time(import_start.elapsed());

    // Stage timing starts after the fetch so waiting on upstream block
    // availability stays out of the processing numbers.
    let stage_start = Instant::now();
    for (idx, processor) in stages.processors.iter_mut().enumerate() {
        let tag = &stages.processor_tags[idx];
        let processor_start = Instant::now();
        block = match processor.process(block).instrument(tag.span.clone()).await {
            Ok(block) => block,
            Err(err) => {
                return Err(StageError::new(StageKind::Processor, tag.name.as_str(), err).into())
            }
        };
        metrics.observe_processor_time(&tag.name, processor_start.elapsed());
    }

    let export_start = Instant::now();
    let span = stages.exporter_tag.span.clone();
    if let Err(err) = stages.exporter.receive(&block).instrument(span).await {
        let name = stages.exporter_tag.name.as_str();
        return Err(StageError::new(StageKind::Exporter, name, err).into());
    }
    tracing::info!(
        round,
        txns = block.payset().len(),
        elapsed = ?stage_start.elapsed(),
        "round exported"
    );

    // Callbacks run before the cursor commits: a callback failure retries
    // the whole round, so the exporter sees it again (at-least-once).
    run_callbacks(stages, &block).await?;

    let next_round = state.tracker.advance();
    state.metadata.next_round = next_round;
    if let Err(err) = state.store.flush(&state.metadata) {
        // The round is already exported; worst case after a crash is
        // replaying it.
        let chain = format!("{err:#}");
        tracing::error!(error = %chain, "failed to flush pipeline metadata");
    }

    metrics.observe_exporter_time(export_start.elapsed());
    // Round 0 is empty; keep it out of the block statistics.
    if next_round > 1 {
        metrics.observe_block(&block, stage_start.elapsed());
    }
    Ok(())
}

async fn run_callbacks(stages: &mut StageSet, block: &BlockData) -> Result<()> {
    for source in stages.callbacks.clone() {
        let (kind, tag) = match source {
            CallbackSource::Importer => (StageKind::Importer, stages.importer_tag.clone()),
            CallbackSource::Processor(idx) => {
                (StageKind::Processor, stages.processor_tags[idx].clone())
            }
            CallbackSource::Exporter => (StageKind::Exporter, stages.exporter_tag.clone()),
        };
        let callback = match source {
            CallbackSource::Importer => stages.importer.as_completed(),
            CallbackSource::Processor(idx) => stages.processors[idx].as_completed(),
            CallbackSource::Exporter => stages.exporter.as_completed(),
        };
        if let Some(callback) = callback {
            if let Err(err) = callback.on_complete(block).instrument(tag.span.clone()).await {
                return Err(StageError::new(kind, tag.name, err).into());
            }
        }
    }
    Ok(())
}

async fn sleep_interruptible(delay: Duration, shutdown: &CancellationToken) -> bool {
    if delay.is_zero() {
        tokio::task::yield_now().await;
        return !shutdown.is_cancelled();
    }

    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = sleep(delay) => true,
    }
}
