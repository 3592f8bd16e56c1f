use crate::buffer::SealedBatch;
use crate::pipeline::stats::PipelineStats;
use crate::pipeline::AUDIT_TARGET;
use crate::transform::{TransformPipeline, TransformedBatch};
use crate::writer::{DrainReport, Partitioner, WriterPool};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{debug, error, info};

/// Run the transform and dispatch stage of the delivery stream.
///
/// Sealed batches are transformed on the blocking pool, up to `concurrency`
/// at a time. Results are consumed in seal order, split into partition
/// groups and queued on the writer shards. Once the batcher closes the input
/// channel the writer pool is drained within `grace`.
pub async fn run_delivery(
    input: mpsc::Receiver<SealedBatch>,
    transform: Arc<TransformPipeline>,
    partitioner: Partitioner,
    pool: WriterPool,
    concurrency: usize,
    stats: Arc<PipelineStats>,
    grace: Duration,
) -> DrainReport {
    info!(concurrency = concurrency, "Delivery stage started");

    let batches = stream::unfold(input, |mut input| async move {
        input.recv().await.map(|batch| (batch, input))
    });

    let transformed = batches
        .map(|batch| {
            let transform = Arc::clone(&transform);
            let sequence = batch.sequence;
            let records = batch.len();
            async move {
                let result =
                    tokio::task::spawn_blocking(move || transform.process_batch(&batch)).await;
                (sequence, records, result)
            }
        })
        .buffered(concurrency.max(1));
    let mut transformed = std::pin::pin!(transformed);

    while let Some((sequence, records, result)) = transformed.next().await {
        match result {
            Ok(batch) => dispatch(batch, &partitioner, &pool, &stats).await,
            Err(e) => transform_failed(sequence, records, e, &stats),
        }
    }

    info!("Sealed batch channel closed, draining writers");
    pool.close(grace).await
}

async fn dispatch(
    batch: TransformedBatch,
    partitioner: &Partitioner,
    pool: &WriterPool,
    stats: &PipelineStats,
) {
    let sequence = batch.sequence;
    let failed = batch.failed_count();
    if failed > 0 {
        stats.records_routed_to_errors(failed as u64);
    }

    let groups = partitioner.group(batch);
    debug!(
        sequence = sequence,
        groups = groups.len(),
        failed_records = failed,
        "Transformed batch"
    );

    for group in groups {
        pool.dispatch(group).await;
    }
    stats.batch_flushed(sequence);
}

fn transform_failed(sequence: u64, records: usize, error: JoinError, stats: &PipelineStats) {
    stats.batch_lost(sequence, records as u64);
    error!(
        target: AUDIT_TARGET,
        sequence = sequence,
        records = records,
        error = %error,
        "Data loss: transform task failed, sealed batch dropped"
    );
}
