use crate::buffer::batch::{SealReason, SealedBatch};
use crate::buffer::batcher::Batcher;
use crate::buffer::record::Record;
use crate::pipeline::stats::PipelineStats;
use crate::pipeline::AUDIT_TARGET;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Run the batcher task.
///
/// This task is the only owner of the open batch, so every seal decision for
/// the stream is made here, one at a time. On cancellation the input channel
/// is closed, already queued records are drained and the open batch is
/// flushed before returning.
pub async fn run_batcher(
    mut input: mpsc::Receiver<Record>,
    output: mpsc::Sender<SealedBatch>,
    mut batcher: Batcher,
    stats: Arc<PipelineStats>,
    shutdown: CancellationToken,
) {
    info!("Batcher started");

    loop {
        let deadline = batcher.deadline();

        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("Shutdown requested, draining queued records");
                input.close();
                while let Some(record) = input.recv().await {
                    accept(&mut batcher, record, &output, &stats).await;
                }
                break;
            }

            result = input.recv() => {
                match result {
                    Some(record) => accept(&mut batcher, record, &output, &stats).await,
                    None => {
                        info!("Record channel closed");
                        break;
                    }
                }
            }

            _ = wait_for(deadline) => {
                if let Some(batch) = batcher.poll_deadline(Instant::now()) {
                    hand_off(batch, &output, &stats).await;
                }
            }
        }
    }

    if let Some(batch) = batcher.flush(SealReason::Shutdown) {
        info!(
            sequence = batch.sequence,
            records = batch.len(),
            "Flushing open batch on shutdown"
        );
        hand_off(batch, &output, &stats).await;
    }

    info!("Batcher shutdown complete");
}

async fn accept(
    batcher: &mut Batcher,
    record: Record,
    output: &mpsc::Sender<SealedBatch>,
    stats: &PipelineStats,
) {
    let now = Instant::now();

    // A late record never joins a batch whose interval already elapsed
    if let Some(batch) = batcher.poll_deadline(now) {
        hand_off(batch, output, stats).await;
    }

    let opening = batcher.open_sequence().is_none();
    let sealed = batcher.push(record, now);

    if opening {
        if let Some(sequence) = sealed.as_ref().map(|b| b.sequence).or(batcher.open_sequence()) {
            stats.batch_opened(sequence);
        }
    }

    if let Some(batch) = sealed {
        hand_off(batch, output, stats).await;
    }
}

async fn hand_off(batch: SealedBatch, output: &mpsc::Sender<SealedBatch>, stats: &PipelineStats) {
    debug!(
        sequence = batch.sequence,
        records = batch.len(),
        size_bytes = batch.size_bytes,
        reason = ?batch.reason,
        "Sealed batch"
    );
    stats.batch_sealed(batch.sequence, batch.reason);

    let sequence = batch.sequence;
    let records = batch.len();
    if output.send(batch).await.is_err() {
        stats.batch_lost(sequence, records as u64);
        error!(
            target: AUDIT_TARGET,
            sequence = sequence,
            records = records,
            "Data loss: transform stage is gone, sealed batch dropped"
        );
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
