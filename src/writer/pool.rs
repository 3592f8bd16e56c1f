use crate::pipeline::stats::PipelineStats;
use crate::pipeline::AUDIT_TARGET;
use crate::storage::{NotificationTopic, ObjectCreated, ObjectStore};
use crate::writer::layout::{encode_gzip, ObjectLayout};
use crate::writer::partition::PartitionGroup;
use crate::writer::retry::{put_with_retry, RetryPolicy};
use crate::writer::WriteError;
use chrono::Utc;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Everything a shard worker needs to turn a group into a stored object
pub struct WriterContext {
    pub store: Arc<dyn ObjectStore>,
    pub topic: NotificationTopic,
    pub layout: ObjectLayout,
    pub retry: RetryPolicy,
    pub stats: Arc<PipelineStats>,
    pub bucket: String,
}

#[derive(Debug, Default)]
struct Pending {
    groups: AtomicU64,
    records: AtomicU64,
}

impl Pending {
    fn add(&self, records: usize) {
        self.groups.fetch_add(1, Ordering::SeqCst);
        self.records.fetch_add(records as u64, Ordering::SeqCst);
    }

    fn done(&self, records: usize) {
        self.groups.fetch_sub(1, Ordering::SeqCst);
        self.records.fetch_sub(records as u64, Ordering::SeqCst);
    }
}

/// Outcome of closing the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub completed: bool,
    pub abandoned_groups: u64,
    pub abandoned_records: u64,
}

/// Fixed set of shard workers. A group always goes to the shard picked by
/// the hash of its prefix, so objects of one partition are written in the
/// order they were dispatched.
pub struct WriterPool {
    shards: Vec<mpsc::Sender<PartitionGroup>>,
    handles: Vec<JoinHandle<()>>,
    pending: Arc<Pending>,
    context: Arc<WriterContext>,
}

impl WriterPool {
    pub fn spawn(workers: usize, queue_depth: usize, context: WriterContext) -> Self {
        let context = Arc::new(context);
        let pending = Arc::new(Pending::default());
        let workers = workers.max(1);

        let mut shards = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for shard in 0..workers {
            let (tx, rx) = mpsc::channel(queue_depth.max(1));
            shards.push(tx);
            handles.push(tokio::spawn(run_shard(
                shard,
                rx,
                Arc::clone(&context),
                Arc::clone(&pending),
            )));
        }

        info!(workers = workers, "Writer pool started");

        Self {
            shards,
            handles,
            pending,
            context,
        }
    }

    pub fn shard_for(&self, prefix: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        prefix.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    /// Queue a group on its shard, waiting while that shard is busy
    pub async fn dispatch(&self, group: PartitionGroup) {
        let shard = self.shard_for(&group.prefix);
        let records = group.record_count();
        self.pending.add(records);

        if let Err(mpsc::error::SendError(group)) = self.shards[shard].send(group).await {
            self.pending.done(records);
            self.context.stats.records_lost(records as u64);
            error!(
                target: AUDIT_TARGET,
                shard = shard,
                prefix = %group.prefix,
                batch = group.batch_sequence,
                records = records,
                "Data loss: writer shard is gone, group dropped"
            );
        }
    }

    pub fn pending_groups(&self) -> u64 {
        self.pending.groups.load(Ordering::SeqCst)
    }

    /// Stop accepting groups and wait up to `grace` for queued writes.
    /// Whatever is still pending afterwards is abandoned and audited.
    pub async fn close(self, grace: Duration) -> DrainReport {
        let WriterPool {
            shards,
            mut handles,
            pending,
            context,
        } = self;
        drop(shards);

        let drained = tokio::time::timeout(grace, async {
            for handle in handles.iter_mut() {
                let _ = handle.await;
            }
        })
        .await
        .is_ok();

        if drained {
            info!("Writer pool drained");
            return DrainReport {
                completed: true,
                abandoned_groups: 0,
                abandoned_records: 0,
            };
        }

        for handle in &handles {
            handle.abort();
        }

        let abandoned_groups = pending.groups.load(Ordering::SeqCst);
        let abandoned_records = pending.records.load(Ordering::SeqCst);
        context.stats.records_lost(abandoned_records);
        error!(
            target: AUDIT_TARGET,
            grace_ms = grace.as_millis() as u64,
            groups = abandoned_groups,
            records = abandoned_records,
            "Data loss: shutdown grace period expired with writes pending"
        );

        DrainReport {
            completed: false,
            abandoned_groups,
            abandoned_records,
        }
    }
}

async fn run_shard(
    shard: usize,
    mut input: mpsc::Receiver<PartitionGroup>,
    context: Arc<WriterContext>,
    pending: Arc<Pending>,
) {
    debug!(shard = shard, "Writer shard started");

    while let Some(group) = input.recv().await {
        let records = group.record_count();
        write_group(&context, group).await;
        pending.done(records);
    }

    debug!(shard = shard, "Writer shard stopped");
}

/// Encode and store one group. Failures are terminal for the group and
/// end up on the audit target.
pub async fn write_group(context: &WriterContext, group: PartitionGroup) {
    let record_count = group.record_count();
    let created_at = Utc::now();
    let key = context.layout.object_key(
        &group.prefix,
        group.batch_sequence,
        created_at,
        Uuid::new_v4(),
    );

    let result = store_group(context, &key, group.records).await;
    match result {
        Ok(size_bytes) => {
            context.stats.object_written(size_bytes);
            debug!(
                key = %key,
                records = record_count,
                size_bytes = size_bytes,
                "Wrote object"
            );
            context.topic.publish(ObjectCreated {
                bucket: context.bucket.clone(),
                key,
                size_bytes,
                record_count,
                created_at,
            });
        }
        Err(e) => {
            context.stats.write_failed();
            context.stats.records_lost(record_count as u64);
            error!(
                target: AUDIT_TARGET,
                key = %key,
                batch = group.batch_sequence,
                records = record_count,
                error = %e,
                "Data loss: object write failed"
            );
        }
    }
}

async fn store_group(
    context: &WriterContext,
    key: &str,
    records: Vec<Vec<u8>>,
) -> Result<u64, WriteError> {
    let body = tokio::task::spawn_blocking(move || encode_gzip(&records))
        .await
        .map_err(|e| WriteError::Encode(std::io::Error::other(e)))??;

    let stats = Arc::clone(&context.stats);
    let attempts = put_with_retry(context.store.as_ref(), key, &body, &context.retry, || {
        stats.write_retried()
    })
    .await?;

    if attempts > 1 {
        warn!(key = key, attempts = attempts, "Object written after retries");
    }

    Ok(body.len() as u64)
}
