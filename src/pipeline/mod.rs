pub mod backpressure;
pub mod runner;
pub mod stats;

pub use backpressure::{BackpressureHandler, OfferError};
pub use runner::run_delivery;
pub use stats::{PipelineStats, StatsSnapshot};

use crate::archive::{run_pruner, ArchiveError, BusArchive};
use crate::buffer::{run_batcher, Batcher, BufferPolicy};
use crate::config::types::Config;
use crate::ingress::api::{AppState, BufferStatus};
use crate::ingress::{EventPattern, Ingress, IngressParts};
use crate::parameters::{event_bus_arn, ParameterSet};
use crate::schema::SchemaRegistry;
use crate::storage::{NotificationTopic, ObjectCreated, ObjectStore};
use crate::transform::{QueryParseError, TransformPipeline};
use crate::writer::{
    DrainReport, ObjectLayout, Partitioner, RetryPolicy, TemplateError, WriterContext, WriterPool,
};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Log target for data-loss and abandoned-write records
pub const AUDIT_TARGET: &str = "pubsub::audit";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid metadata query: {0}")]
    Query(#[from] QueryParseError),

    #[error("invalid prefix template: {0}")]
    Template(#[from] TemplateError),

    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("pipeline task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone)]
pub struct ShutdownReport {
    pub drain: DrainReport,
    pub stats: StatsSnapshot,
}

/// The running bus and delivery stream: ingress, batcher, transform stage,
/// writer shards and (optionally) the archive pruner.
pub struct Pipeline {
    ingress: Arc<Ingress>,
    stats: Arc<PipelineStats>,
    schemas: Arc<SchemaRegistry>,
    parameters: Arc<ParameterSet>,
    topic: NotificationTopic,
    archive: Option<Arc<BusArchive>>,
    app_state: AppState,
    shutdown: CancellationToken,
    batcher: JoinHandle<()>,
    delivery: JoinHandle<DrainReport>,
    pruner: Option<JoinHandle<()>>,
}

impl Pipeline {
    pub async fn start(config: &Config, store: Arc<dyn ObjectStore>) -> Result<Self, PipelineError> {
        let shutdown = CancellationToken::new();
        let stats = Arc::new(PipelineStats::default());
        let schemas = Arc::new(SchemaRegistry::new());
        let parameters = Arc::new(ParameterSet::from_config(config));
        let topic = NotificationTopic::new(config.storage.notification_capacity);

        let transform = Arc::new(TransformPipeline::from_config(&config.stream.processing)?);
        let partitioner = Partitioner::parse(&config.stream.prefix, &config.stream.error_prefix)?;

        let archive = match &config.archive {
            Some(archive_config) => Some(Arc::new(
                BusArchive::open(archive_config, EventPattern::from(&archive_config.pattern))
                    .await?,
            )),
            None => None,
        };

        let (record_tx, record_rx) = mpsc::channel(config.ingress.backpressure.queue_capacity);
        let (sealed_tx, sealed_rx) = mpsc::channel(config.stream.buffer.sealed_capacity);

        let ingress = Arc::new(Ingress::new(IngressParts {
            records: record_tx,
            backpressure: BackpressureHandler::from(&config.ingress.backpressure),
            pattern: EventPattern::from(&config.ingress.pattern),
            account: config.stack.account.clone(),
            region: config.stack.region.clone(),
            archive: archive.clone(),
            schemas: config.schemas.discovery.then(|| Arc::clone(&schemas)),
            stats: Arc::clone(&stats),
            shutdown: shutdown.clone(),
        }));

        let batcher = tokio::spawn(run_batcher(
            record_rx,
            sealed_tx,
            Batcher::new(BufferPolicy::from(&config.stream.buffer)),
            Arc::clone(&stats),
            shutdown.clone(),
        ));

        let pool = WriterPool::spawn(
            config.writer.workers,
            config.stream.buffer.sealed_capacity,
            WriterContext {
                store,
                topic: topic.clone(),
                layout: ObjectLayout::new(config.stream.name.clone()),
                retry: RetryPolicy::from(&config.writer),
                stats: Arc::clone(&stats),
                bucket: config.storage.bucket_name.clone(),
            },
        );

        let delivery = tokio::spawn(run_delivery(
            sealed_rx,
            transform,
            partitioner,
            pool,
            config.writer.transform_concurrency,
            Arc::clone(&stats),
            config.writer.shutdown_grace,
        ));

        let pruner = match (&archive, &config.archive) {
            (Some(archive), Some(archive_config)) => Some(tokio::spawn(run_pruner(
                Arc::clone(archive),
                archive_config.prune_interval,
                shutdown.clone(),
            ))),
            _ => None,
        };

        let app_state = AppState {
            ingress: Arc::clone(&ingress),
            stats: Arc::clone(&stats),
            schemas: Arc::clone(&schemas),
            parameters: Arc::clone(&parameters),
            bus_name: config.ingress.bus_name.clone(),
            bus_arn: event_bus_arn(
                &config.stack.region,
                &config.stack.account,
                &config.ingress.bus_name,
            ),
            stream_name: config.stream.name.clone(),
            host: hostname::get()
                .ok()
                .and_then(|h| h.to_str().map(|s| s.to_string()))
                .unwrap_or_else(|| "pubsub".to_string()),
            max_entries_per_request: config.ingress.max_entries_per_request,
            buffer: BufferStatus {
                max_buffer_bytes: config.stream.buffer.max_buffer_bytes,
                max_buffer_interval_seconds: config.stream.buffer.max_buffer_interval.as_secs(),
            },
            started_at: Instant::now(),
        };

        info!(
            stack = %config.stack.name,
            bus = %config.ingress.bus_name,
            stream = %config.stream.name,
            max_buffer_bytes = config.stream.buffer.max_buffer_bytes,
            max_buffer_interval_secs = config.stream.buffer.max_buffer_interval.as_secs(),
            "Pipeline started"
        );

        Ok(Self {
            ingress,
            stats,
            schemas,
            parameters,
            topic,
            archive,
            app_state,
            shutdown,
            batcher,
            delivery,
            pruner,
        })
    }

    pub fn ingress(&self) -> Arc<Ingress> {
        Arc::clone(&self.ingress)
    }

    /// Object-created notifications for every object written from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ObjectCreated> {
        self.topic.subscribe()
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    pub fn schemas(&self) -> Arc<SchemaRegistry> {
        Arc::clone(&self.schemas)
    }

    pub fn parameters(&self) -> Arc<ParameterSet> {
        Arc::clone(&self.parameters)
    }

    pub fn archive(&self) -> Option<Arc<BusArchive>> {
        self.archive.clone()
    }

    pub fn app_state(&self) -> AppState {
        self.app_state.clone()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop accepting events, flush the open batch and drain the writers.
    /// The writer drain is bounded by `writer.shutdown_grace`.
    pub async fn shutdown(self) -> Result<ShutdownReport, PipelineError> {
        info!("Pipeline shutting down");
        self.shutdown.cancel();

        self.batcher.await?;
        let drain = self.delivery.await?;
        if let Some(pruner) = self.pruner {
            pruner.await?;
        }

        let stats = self.stats.snapshot();
        if drain.completed && stats.records_lost == 0 {
            info!(
                objects_written = stats.objects_written,
                "Pipeline shutdown complete"
            );
        } else {
            error!(
                target: AUDIT_TARGET,
                records_lost = stats.records_lost,
                abandoned_groups = drain.abandoned_groups,
                "Pipeline shut down with data loss"
            );
        }

        Ok(ShutdownReport { drain, stats })
    }
}
