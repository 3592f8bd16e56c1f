pub mod api;
pub mod event;
pub mod pattern;
pub mod server;

pub use event::{BusEnvelope, Event, MAX_EVENT_BYTES};
pub use pattern::EventPattern;
pub use server::{build_router, serve};

use crate::archive::BusArchive;
use crate::buffer::Record;
use crate::pipeline::backpressure::{BackpressureHandler, OfferError};
use crate::pipeline::stats::PipelineStats;
use crate::schema::SchemaRegistry;
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted {
    pub id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejected {
    #[error("malformed event: {0}")]
    Malformed(String),

    #[error("delivery stream buffer is full, retry later")]
    BufferOverflow,

    #[error("event does not match the bus rule")]
    NotMatched,

    #[error("ingress is shutting down")]
    Closed,
}

impl Rejected {
    /// Producers should back off and resubmit
    pub fn is_retryable(&self) -> bool {
        matches!(self, Rejected::BufferOverflow | Rejected::Closed)
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Rejected::Malformed(_) => "MalformedDetail",
            Rejected::BufferOverflow => "ThrottlingException",
            Rejected::NotMatched => "NotMatched",
            Rejected::Closed => "ServiceUnavailable",
        }
    }
}

/// Entry point of the bus. Accepted events are stamped, serialized to the
/// bus envelope and handed to the delivery stream's batcher.
pub struct Ingress {
    records: mpsc::Sender<Record>,
    backpressure: BackpressureHandler,
    pattern: EventPattern,
    account: String,
    region: String,
    archive: Option<Arc<BusArchive>>,
    schemas: Option<Arc<SchemaRegistry>>,
    stats: Arc<PipelineStats>,
    shutdown: CancellationToken,
}

pub struct IngressParts {
    pub records: mpsc::Sender<Record>,
    pub backpressure: BackpressureHandler,
    pub pattern: EventPattern,
    pub account: String,
    pub region: String,
    pub archive: Option<Arc<BusArchive>>,
    pub schemas: Option<Arc<SchemaRegistry>>,
    pub stats: Arc<PipelineStats>,
    pub shutdown: CancellationToken,
}

impl Ingress {
    pub fn new(parts: IngressParts) -> Self {
        Self {
            records: parts.records,
            backpressure: parts.backpressure,
            pattern: parts.pattern,
            account: parts.account,
            region: parts.region,
            archive: parts.archive,
            schemas: parts.schemas,
            stats: parts.stats,
            shutdown: parts.shutdown,
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub async fn submit(&self, event: Event) -> Result<Accepted, Rejected> {
        let result = self.submit_inner(event).await;
        match &result {
            Ok(_) => self.stats.event_accepted(),
            Err(_) => self.stats.event_rejected(),
        }
        result
    }

    async fn submit_inner(&self, event: Event) -> Result<Accepted, Rejected> {
        if self.shutdown.is_cancelled() {
            return Err(Rejected::Closed);
        }
        if !event.detail.is_object() {
            return Err(Rejected::Malformed(
                "detail must be a JSON object".to_string(),
            ));
        }

        let id = Uuid::new_v4();
        let received_at = Utc::now();
        let envelope = BusEnvelope::stamp(event, id, received_at, &self.account, &self.region);

        if !self.pattern.matches(&envelope) {
            debug!(
                id = %id,
                account = %envelope.account,
                source = %envelope.source,
                "Event rejected by bus rule"
            );
            return Err(Rejected::NotMatched);
        }

        let data = envelope
            .to_bytes()
            .map_err(|e| Rejected::Malformed(e.to_string()))?;
        if data.len() > MAX_EVENT_BYTES {
            return Err(Rejected::Malformed(format!(
                "event is {} bytes, limit is {}",
                data.len(),
                MAX_EVENT_BYTES
            )));
        }

        self.enqueue(Record::new(id, data, received_at, false)).await?;

        if let Some(archive) = &self.archive {
            if let Err(e) = archive.append(&envelope).await {
                warn!(id = %id, error = %e, "Failed to archive event");
            }
        }
        if let Some(schemas) = &self.schemas {
            schemas.observe(
                &envelope.source,
                &envelope.detail_type,
                &envelope.detail,
                received_at,
            );
        }

        Ok(Accepted { id })
    }

    /// Put a raw record straight into the delivery stream. `aggregated`
    /// records may hold several concatenated JSON documents.
    pub async fn put_record(&self, data: Vec<u8>, aggregated: bool) -> Result<Accepted, Rejected> {
        if self.shutdown.is_cancelled() {
            return Err(Rejected::Closed);
        }
        if data.is_empty() {
            return Err(Rejected::Malformed("record is empty".to_string()));
        }

        let id = Uuid::new_v4();
        self.enqueue(Record::new(id, data, Utc::now(), aggregated))
            .await?;
        Ok(Accepted { id })
    }

    async fn enqueue(&self, record: Record) -> Result<(), Rejected> {
        let id = record.id;
        match self.backpressure.offer(&self.records, record).await {
            Ok(()) => {
                self.stats.record_accepted();
                Ok(())
            }
            Err(OfferError::Full) => {
                self.stats.buffer_overflow();
                warn!(
                    id = %id,
                    strategy = ?self.backpressure.strategy(),
                    "Delivery stream buffer full, rejecting"
                );
                Err(Rejected::BufferOverflow)
            }
            Err(OfferError::Closed) => Err(Rejected::Closed),
        }
    }
}
