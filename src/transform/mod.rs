pub mod deaggregate;
pub mod delimiter;
pub mod metadata;

pub use metadata::{ExtractionError, MetadataQuery, QueryParseError};

use crate::buffer::{Record, SealedBatch};
use crate::config::types::ProcessingConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Error classes used to route failed records to the error prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ErrorType {
    MalformedRecord,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::MalformedRecord => "MalformedRecord",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformOutcome {
    /// Delimited record bytes and the extracted partition fields, in query order
    Partitioned {
        fields: Vec<(String, String)>,
        data: Vec<u8>,
    },
    /// Record keeps its (delimited) bytes and goes to the error prefix
    Failed {
        error_type: ErrorType,
        reason: String,
        data: Vec<u8>,
    },
}

impl TransformOutcome {
    pub fn data(&self) -> &[u8] {
        match self {
            TransformOutcome::Partitioned { data, .. } | TransformOutcome::Failed { data, .. } => {
                data
            }
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TransformOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformedRecord {
    /// Id of the raw record this output came from. De-aggregated sub-records
    /// share the id of their parent.
    pub record_id: Uuid,
    pub outcome: TransformOutcome,
}

/// Output of the transform stage for one sealed batch
#[derive(Debug, Clone)]
pub struct TransformedBatch {
    pub sequence: u64,
    pub sealed_at: DateTime<Utc>,
    pub records: Vec<TransformedRecord>,
}

impl TransformedBatch {
    pub fn failed_count(&self) -> usize {
        self.records.iter().filter(|r| r.outcome.is_failed()).count()
    }
}

/// De-aggregation, delimiter append and metadata extraction, in that order.
///
/// Pure and deterministic: the same raw record always produces the same
/// output bytes and fields.
#[derive(Debug, Clone)]
pub struct TransformPipeline {
    deaggregation: bool,
    delimiter: Vec<u8>,
    query: MetadataQuery,
}

impl TransformPipeline {
    pub fn new(deaggregation: bool, delimiter: impl Into<Vec<u8>>, query: MetadataQuery) -> Self {
        Self {
            deaggregation,
            delimiter: delimiter.into(),
            query,
        }
    }

    pub fn from_config(config: &ProcessingConfig) -> Result<Self, QueryParseError> {
        let query = MetadataQuery::parse(&config.metadata_query)?;
        Ok(Self::new(
            config.deaggregation,
            config.delimiter.as_bytes().to_vec(),
            query,
        ))
    }

    pub fn query(&self) -> &MetadataQuery {
        &self.query
    }

    pub fn process_record(&self, record: &Record) -> Vec<TransformedRecord> {
        let parts: Vec<&[u8]> = if self.deaggregation && record.aggregated {
            deaggregate::split_json_sub_records(&record.data)
                .unwrap_or_else(|| vec![record.data.as_slice()])
        } else {
            vec![record.data.as_slice()]
        };

        parts
            .into_iter()
            .map(|part| TransformedRecord {
                record_id: record.id,
                outcome: self.process_part(part),
            })
            .collect()
    }

    pub fn process_batch(&self, batch: &SealedBatch) -> TransformedBatch {
        let records = batch
            .records
            .iter()
            .flat_map(|record| self.process_record(record))
            .collect();

        TransformedBatch {
            sequence: batch.sequence,
            sealed_at: batch.sealed_at,
            records,
        }
    }

    fn process_part(&self, part: &[u8]) -> TransformOutcome {
        let data = delimiter::append_delimiter(part, &self.delimiter);

        match self.query.extract(part) {
            Ok(fields) => TransformOutcome::Partitioned { fields, data },
            Err(e) => TransformOutcome::Failed {
                error_type: ErrorType::MalformedRecord,
                reason: e.to_string(),
                data,
            },
        }
    }
}
