use crate::transform::{ErrorType, TransformOutcome, TransformedBatch};
use crate::writer::template::{PrefixTemplate, TemplateError};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;

/// Where a transformed record lands
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PartitionKey {
    Data {
        fields: Vec<(String, String)>,
        date: NaiveDate,
    },
    Error {
        error_type: ErrorType,
        date: NaiveDate,
    },
}

impl PartitionKey {
    pub fn is_error(&self) -> bool {
        matches!(self, PartitionKey::Error { .. })
    }
}

/// Records of one batch that share a partition key, in arrival order
#[derive(Debug, Clone)]
pub struct PartitionGroup {
    pub batch_sequence: u64,
    pub sealed_at: DateTime<Utc>,
    pub key: PartitionKey,
    pub prefix: String,
    pub records: Vec<Vec<u8>>,
}

impl PartitionGroup {
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn size_bytes(&self) -> usize {
        self.records.iter().map(Vec::len).sum()
    }
}

/// Maps transformed records to partition keys and rendered prefixes
#[derive(Debug, Clone)]
pub struct Partitioner {
    prefix: PrefixTemplate,
    error_prefix: PrefixTemplate,
}

impl Partitioner {
    pub fn new(prefix: PrefixTemplate, error_prefix: PrefixTemplate) -> Self {
        Self {
            prefix,
            error_prefix,
        }
    }

    pub fn parse(prefix: &str, error_prefix: &str) -> Result<Self, TemplateError> {
        Ok(Self::new(
            PrefixTemplate::parse(prefix)?,
            PrefixTemplate::parse(error_prefix)?,
        ))
    }

    /// Split a batch into per-partition groups.
    ///
    /// Groups come out in order of first appearance and keep the record
    /// order of the batch. The date of every key is the batch seal date.
    pub fn group(&self, batch: TransformedBatch) -> Vec<PartitionGroup> {
        let date = batch.sealed_at.date_naive();
        let mut groups: Vec<PartitionGroup> = Vec::new();
        let mut index: HashMap<PartitionKey, usize> = HashMap::new();

        for record in batch.records {
            let (key, data) = match record.outcome {
                TransformOutcome::Partitioned { fields, data } => {
                    (PartitionKey::Data { fields, date }, data)
                }
                TransformOutcome::Failed {
                    error_type, data, ..
                } => (PartitionKey::Error { error_type, date }, data),
            };

            if let Some(&i) = index.get(&key) {
                groups[i].records.push(data);
                continue;
            }

            let (key, prefix) = self.resolve(key, batch.sealed_at);
            match index.get(&key) {
                Some(&i) => groups[i].records.push(data),
                None => {
                    index.insert(key.clone(), groups.len());
                    groups.push(PartitionGroup {
                        batch_sequence: batch.sequence,
                        sealed_at: batch.sealed_at,
                        key,
                        prefix,
                        records: vec![data],
                    });
                }
            }
        }

        groups
    }

    // Config validation ties the data prefix to the query fields, so a
    // render failure here means the record cannot be placed and is routed
    // to the error prefix instead.
    fn resolve(&self, key: PartitionKey, at: DateTime<Utc>) -> (PartitionKey, String) {
        let rendered = match &key {
            PartitionKey::Data { fields, .. } => self.prefix.render(fields, None, at),
            PartitionKey::Error { error_type, .. } => {
                self.error_prefix.render(&[], Some(*error_type), at)
            }
        };

        match rendered {
            Ok(prefix) => (key, prefix),
            Err(_) => {
                let error_type = ErrorType::MalformedRecord;
                let prefix = self
                    .error_prefix
                    .render(&[], Some(error_type), at)
                    .unwrap_or_else(|_| format!("errors/{}/", error_type));
                (
                    PartitionKey::Error {
                        error_type,
                        date: at.date_naive(),
                    },
                    prefix,
                )
            }
        }
    }
}
