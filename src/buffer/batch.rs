use crate::buffer::record::Record;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SealReason {
    Size,
    Interval,
    Shutdown,
}

/// Lifecycle of a batch: `Open -> Sealing -> Flushed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    /// Accepting records
    Open,
    /// No new records, transform running
    Sealing,
    /// Terminal, output objects handed to the writer
    Flushed,
}

impl BatchState {
    pub fn can_transition_to(self, next: BatchState) -> bool {
        matches!(
            (self, next),
            (BatchState::Open, BatchState::Sealing) | (BatchState::Sealing, BatchState::Flushed)
        )
    }
}

#[derive(Debug)]
pub struct OpenBatch {
    pub sequence: u64,
    pub opened_at: DateTime<Utc>,
    pub opened_instant: Instant,
    pub size_bytes: u64,
    pub records: Vec<Record>,
}

impl OpenBatch {
    pub fn new(sequence: u64, opened_instant: Instant, opened_at: DateTime<Utc>) -> Self {
        Self {
            sequence,
            opened_at,
            opened_instant,
            size_bytes: 0,
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: Record) {
        self.size_bytes += record.size_bytes();
        self.records.push(record);
    }

    pub fn seal(self, reason: SealReason, sealed_at: DateTime<Utc>) -> SealedBatch {
        SealedBatch {
            sequence: self.sequence,
            opened_at: self.opened_at,
            sealed_at,
            reason,
            size_bytes: self.size_bytes,
            records: self.records,
        }
    }
}

/// A batch that no longer accepts records. Owned by the transform stage from
/// here on and never modified.
#[derive(Debug, Clone)]
pub struct SealedBatch {
    /// Monotonic per stream, starts at 0
    pub sequence: u64,
    pub opened_at: DateTime<Utc>,
    /// Drives the date component of every partition key in this batch
    pub sealed_at: DateTime<Utc>,
    pub reason: SealReason,
    pub size_bytes: u64,
    pub records: Vec<Record>,
}

impl SealedBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        assert!(BatchState::Open.can_transition_to(BatchState::Sealing));
        assert!(BatchState::Sealing.can_transition_to(BatchState::Flushed));
        assert!(!BatchState::Open.can_transition_to(BatchState::Flushed));
        assert!(!BatchState::Flushed.can_transition_to(BatchState::Open));
        assert!(!BatchState::Sealing.can_transition_to(BatchState::Open));
    }
}
