use crate::buffer::batch::{OpenBatch, SealReason, SealedBatch};
use crate::buffer::record::Record;
use crate::config::types::BufferConfig;
use chrono::Utc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct BufferPolicy {
    pub max_bytes: u64,
    pub max_interval: Duration,
}

impl From<&BufferConfig> for BufferPolicy {
    fn from(config: &BufferConfig) -> Self {
        Self {
            max_bytes: config.max_buffer_bytes,
            max_interval: config.max_buffer_interval,
        }
    }
}

/// Accumulates records into at most one open batch and seals it on size or
/// elapsed time, whichever is reached first.
pub struct Batcher {
    policy: BufferPolicy,
    current: Option<OpenBatch>,
    next_sequence: u64,
}

impl Batcher {
    pub fn new(policy: BufferPolicy) -> Self {
        Self {
            policy,
            current: None,
            next_sequence: 0,
        }
    }

    /// Add a record, opening a batch if none is open.
    /// Returns the sealed batch when the size threshold is reached.
    pub fn push(&mut self, record: Record, now: Instant) -> Option<SealedBatch> {
        if self.current.is_none() {
            self.current = Some(OpenBatch::new(self.next_sequence, now, Utc::now()));
            self.next_sequence += 1;
        }

        let batch = self.current.as_mut()?;
        batch.push(record);

        if batch.size_bytes >= self.policy.max_bytes {
            self.seal(SealReason::Size)
        } else {
            None
        }
    }

    /// Seal the open batch if it has been open for at least the interval
    pub fn poll_deadline(&mut self, now: Instant) -> Option<SealedBatch> {
        match self.deadline() {
            Some(deadline) if now >= deadline => self.seal(SealReason::Interval),
            _ => None,
        }
    }

    /// When the open batch must be sealed by the time trigger
    pub fn deadline(&self) -> Option<Instant> {
        self.current
            .as_ref()
            .map(|batch| batch.opened_instant + self.policy.max_interval)
    }

    /// Seal whatever is open regardless of thresholds
    pub fn flush(&mut self, reason: SealReason) -> Option<SealedBatch> {
        self.seal(reason)
    }

    /// Sequence of the open batch, if any
    pub fn open_sequence(&self) -> Option<u64> {
        self.current.as_ref().map(|batch| batch.sequence)
    }

    pub fn open_size_bytes(&self) -> u64 {
        self.current.as_ref().map(|batch| batch.size_bytes).unwrap_or(0)
    }

    pub fn open_len(&self) -> usize {
        self.current.as_ref().map(|batch| batch.records.len()).unwrap_or(0)
    }

    fn seal(&mut self, reason: SealReason) -> Option<SealedBatch> {
        self.current
            .take()
            .map(|batch| batch.seal(reason, Utc::now()))
    }
}
