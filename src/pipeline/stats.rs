use crate::buffer::batch::{BatchState, SealReason};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::warn;

/// Counters shared by every stage of the pipeline
#[derive(Debug, Default)]
pub struct PipelineStats {
    events_accepted: AtomicU64,
    events_rejected: AtomicU64,
    records_accepted: AtomicU64,
    buffer_overflows: AtomicU64,
    batches_sealed_size: AtomicU64,
    batches_sealed_interval: AtomicU64,
    batches_sealed_shutdown: AtomicU64,
    batches_flushed: AtomicU64,
    records_routed_to_errors: AtomicU64,
    objects_written: AtomicU64,
    bytes_written: AtomicU64,
    write_retries: AtomicU64,
    write_failures: AtomicU64,
    records_lost: AtomicU64,
    /// Batches that have not reached `Flushed` yet
    batch_states: Mutex<BTreeMap<u64, BatchState>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub events_accepted: u64,
    pub events_rejected: u64,
    pub records_accepted: u64,
    pub buffer_overflows: u64,
    pub batches_sealed_size: u64,
    pub batches_sealed_interval: u64,
    pub batches_sealed_shutdown: u64,
    pub batches_flushed: u64,
    pub records_routed_to_errors: u64,
    pub objects_written: u64,
    pub bytes_written: u64,
    pub write_retries: u64,
    pub write_failures: u64,
    pub records_lost: u64,
    pub open_batches: usize,
    pub sealing_batches: usize,
}

impl PipelineStats {
    pub fn event_accepted(&self) {
        self.events_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_rejected(&self) {
        self.events_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_accepted(&self) {
        self.records_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn buffer_overflow(&self) {
        self.buffer_overflows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn batch_opened(&self, sequence: u64) {
        self.set_state(sequence, BatchState::Open);
    }

    pub fn batch_sealed(&self, sequence: u64, reason: SealReason) {
        let counter = match reason {
            SealReason::Size => &self.batches_sealed_size,
            SealReason::Interval => &self.batches_sealed_interval,
            SealReason::Shutdown => &self.batches_sealed_shutdown,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.set_state(sequence, BatchState::Sealing);
    }

    pub fn batch_flushed(&self, sequence: u64) {
        self.batches_flushed.fetch_add(1, Ordering::Relaxed);
        self.set_state(sequence, BatchState::Flushed);
    }

    pub fn records_routed_to_errors(&self, count: u64) {
        self.records_routed_to_errors.fetch_add(count, Ordering::Relaxed);
    }

    pub fn object_written(&self, bytes: u64) {
        self.objects_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn write_retried(&self) {
        self.write_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn write_failed(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn records_lost(&self, count: u64) {
        self.records_lost.fetch_add(count, Ordering::Relaxed);
    }

    /// A sealed batch that will never flush: count its records as lost and
    /// stop tracking it
    pub fn batch_lost(&self, sequence: u64, records: u64) {
        self.records_lost(records);
        if let Ok(mut states) = self.batch_states.lock() {
            states.remove(&sequence);
        }
    }

    pub fn batch_state(&self, sequence: u64) -> Option<BatchState> {
        self.batch_states
            .lock()
            .ok()
            .and_then(|states| states.get(&sequence).copied())
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let (open_batches, sealing_batches) = self
            .batch_states
            .lock()
            .map(|states| {
                let open = states.values().filter(|s| **s == BatchState::Open).count();
                (open, states.len() - open)
            })
            .unwrap_or((0, 0));

        StatsSnapshot {
            events_accepted: self.events_accepted.load(Ordering::Relaxed),
            events_rejected: self.events_rejected.load(Ordering::Relaxed),
            records_accepted: self.records_accepted.load(Ordering::Relaxed),
            buffer_overflows: self.buffer_overflows.load(Ordering::Relaxed),
            batches_sealed_size: self.batches_sealed_size.load(Ordering::Relaxed),
            batches_sealed_interval: self.batches_sealed_interval.load(Ordering::Relaxed),
            batches_sealed_shutdown: self.batches_sealed_shutdown.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            records_routed_to_errors: self.records_routed_to_errors.load(Ordering::Relaxed),
            objects_written: self.objects_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            write_retries: self.write_retries.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            records_lost: self.records_lost.load(Ordering::Relaxed),
            open_batches,
            sealing_batches,
        }
    }

    fn set_state(&self, sequence: u64, next: BatchState) {
        let Ok(mut states) = self.batch_states.lock() else {
            return;
        };

        if let Some(current) = states.get(&sequence).copied() {
            if !current.can_transition_to(next) {
                warn!(
                    sequence = sequence,
                    from = ?current,
                    to = ?next,
                    "Illegal batch state transition"
                );
                return;
            }
        }

        // Flushed is terminal, no need to keep tracking it
        if next == BatchState::Flushed {
            states.remove(&sequence);
        } else {
            states.insert(sequence, next);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_lifecycle_is_tracked() {
        let stats = PipelineStats::default();

        stats.batch_opened(0);
        assert_eq!(stats.batch_state(0), Some(BatchState::Open));
        assert_eq!(stats.snapshot().open_batches, 1);

        stats.batch_sealed(0, SealReason::Size);
        assert_eq!(stats.batch_state(0), Some(BatchState::Sealing));
        assert_eq!(stats.snapshot().sealing_batches, 1);

        stats.batch_flushed(0);
        assert_eq!(stats.batch_state(0), None);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.batches_sealed_size, 1);
        assert_eq!(snapshot.batches_flushed, 1);
        assert_eq!(snapshot.open_batches, 0);
        assert_eq!(snapshot.sealing_batches, 0);
    }

    #[test]
    fn test_lost_batch_is_no_longer_sealing() {
        let stats = PipelineStats::default();
        stats.batch_opened(5);
        stats.batch_sealed(5, SealReason::Interval);
        assert_eq!(stats.snapshot().sealing_batches, 1);

        stats.batch_lost(5, 4);
        assert_eq!(stats.batch_state(5), None);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.sealing_batches, 0);
        assert_eq!(snapshot.open_batches, 0);
        assert_eq!(snapshot.records_lost, 4);
        assert_eq!(snapshot.batches_flushed, 0);
    }

    #[test]
    fn test_illegal_transition_is_ignored() {
        let stats = PipelineStats::default();
        stats.batch_opened(3);
        stats.batch_opened(3);
        assert_eq!(stats.batch_state(3), Some(BatchState::Open));
    }
}
