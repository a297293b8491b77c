use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Process-wide counters backing `status()`. Created once at startup and shared by the
/// consumption loop and the rebalance coordinator; never reset.
///
/// Each counter is its own atomic. Readers may observe `last_sequence_number` and
/// `total_messages_received` from different records.
#[derive(Debug, Default)]
pub struct RuntimeCounters {
    last_sequence_number: AtomicI64,
    total_messages_received: AtomicU64,
    processing_errors: AtomicU64,
    rebalance_count: AtomicU64,
}

impl RuntimeCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a record that passed the fault pipeline without a simulated failure.
    pub fn record_processed(&self, sequence_number: i64) {
        self.last_sequence_number
            .store(sequence_number, Ordering::Relaxed);
        self.total_messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processing_error(&self) {
        self.processing_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rebalance(&self) {
        self.rebalance_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn last_sequence_number(&self) -> i64 {
        self.last_sequence_number.load(Ordering::Relaxed)
    }

    pub fn total_messages_received(&self) -> u64 {
        self.total_messages_received.load(Ordering::Relaxed)
    }

    pub fn processing_errors(&self) -> u64 {
        self.processing_errors.load(Ordering::Relaxed)
    }

    pub fn rebalance_count(&self) -> u64 {
        self.rebalance_count.load(Ordering::Relaxed)
    }
}
