//! Process-wide aggregation counters.
//!
//! Counters are shared by every rank thread of the process; tests compare
//! snapshots with `>=` because other tests may run concurrently.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of aggregation counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AggregationMetricsSnapshot {
    /// Remote put operations, indexed puts counted once.
    pub pidx_rma_puts_total: u64,
    /// Remote get operations, indexed gets counted once.
    pub pidx_rma_gets_total: u64,
    /// Legs served by a copy into or out of the rank's own window.
    pub pidx_local_copies_total: u64,
    /// Payload bytes moved by puts, gets and local copies.
    pub pidx_bytes_moved_total: u64,
    /// Runs that straddled more than one slot.
    pub pidx_split_transfers_total: u64,
    /// Closed fence epochs.
    pub pidx_epochs_total: u64,
}

static RMA_PUTS_TOTAL: AtomicU64 = AtomicU64::new(0);
static RMA_GETS_TOTAL: AtomicU64 = AtomicU64::new(0);
static LOCAL_COPIES_TOTAL: AtomicU64 = AtomicU64::new(0);
static BYTES_MOVED_TOTAL: AtomicU64 = AtomicU64::new(0);
static SPLIT_TRANSFERS_TOTAL: AtomicU64 = AtomicU64::new(0);
static EPOCHS_TOTAL: AtomicU64 = AtomicU64::new(0);

pub(crate) fn record_remote_put(bytes: usize) {
    RMA_PUTS_TOTAL.fetch_add(1, Ordering::Relaxed);
    BYTES_MOVED_TOTAL.fetch_add(bytes as u64, Ordering::Relaxed);
}

pub(crate) fn record_remote_get(bytes: usize) {
    RMA_GETS_TOTAL.fetch_add(1, Ordering::Relaxed);
    BYTES_MOVED_TOTAL.fetch_add(bytes as u64, Ordering::Relaxed);
}

pub(crate) fn record_local_copy(bytes: usize) {
    LOCAL_COPIES_TOTAL.fetch_add(1, Ordering::Relaxed);
    BYTES_MOVED_TOTAL.fetch_add(bytes as u64, Ordering::Relaxed);
}

pub(crate) fn record_split_transfer() {
    SPLIT_TRANSFERS_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_epoch() {
    EPOCHS_TOTAL.fetch_add(1, Ordering::Relaxed);
}

/// Return a snapshot of the aggregation counters.
#[must_use]
pub fn aggregation_metrics_snapshot() -> AggregationMetricsSnapshot {
    AggregationMetricsSnapshot {
        pidx_rma_puts_total: RMA_PUTS_TOTAL.load(Ordering::Relaxed),
        pidx_rma_gets_total: RMA_GETS_TOTAL.load(Ordering::Relaxed),
        pidx_local_copies_total: LOCAL_COPIES_TOTAL.load(Ordering::Relaxed),
        pidx_bytes_moved_total: BYTES_MOVED_TOTAL.load(Ordering::Relaxed),
        pidx_split_transfers_total: SPLIT_TRANSFERS_TOTAL.load(Ordering::Relaxed),
        pidx_epochs_total: EPOCHS_TOTAL.load(Ordering::Relaxed),
    }
}

/// Reset all aggregation counters.
pub fn reset_aggregation_metrics() {
    RMA_PUTS_TOTAL.store(0, Ordering::Relaxed);
    RMA_GETS_TOTAL.store(0, Ordering::Relaxed);
    LOCAL_COPIES_TOTAL.store(0, Ordering::Relaxed);
    BYTES_MOVED_TOTAL.store(0, Ordering::Relaxed);
    SPLIT_TRANSFERS_TOTAL.store(0, Ordering::Relaxed);
    EPOCHS_TOTAL.store(0, Ordering::Relaxed);
}
