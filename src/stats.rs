//! Engine counters.
//!
//! Lock-free counters recorded at the point of occurrence, with a
//! non-atomic snapshot for operator tooling.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic engine counters.
#[derive(Debug, Default)]
pub struct EngineStats {
    /// Packets seen on the sampling path
    pub packets_observed: AtomicU64,
    /// Records created by the sampling path
    pub flows_created: AtomicU64,
    /// Completion events merged into existing records
    pub completions_merged: AtomicU64,
    /// Completion events with no matching sampled record
    pub table_anomalies: AtomicU64,
    /// Rows queued on the training channel
    pub training_rows: AtomicU64,
    /// Rows queued on the testing channel
    pub testing_rows: AtomicU64,
    /// Testing rows suppressed because no training example was ever sent
    pub testing_suppressed: AtomicU64,
    /// Records whose classification failed (degenerate duration)
    pub classification_errors: AtomicU64,
    /// Rows lost to send-queue overflow
    pub queue_drops: AtomicU64,
    /// Rows that failed on the wire
    pub send_errors: AtomicU64,
    /// Records evicted by the size bound or the age sweep
    pub evicted: AtomicU64,
}

impl EngineStats {
    #[inline]
    pub(crate) fn record_packet_observed(&self) {
        self.packets_observed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_flow_created(&self) {
        self.flows_created.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_completion_merged(&self) {
        self.completions_merged.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_table_anomaly(&self) {
        self.table_anomalies.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_evicted(&self, n: u64) {
        self.evicted.fetch_add(n, Ordering::Relaxed);
    }

    /// Take a non-atomic snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_observed: self.packets_observed.load(Ordering::Relaxed),
            flows_created: self.flows_created.load(Ordering::Relaxed),
            completions_merged: self.completions_merged.load(Ordering::Relaxed),
            table_anomalies: self.table_anomalies.load(Ordering::Relaxed),
            training_rows: self.training_rows.load(Ordering::Relaxed),
            testing_rows: self.testing_rows.load(Ordering::Relaxed),
            testing_suppressed: self.testing_suppressed.load(Ordering::Relaxed),
            classification_errors: self.classification_errors.load(Ordering::Relaxed),
            queue_drops: self.queue_drops.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }
}

/// Counter snapshot (non-atomic).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Packets seen on the sampling path
    pub packets_observed: u64,
    /// Records created by the sampling path
    pub flows_created: u64,
    /// Completion events merged into existing records
    pub completions_merged: u64,
    /// Completion events with no matching sampled record
    pub table_anomalies: u64,
    /// Rows queued on the training channel
    pub training_rows: u64,
    /// Rows queued on the testing channel
    pub testing_rows: u64,
    /// Testing rows suppressed by the training gate
    pub testing_suppressed: u64,
    /// Records whose classification failed
    pub classification_errors: u64,
    /// Rows lost to send-queue overflow
    pub queue_drops: u64,
    /// Rows that failed on the wire
    pub send_errors: u64,
    /// Records evicted
    pub evicted: u64,
}
