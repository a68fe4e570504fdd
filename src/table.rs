//! Flow table: hash-indexed flow state under two update disciplines.
//!
//! The sampling path (`observe_packet`) and the completion path
//! (`merge_statistics`) share one key space. The table itself is not
//! synchronized; the engine task is its single owner and serializes both
//! paths through one event queue.

use crate::event::{FlowStats, FlowTuple};
use crate::record::{FlowRecord, SampleFill};
use crate::stats::EngineStats;
use std::collections::HashMap;
use std::sync::Arc;

/// Outcome of the early-sampling path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDecision {
    /// Sampling continues (or the flow is already fully sampled)
    Continue,
    /// The k-th slot just filled; forward to the testing channel once
    TestReady,
}

/// Outcome of the completion path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    /// No sampled record matched: anomaly, stats inserted as a new record
    Inserted,
    /// Merged into an existing record
    Merged {
        /// True exactly once per record: forward to the training channel
        train_ready: bool,
    },
}

/// Flow table keyed by 4-tuple.
pub struct FlowTable {
    flows: HashMap<FlowTuple, FlowRecord>,
    sample_width: usize,
    max_flows: usize,
    stats: Arc<EngineStats>,
}

impl FlowTable {
    /// Create a table with sample window `sample_width` and at most
    /// `max_flows` live records.
    pub fn new(sample_width: usize, max_flows: usize, stats: Arc<EngineStats>) -> Self {
        Self {
            flows: HashMap::new(),
            sample_width,
            max_flows,
            stats,
        }
    }

    /// Record one sampled packet for `tuple`.
    ///
    /// Unknown tuples are inserted with slot 0 filled. Known tuples fill
    /// their first unset slot; `TestReady` is returned exactly once, when
    /// the last slot fills and the record has not yet been forwarded for
    /// testing. Fully sampled flows are no-ops (the controller installs a
    /// permanent rule after sampling, so further packets are expected).
    ///
    /// The fill scan starts at slot 0, not slot 1. For records created by
    /// this path the two are equivalent (slot 0 fills at insertion), but
    /// a record inserted by the completion path still has slot 0 unset,
    /// and its first observed packet lands there instead of slot 1.
    pub fn observe_packet(
        &mut self,
        tuple: FlowTuple,
        size_bytes: u32,
        at_micros: i64,
    ) -> PacketDecision {
        if let Some(rec) = self.flows.get_mut(&tuple) {
            match rec.record_sample(size_bytes as i64, at_micros) {
                SampleFill::Filled { last: true } if !rec.sent_for_testing => {
                    rec.sent_for_testing = true;
                    PacketDecision::TestReady
                }
                _ => PacketDecision::Continue,
            }
        } else {
            self.make_room();
            let mut rec = FlowRecord::new(tuple, self.sample_width);
            let fill = rec.record_sample(size_bytes as i64, at_micros);
            // k = 1: the very first packet completes the window
            let decision = match fill {
                SampleFill::Filled { last: true } => {
                    rec.sent_for_testing = true;
                    PacketDecision::TestReady
                }
                _ => PacketDecision::Continue,
            };
            self.flows.insert(tuple, rec);
            self.stats.record_flow_created();
            decision
        }
    }

    /// Merge expired-rule statistics for `tuple`.
    ///
    /// A miss means the completion path saw a flow the sampling path never
    /// did. That must not happen in correct operation, so it is surfaced
    /// as a diagnostic; the statistics are still inserted so nothing is
    /// lost for postmortem inspection.
    pub fn merge_statistics(
        &mut self,
        tuple: FlowTuple,
        stats: &FlowStats,
        at_micros: i64,
    ) -> MergeDecision {
        if let Some(rec) = self.flows.get_mut(&tuple) {
            rec.merge_stats(stats, at_micros);
            let train_ready = !rec.sent_for_training;
            rec.sent_for_training = true;
            self.stats.record_completion_merged();
            MergeDecision::Merged { train_ready }
        } else {
            tracing::warn!(
                src = %tuple.src_ip, src_port = tuple.src_port,
                dst = %tuple.dst_ip, dst_port = tuple.dst_port,
                "completion event for a flow the sampling path never saw"
            );
            self.make_room();
            let mut rec = FlowRecord::new(tuple, self.sample_width);
            rec.merge_stats(stats, at_micros);
            self.flows.insert(tuple, rec);
            self.stats.record_table_anomaly();
            MergeDecision::Inserted
        }
    }

    /// Borrow the record for `tuple`, if present.
    pub fn get(&self, tuple: &FlowTuple) -> Option<&FlowRecord> {
        self.flows.get(tuple)
    }

    /// Remove records not touched since `cutoff_micros`. Returns the
    /// number evicted.
    pub fn evict_older_than(&mut self, cutoff_micros: i64) -> usize {
        let before = self.flows.len();
        self.flows.retain(|_, rec| rec.touched_micros >= cutoff_micros);
        let evicted = before - self.flows.len();
        if evicted > 0 {
            self.stats.record_evicted(evicted as u64);
            tracing::debug!(evicted, live = self.flows.len(), "aged out stale flows");
        }
        evicted
    }

    /// Clone out every live record, for operator tooling.
    pub fn snapshot(&self) -> Vec<FlowRecord> {
        self.flows.values().cloned().collect()
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.flows.len()
    }

    /// Whether the table holds no records.
    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Evict the least recently touched record when the table is at its
    /// size bound, so an insert always has room.
    fn make_room(&mut self) {
        if self.flows.len() < self.max_flows {
            return;
        }
        if let Some(tuple) = self
            .flows
            .iter()
            .min_by_key(|(_, rec)| rec.touched_micros)
            .map(|(t, _)| *t)
        {
            self.flows.remove(&tuple);
            self.stats.record_evicted(1);
            tracing::debug!(
                src = %tuple.src_ip, dst = %tuple.dst_ip,
                "flow table full, evicted least recently touched flow"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(k: usize) -> FlowTable {
        FlowTable::new(k, 1024, Arc::new(EngineStats::default()))
    }

    fn tuple(src_port: u16) -> FlowTuple {
        FlowTuple::new(
            "10.0.0.1".parse().unwrap(),
            src_port,
            "10.0.0.2".parse().unwrap(),
            80,
        )
    }

    #[test]
    fn test_test_ready_after_k_packets() {
        for k in 1..=5 {
            let mut t = table(k);
            let tup = tuple(1000);
            let mut ready = 0;
            for i in 0..k {
                match t.observe_packet(tup, 64, i as i64) {
                    PacketDecision::TestReady => {
                        ready += 1;
                        assert_eq!(i, k - 1, "TestReady must fire on packet k");
                    }
                    PacketDecision::Continue => assert!(i < k - 1),
                }
            }
            assert_eq!(ready, 1, "exactly one TestReady for k={}", k);
            // fully sampled: every further packet is a no-op
            for _ in 0..3 {
                assert_eq!(t.observe_packet(tup, 64, 99), PacketDecision::Continue);
            }
            assert_eq!(t.len(), 1);
        }
    }

    #[test]
    fn test_distinct_tuples_distinct_records() {
        let mut t = table(3);
        t.observe_packet(tuple(1000), 64, 1);
        t.observe_packet(tuple(1001), 64, 2);
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_merge_max_and_single_train_ready() {
        let mut t = table(3);
        let tup = tuple(1000);
        t.observe_packet(tup, 64, 1);

        let mut stats = FlowStats {
            bytes: 100,
            packets: 10,
            ..Default::default()
        };
        assert_eq!(
            t.merge_statistics(tup, &stats, 2),
            MergeDecision::Merged { train_ready: true }
        );

        stats.bytes = 50;
        assert_eq!(
            t.merge_statistics(tup, &stats, 3),
            MergeDecision::Merged { train_ready: false }
        );
        assert_eq!(t.get(&tup).unwrap().bytes, 100);
    }

    #[test]
    fn test_completion_miss_is_inserted() {
        let mut t = table(3);
        let tup = tuple(1000);
        let stats = FlowStats {
            bytes: 77,
            ..Default::default()
        };
        assert_eq!(t.merge_statistics(tup, &stats, 1), MergeDecision::Inserted);
        assert_eq!(t.get(&tup).unwrap().bytes, 77);
    }

    #[test]
    fn test_anomaly_record_fills_slot_zero_first() {
        let mut t = table(3);
        let tup = tuple(1000);
        let stats = FlowStats {
            bytes: 10,
            ..Default::default()
        };
        assert_eq!(t.merge_statistics(tup, &stats, 1), MergeDecision::Inserted);

        // the completion path left the whole window unset, so sampling
        // resumes at slot 0
        assert_eq!(t.observe_packet(tup, 64, 5), PacketDecision::Continue);
        let rec = t.get(&tup).unwrap();
        assert_eq!(rec.packet_size[0], 64);
        assert_eq!(rec.packet_size[1], crate::record::SAMPLE_UNSET);
    }

    #[test]
    fn test_size_bound_evicts_oldest() {
        let mut t = FlowTable::new(2, 2, Arc::new(EngineStats::default()));
        t.observe_packet(tuple(1), 64, 10);
        t.observe_packet(tuple(2), 64, 20);
        t.observe_packet(tuple(3), 64, 30);
        assert_eq!(t.len(), 2);
        assert!(t.get(&tuple(1)).is_none(), "oldest flow should be evicted");
        assert!(t.get(&tuple(3)).is_some());
    }

    #[test]
    fn test_age_sweep() {
        let mut t = table(2);
        t.observe_packet(tuple(1), 64, 10);
        t.observe_packet(tuple(2), 64, 500);
        assert_eq!(t.evict_older_than(100), 1);
        assert!(t.get(&tuple(1)).is_none());
        assert!(t.get(&tuple(2)).is_some());
    }
}
