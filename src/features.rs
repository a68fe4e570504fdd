//! Labeling rule and attribute-vector encoding.
//!
//! The attribute vector mirrors the relation schema declared on the wire:
//! `[src_port, dst_port, ip_protocol, packet_size_1..k,
//! inter_arrival_time_1_2..inter_arrival_time_(k-1)_k, class]`.

use crate::arff::Attribute;
use crate::record::FlowRecord;
use thiserror::Error;

/// Class label streamed to the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    /// Long, high-bandwidth flow (`E`)
    Elephant,
    /// Everything else (`X`)
    Mouse,
}

impl Label {
    /// Wire representation of the label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Elephant => "E",
            Label::Mouse => "X",
        }
    }
}

/// Placeholder class value for unlabeled (testing) rows.
pub const UNLABELED: &str = "X";

/// Elephant/mouse decision thresholds.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    /// Bandwidth threshold, Mbit/s
    pub bandwidth_mbps: f64,
    /// Duration threshold, seconds
    pub duration_secs: f64,
    /// Reactive-forwarding idle timeout folded out of the flow duration
    pub idle_timeout_secs: f64,
}

/// Degenerate classification input.
#[derive(Debug, Error)]
pub enum ClassificationError {
    /// Duration after removing the idle timeout is zero or negative, so
    /// the bandwidth computation has no meaning
    #[error("degenerate flow duration {0:.3} s")]
    DegenerateDuration(f64),
}

/// Decide the ground-truth label for a completed flow.
///
/// `duration = (end - start)/1000 - idle_timeout`; the idle timeout is
/// subtracted because the rule lingers that long after the last packet.
/// A non-positive duration fails fast instead of propagating NaN or a
/// silently wrong label.
pub fn classify(
    record: &FlowRecord,
    thresholds: &Thresholds,
) -> Result<Label, ClassificationError> {
    let duration =
        (record.end_time_ms - record.start_time_ms) as f64 / 1000.0 - thresholds.idle_timeout_secs;
    if duration <= 0.0 {
        return Err(ClassificationError::DegenerateDuration(duration));
    }
    let bandwidth_mbps = record.bytes as f64 * 8.0 / 1_000_000.0 / duration;
    if bandwidth_mbps > thresholds.bandwidth_mbps && duration > thresholds.duration_secs {
        Ok(Label::Elephant)
    } else {
        Ok(Label::Mouse)
    }
}

/// Encode a record as the textual attribute vector with the given class.
///
/// Inter-arrival values are successive differences of the timestamp
/// sequence. A sentinel timestamp in either half of a pair yields a
/// meaningless negative value; for not-yet-fully-sampled rows this is
/// accepted noise rather than an error.
pub fn encode(record: &FlowRecord, class: &str) -> Vec<String> {
    let k = record.sample_width();
    let mut row = Vec::with_capacity(3 + k + k.saturating_sub(1) + 1);
    row.push(record.tuple.src_port.to_string());
    row.push(record.tuple.dst_port.to_string());
    row.push(record.ip_protocol.to_string());
    for size in &record.packet_size {
        row.push(size.to_string());
    }
    for pair in record.packet_time.windows(2) {
        row.push((pair[1] - pair[0]).to_string());
    }
    row.push(class.to_string());
    row
}

/// Build the relation schema for a sample window of width `k`.
pub fn flow_attributes(k: usize) -> Vec<Attribute> {
    let mut attrs = Vec::with_capacity(3 + k + k.saturating_sub(1) + 1);
    attrs.push(Attribute::text("src_port"));
    attrs.push(Attribute::text("dst_port"));
    attrs.push(Attribute::text("ip_protocol"));
    for i in 1..=k {
        attrs.push(Attribute::numeric(format!("packet_size_{i}")));
    }
    for i in 1..k {
        attrs.push(Attribute::numeric(format!(
            "inter_arrival_time_{}_{}",
            i,
            i + 1
        )));
    }
    attrs.push(Attribute::nominal("class", &["X", "E"]));
    attrs
}
