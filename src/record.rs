//! Per-flow record: sampled leading packets plus aggregate statistics.

use crate::event::{FlowStats, FlowTuple, MacAddr};
use std::fmt;

/// Sentinel marking a sample slot that has not been observed yet.
pub const SAMPLE_UNSET: i64 = -1;

/// State of one in-progress or completed flow.
///
/// `packet_size` and `packet_time` always hold exactly `sample_width`
/// slots; slots fill monotonically from index 0 and a filled slot is never
/// overwritten. The two `sent_for_*` flags are one-shot: each record is
/// forwarded to the classifier at most once per channel.
#[derive(Debug, Clone)]
pub struct FlowRecord {
    /// Flow identity
    pub tuple: FlowTuple,
    /// Flow start, milliseconds since epoch
    pub start_time_ms: i64,
    /// Flow end, milliseconds since epoch
    pub end_time_ms: i64,
    /// Total bytes (monotonic across merges)
    pub bytes: u64,
    /// Total packets (monotonic across merges)
    pub packets: u64,
    /// Ingress switch port
    pub intf_in: u32,
    /// Egress switch port
    pub intf_out: u32,
    /// Source MAC
    pub src_mac: MacAddr,
    /// Destination MAC
    pub dst_mac: MacAddr,
    /// Ethertype
    pub eth_type: u16,
    /// VLAN id
    pub vlan: u16,
    /// IP protocol number
    pub ip_protocol: u8,
    /// Type of service octet
    pub tos: u8,
    /// Sizes of the first k packets, `SAMPLE_UNSET` where unobserved
    pub packet_size: Vec<i64>,
    /// Arrival timestamps (micros) of the first k packets
    pub packet_time: Vec<i64>,
    /// Set once the record has been streamed on the training channel
    pub sent_for_training: bool,
    /// Set once the record has been streamed on the testing channel
    pub sent_for_testing: bool,
    /// Last mutation timestamp, used by table eviction
    pub(crate) touched_micros: i64,
}

/// Outcome of recording one sampled packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFill {
    /// A slot was filled; `last` is true when it was slot k-1
    Filled {
        /// Whether the filled slot completed the sample window
        last: bool,
    },
    /// All k slots were already filled
    AlreadyFull,
}

impl FlowRecord {
    /// Create an empty record with a sample window of `sample_width` slots.
    pub fn new(tuple: FlowTuple, sample_width: usize) -> Self {
        Self {
            tuple,
            start_time_ms: 0,
            end_time_ms: 0,
            bytes: 0,
            packets: 0,
            intf_in: 0,
            intf_out: 0,
            src_mac: [0; 6],
            dst_mac: [0; 6],
            eth_type: 0,
            vlan: 0,
            ip_protocol: 0,
            tos: 0,
            packet_size: vec![SAMPLE_UNSET; sample_width],
            packet_time: vec![SAMPLE_UNSET; sample_width],
            sent_for_training: false,
            sent_for_testing: false,
            touched_micros: 0,
        }
    }

    /// Number of sample slots (k).
    pub fn sample_width(&self) -> usize {
        self.packet_size.len()
    }

    /// Fill the first unset sample slot with the observed size and time.
    ///
    /// Filled slots are never overwritten, so repeated calls walk the
    /// window forward exactly once per packet.
    pub fn record_sample(&mut self, size_bytes: i64, at_micros: i64) -> SampleFill {
        self.touched_micros = at_micros;
        let k = self.packet_size.len();
        for i in 0..k {
            if self.packet_size[i] == SAMPLE_UNSET {
                self.packet_size[i] = size_bytes;
                self.packet_time[i] = at_micros;
                return SampleFill::Filled { last: i == k - 1 };
            }
        }
        SampleFill::AlreadyFull
    }

    /// Whether all k sample slots hold observed packets.
    pub fn is_fully_sampled(&self) -> bool {
        self.packet_size.iter().all(|&s| s != SAMPLE_UNSET)
    }

    /// Merge an expired rule's aggregate statistics into this record.
    ///
    /// Byte and packet counters take the max of old and new so a late or
    /// duplicate controller report can never lower an observed value.
    /// Header and timing fields are overwritten by the latest observation.
    pub fn merge_stats(&mut self, stats: &FlowStats, at_micros: i64) {
        self.bytes = self.bytes.max(stats.bytes);
        self.packets = self.packets.max(stats.packets);
        self.start_time_ms = stats.start_time_ms;
        self.end_time_ms = stats.end_time_ms;
        self.intf_in = stats.intf_in;
        self.intf_out = stats.intf_out;
        self.src_mac = stats.src_mac;
        self.dst_mac = stats.dst_mac;
        self.eth_type = stats.eth_type;
        self.vlan = stats.vlan;
        self.ip_protocol = stats.ip_protocol;
        self.tos = stats.tos;
        self.touched_micros = at_micros;
    }
}

fn fmt_mac(mac: &MacAddr) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    )
}

impl fmt::Display for FlowRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kb = self.bytes / 1024;
        let mb = kb / 1024;
        let gb = mb / 1024;
        writeln!(f, "-----------------Flow Record---------------")?;
        writeln!(f, "Start Time  : {}", self.start_time_ms)?;
        writeln!(f, "End Time    : {}", self.end_time_ms)?;
        writeln!(
            f,
            "Bytes       : {} B\t{} KB\t{} MB\t{} GB",
            self.bytes, kb, mb, gb
        )?;
        writeln!(f, "Packets     : {}", self.packets)?;
        writeln!(f, "Port In     : {}", self.intf_in)?;
        writeln!(f, "Port Out    : {}", self.intf_out)?;
        writeln!(f, "Src Mac     : {}", fmt_mac(&self.src_mac))?;
        writeln!(f, "Dst Mac     : {}", fmt_mac(&self.dst_mac))?;
        writeln!(f, "Eth Type    : {}", self.eth_type)?;
        writeln!(f, "VLAN        : {}", self.vlan)?;
        writeln!(f, "IP Protocol : {}", self.ip_protocol)?;
        writeln!(f, "TOS         : {}", self.tos)?;
        writeln!(f, "Src IP      : {}", self.tuple.src_ip)?;
        writeln!(f, "Dst IP      : {}", self.tuple.dst_ip)?;
        writeln!(f, "Src Port    : {}", self.tuple.src_port)?;
        writeln!(f, "Dst Port    : {}", self.tuple.dst_port)?;
        writeln!(f, "Packet Size : {:?}", self.packet_size)?;
        writeln!(f, "Packet Time : {:?}", self.packet_time)
    }
}
