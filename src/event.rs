//! Event value objects fed into the engine.
//!
//! The hosting controller owns packet classification and flow-rule
//! introspection; by the time an event reaches this crate it has been
//! reduced to one of the plain values below. The engine never inspects
//! controller-specific types.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};

/// MAC address as raw bytes.
pub type MacAddr = [u8; 6];

/// Flow identity: the 4-tuple.
///
/// The key is direction-sensitive: forward and reverse traffic of the same
/// connection are tracked as two unrelated flows unless the caller
/// normalizes the tuple. This mirrors how the sampling switch reports
/// flows and is kept as-is; folding directions together would change
/// classification semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowTuple {
    /// Source IP address
    pub src_ip: IpAddr,
    /// Source transport port (for ICMP: 256 * type + code, reported as dst)
    pub src_port: u16,
    /// Destination IP address
    pub dst_ip: IpAddr,
    /// Destination transport port
    pub dst_port: u16,
}

impl FlowTuple {
    /// Create a new flow tuple
    pub fn new(src_ip: IpAddr, src_port: u16, dst_ip: IpAddr, dst_port: u16) -> Self {
        Self {
            src_ip,
            src_port,
            dst_ip,
            dst_port,
        }
    }
}

impl Default for FlowTuple {
    fn default() -> Self {
        Self {
            src_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            src_port: 0,
            dst_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            dst_port: 0,
        }
    }
}

/// A packet observed on the early-sampling path.
#[derive(Debug, Clone, Copy)]
pub struct PacketObserved {
    /// Flow identity
    pub tuple: FlowTuple,
    /// Total IP length of the packet in bytes
    pub size_bytes: u32,
    /// Arrival timestamp, microseconds
    pub at_micros: i64,
}

/// Aggregate statistics delivered when a flow rule expires.
///
/// Fields absent from the underlying rule arrive here as their documented
/// sentinel defaults (zero MAC, port 0, protocol 0xff); missing criteria
/// are recovered by the collaborator, never surfaced as errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlowStats {
    /// Rule installation time, milliseconds since epoch
    pub start_time_ms: i64,
    /// Rule removal time, milliseconds since epoch
    pub end_time_ms: i64,
    /// Total bytes matched
    pub bytes: u64,
    /// Total packets matched
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
    /// Type of service octet (DSCP << 2 | ECN)
    pub tos: u8,
}

/// A flow rule expired on the completion path.
#[derive(Debug, Clone, Copy)]
pub struct FlowExpired {
    /// Flow identity
    pub tuple: FlowTuple,
    /// Aggregate counters and header fields from the expired rule
    pub stats: FlowStats,
}

/// Current wall-clock time in microseconds.
#[inline]
pub fn now_micros() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

/// Current wall-clock time in milliseconds.
#[inline]
pub fn now_millis() -> i64 {
    now_micros() / 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tuple_direction_sensitive() {
        let a = FlowTuple::new("10.0.0.1".parse().unwrap(), 1000, "10.0.0.2".parse().unwrap(), 80);
        let b = FlowTuple::new("10.0.0.2".parse().unwrap(), 80, "10.0.0.1".parse().unwrap(), 1000);
        assert_ne!(a, b);
    }

    #[test]
    fn test_default_tuple_unspecified() {
        let t = FlowTuple::default();
        assert!(t.src_ip.is_unspecified());
        assert_eq!(t.src_port, 0);
    }
}
