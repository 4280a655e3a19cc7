//! Report records handed from the listeners to the renderer
//!
//! Every record carries an optional CPU reading. `None` means CPU reporting
//! is off and the renderer omits the column entirely.

use serde::{Deserialize, Serialize};

/// Latency percentile ladder of one summary, in microseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Percentiles {
    pub p50: u32,
    pub p90: u32,
    pub p99: u32,
    pub p9999: u32,
    pub p999999: u32,
}

/// One pong as printed in the interval stream
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencyInterval {
    /// One-way latency of this pong
    pub latency: u32,
    /// Running mean so far
    pub average: f64,
    /// Running standard deviation so far
    pub std_dev: f64,
    pub min: u32,
    pub max: u32,
    pub cpu: Option<f64>,
}

/// Latency summary for one data length
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    /// Number of samples the summary covers
    pub count: u64,
    pub average: f64,
    pub std_dev: f64,
    pub min: u32,
    pub max: u32,
    pub percentiles: Percentiles,
    pub cpu: Option<f64>,
}

/// Throughput of the last reporting tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThroughputInterval {
    /// Packets received in the current dataset so far
    pub total_packets: u64,
    pub packets_per_sec: f64,
    pub packets_per_sec_avg: f64,
    pub mbps: f64,
    pub mbps_avg: f64,
    /// Cumulative missing packets in the current dataset
    pub lost_packets: u64,
    /// `lost / (received + lost)`, as a fraction
    pub lost_ratio: f64,
    pub cpu: Option<f64>,
}

/// Throughput summary for one data length
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThroughputSummary {
    pub total_packets: u64,
    pub packets_per_sec: u64,
    pub mbps: f64,
    pub lost_packets: u64,
    pub lost_ratio: f64,
    pub cpu: Option<f64>,
}

impl ThroughputSummary {
    /// Build a summary from raw interval counters.
    ///
    /// Returns `None` only when no packet arrived. A window shorter than a
    /// microsecond counts as one.
    pub fn from_counters(
        packets: u64,
        bytes: u64,
        missing: u64,
        interval_usec: u64,
        cpu: Option<f64>,
    ) -> Option<Self> {
        if packets == 0 {
            return None;
        }

        let seconds = interval_usec.max(1) as f64 / 1e6;
        Some(Self {
            total_packets: packets,
            packets_per_sec: (packets as f64 / seconds) as u64,
            mbps: bytes as f64 * 8.0 / seconds / 1e6,
            lost_packets: missing,
            lost_ratio: lost_ratio(packets, missing),
            cpu,
        })
    }
}

/// Fraction of packets lost out of those expected
pub fn lost_ratio(received: u64, missing: u64) -> f64 {
    let expected = received + missing;
    if expected == 0 {
        0.0
    } else {
        missing as f64 / expected as f64
    }
}
