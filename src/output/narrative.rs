//! Human-readable running report

use super::{percent, ReportFormat, ReportOptions, TIME_UNIT};
use crate::models::{LatencyInterval, LatencySummary, ThroughputInterval, ThroughputSummary};
use crate::types::DatasetKind;
use std::fmt::Write;

pub struct NarrativeFormat {
    options: ReportOptions,
}

impl NarrativeFormat {
    pub fn new(options: ReportOptions) -> Self {
        Self { options }
    }

    fn finish_line(text: &mut String, cpu: Option<f64>) {
        if let Some(cpu) = cpu {
            let _ = write!(text, " CPU {:.2}%", cpu);
        }
        text.push('\n');
    }
}

impl ReportFormat for NarrativeFormat {
    fn begin_dataset(&mut self, _kind: DatasetKind, length: usize) -> String {
        if self.options.print_headers && self.options.print_intervals {
            format!("\n\n********** New data length is {}\n", length)
        } else {
            String::new()
        }
    }

    fn latency_interval(&mut self, _length: usize, interval: &LatencyInterval) -> String {
        let mut text = format!(
            "One way Latency: {:>6} {u} Ave {:>6.0} {u} Std {:>6.1} {u} Min {:>6} {u} Max {:>6} {u}",
            interval.latency,
            interval.average,
            interval.std_dev,
            interval.min,
            interval.max,
            u = TIME_UNIT
        );
        Self::finish_line(&mut text, interval.cpu);
        text
    }

    fn latency_summary(&mut self, length: usize, summary: &LatencySummary) -> String {
        let p = &summary.percentiles;
        let mut text = format!(
            "Length: {:>5} Latency: Ave {:>6.0} {u} Std {:>6.1} {u} Min {:>6} {u} Max {:>6} {u} \
             50% {:>6} {u} 90% {:>6} {u} 99% {:>6} {u} 99.99% {:>6} {u} 99.9999% {:>6} {u}",
            length,
            summary.average,
            summary.std_dev,
            summary.min,
            summary.max,
            p.p50,
            p.p90,
            p.p99,
            p.p9999,
            p.p999999,
            u = TIME_UNIT
        );
        Self::finish_line(&mut text, summary.cpu);
        text
    }

    fn throughput_interval(&mut self, _length: usize, interval: &ThroughputInterval) -> String {
        let mut text = format!(
            "Packets: {:>8}  Packets/s: {:>7.0}  Packets/s(ave): {:>7.0}  Mbps: {:>7.1}  Mbps(ave): {:>7.1}  Lost: {:>5} ({:.2}%)",
            interval.total_packets,
            interval.packets_per_sec,
            interval.packets_per_sec_avg,
            interval.mbps,
            interval.mbps_avg,
            interval.lost_packets,
            percent(interval.lost_ratio)
        );
        Self::finish_line(&mut text, interval.cpu);
        text
    }

    fn throughput_summary(&mut self, length: usize, summary: &ThroughputSummary) -> String {
        let mut text = format!(
            "Length: {:>5}  Packets: {:>8}  Packets/s(ave): {:>7}  Mbps(ave): {:>7.1}  Lost: {:>5} ({:.2}%)",
            length,
            summary.total_packets,
            summary.packets_per_sec,
            summary.mbps,
            summary.lost_packets,
            percent(summary.lost_ratio)
        );
        Self::finish_line(&mut text, summary.cpu);
        text
    }
}
