//! Fixed-width comma separated rows

use super::{percent, ReportFormat, ReportOptions, TIME_UNIT};
use crate::models::{LatencyInterval, LatencySummary, ThroughputInterval, ThroughputSummary};
use crate::types::DatasetKind;
use std::fmt::Write;

/// Tabular format with optional header rows
pub struct TabularFormat {
    options: ReportOptions,
    /// Dataset whose interval header was last printed
    interval_header: Option<(DatasetKind, usize)>,
    /// Cleared after the first summary header when intervals are off
    print_summary_headers: bool,
}

impl TabularFormat {
    pub fn new(options: ReportOptions) -> Self {
        Self {
            options,
            interval_header: None,
            print_summary_headers: true,
        }
    }

    fn cpu_header(&self, line: &mut String) {
        if self.options.show_cpu {
            line.push_str(", CPU (%)");
        }
        line.push('\n');
    }

    fn cpu_cell(line: &mut String, cpu: Option<f64>) {
        if let Some(cpu) = cpu {
            let _ = write!(line, ",{:>8.2}", cpu);
        }
        line.push('\n');
    }

    /// Summary header, repeated per dataset only while intervals are printed
    fn summary_header(&mut self, title: &str, columns: &str) -> String {
        let mut text = String::new();
        if !(self.print_summary_headers && self.options.print_headers) {
            return text;
        }
        if self.options.print_intervals {
            text.push_str(title);
        } else {
            self.print_summary_headers = false;
        }
        text.push_str(columns);
        self.cpu_header(&mut text);
        text
    }
}

impl ReportFormat for TabularFormat {
    fn begin_dataset(&mut self, kind: DatasetKind, length: usize) -> String {
        let mut text = String::new();
        if !(self.options.print_headers && self.options.print_intervals) {
            return text;
        }
        if self.interval_header == Some((kind, length)) {
            return text;
        }
        self.interval_header = Some((kind, length));

        match kind {
            DatasetKind::Latency => {
                let _ = write!(text, "\nIntervals One-way Latency for {} Bytes:\n", length);
                let _ = write!(
                    text,
                    "Length (Bytes), Latency ({u}), Ave ({u}), Std ({u}), Min ({u}), Max ({u})",
                    u = TIME_UNIT
                );
            }
            DatasetKind::Throughput => {
                let _ = write!(text, "\nIntervals Throughput for {} Bytes:\n", length);
                text.push_str(
                    "Length (Bytes), Total Samples,  Samples/s, Avg Samples/s,     Mbps,  Avg Mbps, Lost Samples, Lost Samples (%)",
                );
            }
        }
        self.cpu_header(&mut text);
        text
    }

    fn latency_interval(&mut self, length: usize, interval: &LatencyInterval) -> String {
        let mut text = format!(
            "{:>14},{:>13},{:>9.0},{:>9.1},{:>9},{:>9}",
            length, interval.latency, interval.average, interval.std_dev, interval.min, interval.max
        );
        Self::cpu_cell(&mut text, interval.cpu);
        text
    }

    fn latency_summary(&mut self, length: usize, summary: &LatencySummary) -> String {
        let columns = format!(
            "Sample Size (Bytes), Ave ({u}), Std ({u}), Min ({u}), Max ({u}), 50% ({u}), 90% ({u}), 99% ({u}), 99.99% ({u}), 99.9999% ({u})",
            u = TIME_UNIT
        );
        let mut text = self.summary_header("\nOne-way Latency Summary:\n", &columns);
        let p = &summary.percentiles;
        let _ = write!(
            text,
            "{:>19},{:>9.0},{:>9.1},{:>9},{:>9},{:>9},{:>9},{:>9},{:>12},{:>14}",
            length,
            summary.average,
            summary.std_dev,
            summary.min,
            summary.max,
            p.p50,
            p.p90,
            p.p99,
            p.p9999,
            p.p999999
        );
        Self::cpu_cell(&mut text, summary.cpu);
        self.interval_header = None;
        text
    }

    fn throughput_interval(&mut self, length: usize, interval: &ThroughputInterval) -> String {
        let mut text = format!(
            "{:>14},{:>14},{:>11.0},{:>14.0},{:>9.1},{:>10.1},{:>13},{:>17.2}",
            length,
            interval.total_packets,
            interval.packets_per_sec,
            interval.packets_per_sec_avg,
            interval.mbps,
            interval.mbps_avg,
            interval.lost_packets,
            percent(interval.lost_ratio)
        );
        Self::cpu_cell(&mut text, interval.cpu);
        text
    }

    fn throughput_summary(&mut self, length: usize, summary: &ThroughputSummary) -> String {
        let mut text = self.summary_header(
            "\nThroughput Summary:\n",
            "Sample Size (Bytes), Total Samples, Avg Samples/s,    Avg Mbps, Lost Samples, Lost Samples (%)",
        );
        let _ = write!(
            text,
            "{:>19},{:>14},{:>14},{:>12.1},{:>13},{:>17.2}",
            length,
            summary.total_packets,
            summary.packets_per_sec,
            summary.mbps,
            summary.lost_packets,
            percent(summary.lost_ratio)
        );
        Self::cpu_cell(&mut text, summary.cpu);
        self.interval_header = None;
        text
    }
}
