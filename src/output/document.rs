//! Structured-document format
//!
//! The whole run is one JSON object: `{"perftest": [ dataset, ... ]}`. Each
//! dataset holds its length, an optional `intervals` array and a `summary`.
//! Text is streamed as events arrive, so the bracket and comma placement is
//! driven by [`DocumentState`].

use super::{percent, ReportFormat, ReportOptions};
use crate::models::{LatencyInterval, LatencySummary, ThroughputInterval, ThroughputSummary};
use crate::types::DatasetKind;
use std::fmt::Write;

/// Streaming position inside the document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentState {
    /// Nothing written yet
    NotStarted,
    /// Top-level array open, no dataset open
    StreamOpen,
    /// Dataset object open without an interval array
    DatasetOpen,
    /// Interval array open holding `entries` entries
    IntervalArrayOpen { entries: usize },
    /// Dataset object closed by its summary
    DatasetClosed,
    /// Closing brackets written; later events are dropped
    StreamClosed,
}

pub struct DocumentFormat {
    options: ReportOptions,
    state: DocumentState,
    /// Dataset objects opened so far
    datasets: usize,
}

impl DocumentFormat {
    pub fn new(options: ReportOptions) -> Self {
        Self {
            options,
            state: DocumentState::NotStarted,
            datasets: 0,
        }
    }

    pub fn state(&self) -> DocumentState {
        self.state
    }

    fn open_stream(&mut self, text: &mut String) {
        if self.state == DocumentState::NotStarted {
            text.push_str("{\"perftest\":\n\t[");
            self.state = DocumentState::StreamOpen;
        }
    }

    /// Close an unfinished dataset with a null summary
    fn close_dangling(&mut self, text: &mut String) {
        match self.state {
            DocumentState::IntervalArrayOpen { .. } => {
                text.push_str("\n\t\t\t],\n\t\t\t\"summary\":null\n\t\t}");
            }
            DocumentState::DatasetOpen => {
                text.push_str("\t\t\t\"summary\":null\n\t\t}");
            }
            _ => return,
        }
        self.state = DocumentState::DatasetClosed;
    }

    fn open_dataset(&mut self, length: usize, text: &mut String) {
        self.open_stream(text);
        self.close_dangling(text);

        if self.datasets > 0 {
            text.push(',');
        }
        self.datasets += 1;
        let _ = write!(text, "\n\t\t{{\n\t\t\t\"length\":{},\n", length);

        if self.options.print_intervals {
            text.push_str("\t\t\t\"intervals\":[\n");
            self.state = DocumentState::IntervalArrayOpen { entries: 0 };
        } else {
            self.state = DocumentState::DatasetOpen;
        }
    }

    /// Prefix for the next interval entry, or `None` if intervals are off
    fn interval_prefix(&mut self, length: usize) -> Option<String> {
        let mut text = String::new();
        match self.state {
            DocumentState::StreamClosed => return None,
            DocumentState::DatasetOpen => return None,
            DocumentState::IntervalArrayOpen { .. } => {}
            _ => {
                if !self.options.print_intervals {
                    return None;
                }
                self.open_dataset(length, &mut text);
            }
        }

        if let DocumentState::IntervalArrayOpen { entries } = &mut self.state {
            if *entries > 0 {
                text.push(',');
            }
            *entries += 1;
        }
        Some(text)
    }

    /// Prefix for a summary object, opening a dataset if none is open
    fn summary_prefix(&mut self, length: usize) -> Option<String> {
        let mut text = String::new();
        match self.state {
            DocumentState::StreamClosed => return None,
            DocumentState::IntervalArrayOpen { .. } => text.push_str("\n\t\t\t],\n"),
            DocumentState::DatasetOpen => {}
            _ => {
                self.open_dataset(length, &mut text);
                if let DocumentState::IntervalArrayOpen { .. } = self.state {
                    text.push_str("\n\t\t\t],\n");
                }
            }
        }
        self.state = DocumentState::DatasetClosed;
        Some(text)
    }

    fn cpu_field(text: &mut String, cpu: Option<f64>, indent: &str) {
        if let Some(cpu) = cpu {
            let _ = write!(text, ",\n{}\"cpu\": {:.1}", indent, cpu);
        }
    }
}

impl ReportFormat for DocumentFormat {
    fn begin_stream(&mut self) -> String {
        let mut text = String::new();
        self.open_stream(&mut text);
        text
    }

    fn end_stream(&mut self) -> String {
        let mut text = String::new();
        if self.state == DocumentState::StreamClosed {
            return text;
        }
        self.open_stream(&mut text);
        self.close_dangling(&mut text);
        text.push_str("\n\t]\n}\n");
        self.state = DocumentState::StreamClosed;
        text
    }

    fn begin_dataset(&mut self, _kind: DatasetKind, length: usize) -> String {
        let mut text = String::new();
        if self.state != DocumentState::StreamClosed {
            self.open_dataset(length, &mut text);
        }
        text
    }

    fn latency_interval(&mut self, length: usize, interval: &LatencyInterval) -> String {
        let Some(mut text) = self.interval_prefix(length) else {
            return String::new();
        };
        let _ = write!(
            text,
            "\n\t\t\t\t{{\n\
             \t\t\t\t\t\"latency\": {},\n\
             \t\t\t\t\t\"latency_ave\": {:.0},\n\
             \t\t\t\t\t\"latency_std\": {:.1},\n\
             \t\t\t\t\t\"latency_min\": {},\n\
             \t\t\t\t\t\"latency_max\": {}",
            interval.latency, interval.average, interval.std_dev, interval.min, interval.max
        );
        Self::cpu_field(&mut text, interval.cpu, "\t\t\t\t\t");
        text.push_str("\n\t\t\t\t}");
        text
    }

    fn latency_summary(&mut self, length: usize, summary: &LatencySummary) -> String {
        let Some(mut text) = self.summary_prefix(length) else {
            return String::new();
        };
        let p = &summary.percentiles;
        let _ = write!(
            text,
            "\t\t\t\"summary\":{{\n\
             \t\t\t\t\"latency_ave\": {:.1},\n\
             \t\t\t\t\"latency_std\": {:.1},\n\
             \t\t\t\t\"latency_min\": {},\n\
             \t\t\t\t\"latency_max\": {},\n\
             \t\t\t\t\"latency_50\": {},\n\
             \t\t\t\t\"latency_90\": {},\n\
             \t\t\t\t\"latency_99\": {},\n\
             \t\t\t\t\"latency_99.99\": {},\n\
             \t\t\t\t\"latency_99.9999\": {}",
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
        Self::cpu_field(&mut text, summary.cpu, "\t\t\t\t");
        text.push_str("\n\t\t\t}\n\t\t}");
        text
    }

    fn throughput_interval(&mut self, length: usize, interval: &ThroughputInterval) -> String {
        let Some(mut text) = self.interval_prefix(length) else {
            return String::new();
        };
        let _ = write!(
            text,
            "\n\t\t\t\t{{\n\
             \t\t\t\t\t\"length\": {},\n\
             \t\t\t\t\t\"packets\": {},\n\
             \t\t\t\t\t\"packets/s\": {:.0},\n\
             \t\t\t\t\t\"packets/s_ave\": {:.2},\n\
             \t\t\t\t\t\"mbps\": {:.1},\n\
             \t\t\t\t\t\"mbps_ave\": {:.1},\n\
             \t\t\t\t\t\"lost\": {},\n\
             \t\t\t\t\t\"lost_percent\": {:.2}",
            length,
            interval.total_packets,
            interval.packets_per_sec,
            interval.packets_per_sec_avg,
            interval.mbps,
            interval.mbps_avg,
            interval.lost_packets,
            percent(interval.lost_ratio)
        );
        Self::cpu_field(&mut text, interval.cpu, "\t\t\t\t\t");
        text.push_str("\n\t\t\t\t}");
        text
    }

    fn throughput_summary(&mut self, length: usize, summary: &ThroughputSummary) -> String {
        let Some(mut text) = self.summary_prefix(length) else {
            return String::new();
        };
        let _ = write!(
            text,
            "\t\t\t\"summary\":{{\n\
             \t\t\t\t\"packets\": {},\n\
             \t\t\t\t\"packets/sAve\": {},\n\
             \t\t\t\t\"mbpsAve\": {:.1},\n\
             \t\t\t\t\"lost\": {},\n\
             \t\t\t\t\"lostPercent\": {:.2}",
            summary.total_packets,
            summary.packets_per_sec,
            summary.mbps,
            summary.lost_packets,
            percent(summary.lost_ratio)
        );
        Self::cpu_field(&mut text, summary.cpu, "\t\t\t\t");
        text.push_str("\n\t\t\t}\n\t\t}");
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Percentiles;
    use serde_json::Value;

    fn interval(latency: u32) -> LatencyInterval {
        LatencyInterval { latency, average: 10.0, std_dev: 1.0, min: 9, max: 11, cpu: None }
    }

    fn summary(cpu: Option<f64>) -> LatencySummary {
        LatencySummary {
            count: 2,
            average: 10.0,
            std_dev: 1.0,
            min: 9,
            max: 11,
            percentiles: Percentiles { p50: 10, p90: 11, p99: 11, p9999: 11, p999999: 11 },
            cpu,
        }
    }

    fn throughput(packets: u64) -> ThroughputInterval {
        ThroughputInterval {
            total_packets: packets,
            packets_per_sec: 100.0,
            packets_per_sec_avg: 100.0,
            mbps: 0.1,
            mbps_avg: 0.1,
            lost_packets: 0,
            lost_ratio: 0.0,
            cpu: None,
        }
    }

    fn parse(text: &str) -> Value {
        serde_json::from_str(text).unwrap_or_else(|e| panic!("{}: {}", e, text))
    }

    #[test]
    fn test_two_datasets_two_intervals_each() {
        let mut doc = DocumentFormat::new(ReportOptions::default());
        let mut text = doc.begin_stream();
        for length in [100, 200] {
            text += &doc.begin_dataset(DatasetKind::Latency, length);
            text += &doc.latency_interval(length, &interval(1));
            text += &doc.latency_interval(length, &interval(2));
            text += &doc.latency_summary(length, &summary(None));
        }
        text += &doc.end_stream();

        // One comma between the two dataset objects, one inside each array
        assert_eq!(text.matches("},\n\t\t{\n\t\t\t\"length\"").count(), 1);
        assert_eq!(text.matches("\t\t\t\t},\n\t\t\t\t{").count(), 2);

        let value = parse(&text);
        let datasets = value["perftest"].as_array().unwrap();
        assert_eq!(datasets.len(), 2);
        assert_eq!(datasets[1]["length"], 200);
        assert_eq!(datasets[0]["intervals"].as_array().unwrap().len(), 2);
        assert_eq!(datasets[0]["summary"]["latency_99.9999"], 11);
    }

    #[test]
    fn test_exact_prefix_layout() {
        let mut doc = DocumentFormat::new(ReportOptions::default());
        let text = doc.begin_stream() + &doc.begin_dataset(DatasetKind::Throughput, 100);
        assert_eq!(text, "{\"perftest\":\n\t[\n\t\t{\n\t\t\t\"length\":100,\n\t\t\t\"intervals\":[\n");
        assert_eq!(doc.state(), DocumentState::IntervalArrayOpen { entries: 0 });
    }

    #[test]
    fn test_without_intervals() {
        let options = ReportOptions { print_intervals: false, ..ReportOptions::default() };
        let mut doc = DocumentFormat::new(options);
        let mut text = doc.begin_stream();
        text += &doc.begin_dataset(DatasetKind::Latency, 100);
        assert!(doc.latency_interval(100, &interval(1)).is_empty());
        text += &doc.latency_summary(100, &summary(None));
        text += &doc.end_stream();

        let value = parse(&text);
        assert!(value["perftest"][0].get("intervals").is_none());
        assert_eq!(value["perftest"][0]["summary"]["latency_50"], 10);
    }

    #[test]
    fn test_dangling_dataset_closed_with_null() {
        let mut doc = DocumentFormat::new(ReportOptions::default());
        let mut text = doc.begin_stream();
        text += &doc.begin_dataset(DatasetKind::Throughput, 100);
        text += &doc.throughput_interval(100, &throughput(5));
        text += &doc.begin_dataset(DatasetKind::Throughput, 200);
        text += &doc.end_stream();

        let value = parse(&text);
        let datasets = value["perftest"].as_array().unwrap();
        assert_eq!(datasets.len(), 2);
        assert!(datasets[0]["summary"].is_null());
        assert!(datasets[1]["summary"].is_null());
        assert_eq!(datasets[0]["intervals"][0]["packets"], 5);
    }

    #[test]
    fn test_summary_without_dataset_opens_one() {
        let mut doc = DocumentFormat::new(ReportOptions::default());
        let mut text = doc.begin_stream();
        text += &doc.throughput_summary(
            128,
            &ThroughputSummary {
                total_packets: 10,
                packets_per_sec: 10,
                mbps: 0.0,
                lost_packets: 0,
                lost_ratio: 0.0,
                cpu: Some(3.25),
            },
        );
        text += &doc.end_stream();

        let value = parse(&text);
        assert_eq!(value["perftest"][0]["length"], 128);
        assert_eq!(value["perftest"][0]["intervals"].as_array().unwrap().len(), 0);
        assert_eq!(value["perftest"][0]["summary"]["packets"], 10);
        assert!(value["perftest"][0]["summary"]["cpu"].is_number());
    }

    #[test]
    fn test_interval_without_stream_start() {
        let mut doc = DocumentFormat::new(ReportOptions::default());
        let mut text = doc.throughput_interval(100, &throughput(1));
        text += &doc.end_stream();
        let value = parse(&text);
        assert_eq!(value["perftest"][0]["intervals"][0]["packets/s"], 100);
    }

    #[test]
    fn test_events_after_close_are_dropped() {
        let mut doc = DocumentFormat::new(ReportOptions::default());
        let text = doc.begin_stream() + &doc.end_stream();
        assert!(doc.begin_dataset(DatasetKind::Latency, 100).is_empty());
        assert!(doc.latency_summary(100, &summary(None)).is_empty());
        assert!(doc.end_stream().is_empty());
        assert_eq!(text, "{\"perftest\":\n\t[\n\t]\n}\n");
    }

    #[test]
    fn test_cpu_field_omitted_when_disabled() {
        let mut doc = DocumentFormat::new(ReportOptions::default());
        doc.begin_stream();
        doc.begin_dataset(DatasetKind::Latency, 100);
        assert!(!doc.latency_summary(100, &summary(None)).contains("cpu"));
        doc.begin_dataset(DatasetKind::Latency, 200);
        assert!(doc.latency_summary(200, &summary(Some(1.0))).contains("\"cpu\": 1.0"));
    }
}
