//! Streaming report renderer
//!
//! Listeners push interval and summary records as they happen. The renderer
//! turns them into one of three text formats and writes them straight to the
//! report sink. Diagnostics go to a separate sink so the report stream stays
//! machine-readable.

mod document;
mod narrative;
mod tabular;

pub use document::{DocumentFormat, DocumentState};
pub use narrative::NarrativeFormat;
pub use tabular::TabularFormat;

use crate::{
    error::Result,
    models::{
        Config, LatencyInterval, LatencySummary, ThroughputInterval, ThroughputSummary,
    },
    types::{DatasetKind, OutputFormat},
};
use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::Arc;

/// Unit label for latency columns
pub const TIME_UNIT: &str = "μs";

/// Renderer shared by a listener and its reporting loop
pub type SharedRenderer = Arc<Mutex<ReportRenderer>>;

/// Display switches common to every format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportOptions {
    pub print_headers: bool,
    pub print_intervals: bool,
    pub show_cpu: bool,
}

impl ReportOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            print_headers: !config.no_output_headers,
            print_intervals: !config.no_print_intervals,
            show_cpu: config.cpu,
        }
    }
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            print_headers: true,
            print_intervals: true,
            show_cpu: false,
        }
    }
}

/// One report format; every call returns the text to append to the stream
pub trait ReportFormat: Send {
    fn begin_stream(&mut self) -> String {
        String::new()
    }

    fn end_stream(&mut self) -> String {
        String::new()
    }

    fn begin_dataset(&mut self, kind: DatasetKind, length: usize) -> String;

    fn latency_interval(&mut self, length: usize, interval: &LatencyInterval) -> String;

    fn latency_summary(&mut self, length: usize, summary: &LatencySummary) -> String;

    fn throughput_interval(&mut self, length: usize, interval: &ThroughputInterval) -> String;

    fn throughput_summary(&mut self, length: usize, summary: &ThroughputSummary) -> String;
}

/// Output format factory
pub struct OutputFormatFactory;

impl OutputFormatFactory {
    pub fn create(format: OutputFormat, options: ReportOptions) -> Box<dyn ReportFormat> {
        match format {
            OutputFormat::Csv => Box::new(TabularFormat::new(options)),
            OutputFormat::Json => Box::new(DocumentFormat::new(options)),
            OutputFormat::Legacy => Box::new(NarrativeFormat::new(options)),
        }
    }
}

/// Stateful renderer writing one format to a report sink
pub struct ReportRenderer {
    format: Box<dyn ReportFormat>,
    out: Box<dyn Write + Send>,
    diagnostics: Box<dyn Write + Send>,
    data_length: usize,
}

impl ReportRenderer {
    /// Renderer writing the report to stdout and diagnostics to stderr
    pub fn new(format: OutputFormat, options: ReportOptions, data_length: usize) -> Self {
        Self::with_sinks(
            format,
            options,
            data_length,
            Box::new(io::stdout()),
            Box::new(io::stderr()),
        )
    }

    pub fn with_sinks(
        format: OutputFormat,
        options: ReportOptions,
        data_length: usize,
        out: Box<dyn Write + Send>,
        diagnostics: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            format: OutputFormatFactory::create(format, options),
            out,
            diagnostics,
            data_length,
        }
    }

    /// Renderer that discards everything
    pub fn discarding(format: OutputFormat, options: ReportOptions, data_length: usize) -> Self {
        Self::with_sinks(
            format,
            options,
            data_length,
            Box::new(io::sink()),
            Box::new(io::sink()),
        )
    }

    pub fn into_shared(self) -> SharedRenderer {
        Arc::new(Mutex::new(self))
    }

    /// Length label of the current dataset, overhead included
    pub fn data_length(&self) -> usize {
        self.data_length
    }

    pub fn begin_stream(&mut self) -> Result<()> {
        let text = self.format.begin_stream();
        self.emit(&text)
    }

    pub fn end_stream(&mut self) -> Result<()> {
        let text = self.format.end_stream();
        self.emit(&text)
    }

    pub fn begin_dataset(&mut self, kind: DatasetKind, length: usize) -> Result<()> {
        self.data_length = length;
        let text = self.format.begin_dataset(kind, length);
        self.emit(&text)
    }

    pub fn latency_interval(&mut self, interval: &LatencyInterval) -> Result<()> {
        let text = self.format.latency_interval(self.data_length, interval);
        self.emit(&text)
    }

    pub fn latency_summary(&mut self, summary: &LatencySummary) -> Result<()> {
        let text = self.format.latency_summary(self.data_length, summary);
        self.emit(&text)
    }

    pub fn throughput_interval(&mut self, interval: &ThroughputInterval) -> Result<()> {
        let text = self.format.throughput_interval(self.data_length, interval);
        self.emit(&text)
    }

    pub fn throughput_summary(&mut self, summary: &ThroughputSummary) -> Result<()> {
        let text = self.format.throughput_summary(self.data_length, summary);
        self.emit(&text)
    }

    /// Write a user-facing diagnostic outside the report stream
    pub fn diagnostic(&mut self, message: &str) -> Result<()> {
        self.diagnostics.write_all(message.as_bytes())?;
        self.diagnostics.flush()?;
        Ok(())
    }

    fn emit(&mut self, text: &str) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        self.out.write_all(text.as_bytes())?;
        self.out.flush()?;
        Ok(())
    }
}

/// Cloneable in-memory sink, mainly for capturing a report
#[derive(Debug, Clone, Default)]
pub struct MemorySink(Arc<Mutex<Vec<u8>>>);

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Percentage of a `0..=1` ratio
pub(crate) fn percent(ratio: f64) -> f64 {
    ratio * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Percentiles;

    fn capture(format: OutputFormat, options: ReportOptions) -> (ReportRenderer, MemorySink, MemorySink) {
        let out = MemorySink::new();
        let diag = MemorySink::new();
        let renderer = ReportRenderer::with_sinks(
            format,
            options,
            100,
            Box::new(out.clone()),
            Box::new(diag.clone()),
        );
        (renderer, out, diag)
    }

    fn summary() -> LatencySummary {
        LatencySummary {
            count: 3,
            average: 12.0,
            std_dev: 1.5,
            min: 10,
            max: 14,
            percentiles: Percentiles { p50: 12, p90: 14, p99: 14, p9999: 14, p999999: 14 },
            cpu: None,
        }
    }

    #[test]
    fn test_diagnostics_stay_out_of_the_report() {
        let (mut renderer, out, diag) = capture(OutputFormat::Json, ReportOptions::default());
        renderer.begin_stream().unwrap();
        renderer.diagnostic("No samples\n").unwrap();
        renderer.end_stream().unwrap();

        assert!(!out.contents().contains("No samples"));
        assert_eq!(diag.contents(), "No samples\n");
        let doc: serde_json::Value = serde_json::from_str(&out.contents()).unwrap();
        assert!(doc["perftest"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_dataset_sets_length_label() {
        let (mut renderer, out, _) = capture(OutputFormat::Legacy, ReportOptions::default());
        renderer.begin_dataset(DatasetKind::Latency, 228).unwrap();
        assert_eq!(renderer.data_length(), 228);
        renderer.latency_summary(&summary()).unwrap();
        assert!(out.contents().contains("Length:   228"));
    }

    #[test]
    fn test_factory_selects_format() {
        for format in [OutputFormat::Csv, OutputFormat::Json, OutputFormat::Legacy] {
            let (mut renderer, out, _) = capture(format, ReportOptions::default());
            renderer.begin_stream().unwrap();
            renderer.latency_summary(&summary()).unwrap();
            renderer.end_stream().unwrap();
            let text = out.contents();
            match format {
                OutputFormat::Csv => assert!(text.contains("One-way Latency Summary")),
                OutputFormat::Json => assert!(text.starts_with("{\"perftest\":")),
                OutputFormat::Legacy => assert!(text.starts_with("Length:")),
            }
        }
    }

    #[test]
    fn test_options_from_config() {
        let mut config = Config::default();
        config.no_output_headers = true;
        config.cpu = true;
        let options = ReportOptions::from_config(&config);
        assert!(!options.print_headers);
        assert!(options.print_intervals);
        assert!(options.show_cpu);
    }
}
