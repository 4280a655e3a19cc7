//! Configuration data model and validation

use crate::logging::LogLevel;
use crate::models::message::{MIN_PAYLOAD_SIZE, OVERHEAD_BYTES};
use crate::types::{AppError, OutputFormat, ReportSide, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Number of publisher entities
    #[serde(default = "default_num_publishers")]
    pub num_publishers: u32,

    /// Number of subscriber entities
    #[serde(default = "default_num_subscribers")]
    pub num_subscribers: u32,

    /// Bytes on the wire per sample, overhead included
    #[serde(default = "default_data_len")]
    pub data_len: usize,

    /// Data lengths to scan through; empty runs `data_len` only
    #[serde(default)]
    pub scan: Vec<usize>,

    /// Samples sent per data length
    #[serde(default = "default_num_iter")]
    pub num_iter: u64,

    /// A ping is sent every `latency_count` samples
    #[serde(default = "default_latency_count")]
    pub latency_count: u64,

    /// Latency-only run: the publisher waits for each pong
    #[serde(default)]
    pub latency_test: bool,

    /// Report process CPU usage
    #[serde(default)]
    pub cpu: bool,

    /// Print summaries only
    #[serde(default)]
    pub no_print_intervals: bool,

    /// Suppress tabular header rows
    #[serde(default)]
    pub no_output_headers: bool,

    /// Report stream format
    #[serde(default)]
    pub output_format: OutputFormat,

    /// Content-filtered delivery, disables loss detection
    #[serde(default)]
    pub content_filter: bool,

    /// Drive subscribers from a polling thread instead of callbacks
    #[serde(default)]
    pub use_read_thread: bool,

    /// How long a publisher waits for a pong
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,

    /// Subscriber reporting tick
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Upper bound for a whole run
    #[serde(default = "default_test_timeout_secs")]
    pub test_timeout_secs: u64,

    /// Side whose report is streamed; `None` picks by test mode
    #[serde(default)]
    pub report_side: Option<ReportSide>,

    /// Enable colored terminal output
    #[serde(default = "default_enable_color")]
    pub enable_color: bool,

    /// Enable verbose output
    #[serde(default)]
    pub verbose: bool,

    /// Enable debug output
    #[serde(default)]
    pub debug: bool,

    /// Explicit log level, overrides verbose/debug
    #[serde(default)]
    pub log_level: Option<LogLevel>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_publishers: default_num_publishers(),
            num_subscribers: default_num_subscribers(),
            data_len: default_data_len(),
            scan: Vec::new(),
            num_iter: default_num_iter(),
            latency_count: default_latency_count(),
            latency_test: false,
            cpu: false,
            no_print_intervals: false,
            no_output_headers: false,
            output_format: OutputFormat::default(),
            content_filter: false,
            use_read_thread: false,
            ping_timeout_ms: default_ping_timeout_ms(),
            interval_secs: default_interval_secs(),
            test_timeout_secs: default_test_timeout_secs(),
            report_side: None,
            enable_color: default_enable_color(),
            verbose: false,
            debug: false,
            log_level: None,
        }
    }
}

/// The slice of configuration a listener needs
#[derive(Debug, Clone, PartialEq)]
pub struct ListenerSettings {
    /// Publishers whose `Finished` ends the test
    pub num_publishers: usize,
    /// Own id, the ping marker this subscriber answers to
    pub subscriber_id: i32,
    pub content_filter: bool,
    pub show_cpu: bool,
    pub print_intervals: bool,
    /// Latency samples kept per data length
    pub history_capacity: usize,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Config::default().listener_settings(0)
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_timeout_secs)
    }

    /// Data lengths in the order they are tested
    pub fn data_lengths(&self) -> Vec<usize> {
        if self.scan.is_empty() {
            vec![self.data_len]
        } else {
            self.scan.clone()
        }
    }

    /// Pings per data length, plus one slot of slack
    pub fn history_capacity(&self) -> usize {
        let pings = self.num_iter / self.latency_count.max(1);
        usize::try_from(pings).unwrap_or(usize::MAX).saturating_add(1)
    }

    /// Side streamed to stdout when none was requested
    pub fn resolved_report_side(&self) -> ReportSide {
        self.report_side.unwrap_or(if self.latency_test {
            ReportSide::Publisher
        } else {
            ReportSide::Subscriber
        })
    }

    pub fn listener_settings(&self, subscriber_id: i32) -> ListenerSettings {
        ListenerSettings {
            num_publishers: self.num_publishers as usize,
            subscriber_id,
            content_filter: self.content_filter,
            show_cpu: self.cpu,
            print_intervals: !self.no_print_intervals,
            history_capacity: self.history_capacity(),
        }
    }

    /// Validate the configuration and return any errors
    pub fn validate(&self) -> Result<()> {
        let max_entities = crate::defaults::MAX_ENTITIES;
        if self.num_publishers == 0 || self.num_publishers > max_entities {
            return Err(AppError::config(format!(
                "Publisher count must be between 1 and {}, got {}",
                max_entities, self.num_publishers
            )));
        }

        if self.num_subscribers == 0 || self.num_subscribers > max_entities {
            return Err(AppError::config(format!(
                "Subscriber count must be between 1 and {}, got {}",
                max_entities, self.num_subscribers
            )));
        }

        let min_len = OVERHEAD_BYTES + MIN_PAYLOAD_SIZE;
        let max_len = crate::defaults::MAX_DATA_LEN;
        for len in self.data_lengths() {
            if len < min_len || len > max_len {
                return Err(AppError::config(format!(
                    "Data length {} is outside [{}, {}]",
                    len, min_len, max_len
                )));
            }
        }

        if !self.scan.is_empty() && self.num_publishers > 1 {
            return Err(AppError::config(format!(
                "Scan mode runs a single publisher, got {}",
                self.num_publishers
            )));
        }

        if self.num_iter == 0 {
            return Err(AppError::config("Iteration count must be greater than 0"));
        }

        if self.latency_count == 0 {
            return Err(AppError::config("Latency count must be greater than 0"));
        }

        if self.latency_count > self.num_iter {
            return Err(AppError::config(format!(
                "Latency count {} cannot exceed the iteration count {}",
                self.latency_count, self.num_iter
            )));
        }

        if self.ping_timeout_ms == 0 {
            return Err(AppError::config("Ping timeout must be greater than 0"));
        }

        if self.interval_secs == 0 {
            return Err(AppError::config("Reporting interval must be greater than 0"));
        }

        if self.test_timeout_secs == 0 {
            return Err(AppError::config("Test timeout must be greater than 0"));
        }

        Ok(())
    }

    /// Merge `PERFTEST_*` environment variables into this configuration
    pub fn merge_from_env(&mut self) -> Result<()> {
        if let Some(v) = env_value("PERFTEST_NUM_PUBLISHERS")? {
            self.num_publishers = v;
        }
        if let Some(v) = env_value("PERFTEST_NUM_SUBSCRIBERS")? {
            self.num_subscribers = v;
        }
        if let Some(v) = env_value("PERFTEST_DATA_LEN")? {
            self.data_len = v;
        }
        if let Ok(scan) = std::env::var("PERFTEST_SCAN") {
            self.scan = parse_scan_list(&scan)
                .map_err(|e| AppError::config(format!("Invalid PERFTEST_SCAN value '{}': {}", scan, e)))?;
        }
        if let Some(v) = env_value("PERFTEST_NUM_ITER")? {
            self.num_iter = v;
        }
        if let Some(v) = env_value("PERFTEST_LATENCY_COUNT")? {
            self.latency_count = v;
        }
        if let Some(v) = env_value("PERFTEST_LATENCY_TEST")? {
            self.latency_test = v;
        }
        if let Some(v) = env_value("PERFTEST_CPU")? {
            self.cpu = v;
        }
        if let Some(v) = env_value("PERFTEST_NO_PRINT_INTERVALS")? {
            self.no_print_intervals = v;
        }
        if let Some(v) = env_value("PERFTEST_NO_OUTPUT_HEADERS")? {
            self.no_output_headers = v;
        }
        if let Some(v) = env_value("PERFTEST_OUTPUT_FORMAT")? {
            self.output_format = v;
        }
        if let Some(v) = env_value("PERFTEST_CFT")? {
            self.content_filter = v;
        }
        if let Some(v) = env_value("PERFTEST_USE_READ_THREAD")? {
            self.use_read_thread = v;
        }
        if let Some(v) = env_value("PERFTEST_PING_TIMEOUT_MS")? {
            self.ping_timeout_ms = v;
        }
        if let Some(v) = env_value("PERFTEST_INTERVAL_SECS")? {
            self.interval_secs = v;
        }
        if let Some(v) = env_value("PERFTEST_TIMEOUT_SECS")? {
            self.test_timeout_secs = v;
        }
        if let Some(v) = env_value("PERFTEST_REPORT_SIDE")? {
            self.report_side = Some(v);
        }
        if let Some(v) = env_value("PERFTEST_ENABLE_COLOR")? {
            self.enable_color = v;
        }
        if let Some(v) = env_value("PERFTEST_VERBOSE")? {
            self.verbose = v;
        }
        if let Some(v) = env_value("PERFTEST_DEBUG")? {
            self.debug = v;
        }
        if let Some(v) = env_value("PERFTEST_LOG_LEVEL")? {
            self.log_level = Some(v);
        }

        Ok(())
    }
}

/// Read and parse one environment variable, `None` if unset
fn env_value<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| AppError::config(format!("Invalid {} value '{}': {}", key, value, e))),
        Err(_) => Ok(None),
    }
}

/// Parse a comma separated list of data lengths
pub fn parse_scan_list(value: &str) -> std::result::Result<Vec<usize>, std::num::ParseIntError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

// Default value functions for serde
fn default_num_publishers() -> u32 {
    crate::defaults::DEFAULT_NUM_PUBLISHERS
}

fn default_num_subscribers() -> u32 {
    crate::defaults::DEFAULT_NUM_SUBSCRIBERS
}

fn default_data_len() -> usize {
    crate::defaults::DEFAULT_DATA_LEN
}

fn default_num_iter() -> u64 {
    crate::defaults::DEFAULT_NUM_ITER
}

fn default_latency_count() -> u64 {
    crate::defaults::DEFAULT_LATENCY_COUNT
}

fn default_ping_timeout_ms() -> u64 {
    crate::defaults::DEFAULT_PING_TIMEOUT.as_millis() as u64
}

fn default_interval_secs() -> u64 {
    crate::defaults::DEFAULT_INTERVAL.as_secs()
}

fn default_test_timeout_secs() -> u64 {
    crate::defaults::DEFAULT_TEST_TIMEOUT.as_secs()
}

fn default_enable_color() -> bool {
    crate::defaults::DEFAULT_ENABLE_COLOR
}
