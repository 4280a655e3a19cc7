//! Command-line interface

use crate::types::{OutputFormat, ReportSide};
use clap::Parser;
use std::path::PathBuf;

/// Publish/subscribe performance test over an in-process loopback bus
#[derive(Parser, Debug, Clone)]
#[command(name = "perftest")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Number of publishers
    #[arg(long, value_name = "N")]
    pub num_publishers: Option<u32>,

    /// Number of subscribers
    #[arg(long, value_name = "N")]
    pub num_subscribers: Option<u32>,

    /// Bytes on the wire per sample, 28-byte overhead included
    #[arg(short = 'd', long, value_name = "BYTES")]
    pub data_len: Option<usize>,

    /// Comma separated data lengths to scan through
    #[arg(long, value_name = "LIST", value_parser = parse_scan)]
    pub scan: Option<ScanList>,

    /// Samples sent per data length
    #[arg(short = 'n', long, value_name = "N")]
    pub num_iter: Option<u64>,

    /// Send a ping every N samples
    #[arg(long, value_name = "N")]
    pub latency_count: Option<u64>,

    /// Latency test: the publisher waits for every pong
    #[arg(long)]
    pub latency_test: bool,

    /// Report process CPU usage
    #[arg(long)]
    pub cpu: bool,

    /// Print summaries only
    #[arg(long)]
    pub no_print_intervals: bool,

    /// Suppress header rows in csv output
    #[arg(long)]
    pub no_output_headers: bool,

    /// Report format: csv, json or legacy
    #[arg(short = 'o', long, value_name = "FORMAT")]
    pub output_format: Option<OutputFormat>,

    /// Content-filtered delivery (disables loss detection)
    #[arg(long)]
    pub cft: bool,

    /// Receive on a polling thread instead of callbacks
    #[arg(long)]
    pub use_read_thread: bool,

    /// Milliseconds a publisher waits for a pong
    #[arg(long, value_name = "MS")]
    pub ping_timeout_ms: Option<u64>,

    /// Subscriber reporting interval in seconds
    #[arg(long, value_name = "SECS", value_parser = parse_seconds)]
    pub interval: Option<u64>,

    /// Abort the run after this many seconds
    #[arg(short, long, value_name = "SECS", value_parser = parse_seconds)]
    pub timeout: Option<u64>,

    /// Side whose report goes to stdout: publisher or subscriber
    #[arg(long, value_name = "SIDE")]
    pub report_side: Option<ReportSide>,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Enable verbose output
    #[arg(long)]
    pub verbose: bool,

    /// Enable debug output
    #[arg(long)]
    pub debug: bool,

    /// Print the supported environment variables and exit
    #[arg(long)]
    pub env_help: bool,

    /// Write an example .env file to PATH and exit
    #[arg(long, value_name = "PATH")]
    pub write_env_example: Option<PathBuf>,

    /// Validate the configuration, print advisories and exit
    #[arg(long)]
    pub check_config: bool,
}

impl Cli {
    /// Validate CLI arguments for conflicts
    pub fn validate(&self) -> Result<(), String> {
        if let (Some(count), Some(iter)) = (self.latency_count, self.num_iter) {
            if count > iter {
                return Err(format!(
                    "--latency-count {} cannot exceed --num-iter {}",
                    count, iter
                ));
            }
        }

        if self.scan.is_some() && self.data_len.is_some() {
            return Err("Cannot specify both --scan and --data-len".to_string());
        }

        Ok(())
    }

    /// Check if colors should be enabled
    pub fn use_colors(&self) -> bool {
        if self.no_color {
            false
        } else {
            supports_color()
        }
    }

    /// Whether the invocation only prints help or files and exits
    pub fn is_utility_mode(&self) -> bool {
        self.env_help || self.write_env_example.is_some() || self.check_config
    }
}

/// Data lengths given to `--scan`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanList(pub Vec<usize>);

fn parse_scan(s: &str) -> Result<ScanList, String> {
    let lengths = crate::models::config::parse_scan_list(s)
        .map_err(|e| format!("Invalid scan list '{}': {}", s, e))?;
    if lengths.is_empty() {
        return Err("Scan list cannot be empty".to_string());
    }
    Ok(ScanList(lengths))
}

/// Parse a positive number of seconds
fn parse_seconds(s: &str) -> Result<u64, String> {
    if s.starts_with('+') || s.starts_with("0x") || s.starts_with("0X") {
        return Err(format!("Invalid duration: {}", s));
    }

    s.parse::<u64>()
        .map_err(|_| format!("Invalid duration: {}", s))
        .and_then(|secs| {
            if secs == 0 {
                Err("Duration must be greater than 0".to_string())
            } else {
                Ok(secs)
            }
        })
}

/// Check if the terminal supports color output
fn supports_color() -> bool {
    if let Ok(term) = std::env::var("TERM") {
        if term == "dumb" {
            return false;
        }
    }

    if std::env::var("NO_COLOR").is_ok() {
        return false;
    }

    if std::env::var("FORCE_COLOR").is_ok() {
        return true;
    }

    #[cfg(unix)]
    {
        true
    }
    #[cfg(not(unix))]
    {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing_defaults() {
        let cli = Cli::parse_from(["perftest"]);
        assert!(cli.num_publishers.is_none());
        assert!(cli.data_len.is_none());
        assert!(cli.output_format.is_none());
        assert!(!cli.latency_test);
        assert!(!cli.is_utility_mode());
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_cli_parsing_all_options() {
        let cli = Cli::parse_from([
            "perftest",
            "--num-publishers", "2",
            "--num-subscribers", "3",
            "--num-iter", "5000",
            "--latency-count", "50",
            "--latency-test",
            "--cpu",
            "--no-print-intervals",
            "--no-output-headers",
            "--output-format", "json",
            "--cft",
            "--use-read-thread",
            "--ping-timeout-ms", "500",
            "--interval", "2",
            "--timeout", "30",
            "--report-side", "sub",
            "--no-color",
            "--verbose",
        ]);

        assert_eq!(cli.num_publishers, Some(2));
        assert_eq!(cli.num_subscribers, Some(3));
        assert_eq!(cli.num_iter, Some(5000));
        assert_eq!(cli.latency_count, Some(50));
        assert!(cli.latency_test);
        assert!(cli.cpu);
        assert!(cli.no_print_intervals);
        assert!(cli.no_output_headers);
        assert_eq!(cli.output_format, Some(OutputFormat::Json));
        assert!(cli.cft);
        assert!(cli.use_read_thread);
        assert_eq!(cli.ping_timeout_ms, Some(500));
        assert_eq!(cli.interval, Some(2));
        assert_eq!(cli.timeout, Some(30));
        assert_eq!(cli.report_side, Some(ReportSide::Subscriber));
        assert!(cli.no_color);
        assert!(!cli.use_colors());
    }

    #[test]
    fn test_scan_parsing() {
        let cli = Cli::parse_from(["perftest", "--scan", "32,64, 128"]);
        assert_eq!(cli.scan, Some(ScanList(vec![32, 64, 128])));

        assert!(Cli::try_parse_from(["perftest", "--scan", "32,abc"]).is_err());
        assert!(Cli::try_parse_from(["perftest", "--scan", ","]).is_err());
    }

    #[test]
    fn test_bad_output_format_rejected() {
        assert!(Cli::try_parse_from(["perftest", "--output-format", "xml"]).is_err());
    }

    #[test]
    fn test_seconds_parsing() {
        assert_eq!(parse_seconds("10").unwrap(), 10);
        assert!(parse_seconds("0").is_err());
        assert!(parse_seconds("+5").is_err());
        assert!(parse_seconds("0x10").is_err());
        assert!(parse_seconds("abc").is_err());
    }

    #[test]
    fn test_cli_validation() {
        let cli = Cli::parse_from(["perftest", "--num-iter", "10", "--latency-count", "20"]);
        assert!(cli.validate().is_err());

        let cli = Cli::parse_from(["perftest", "--scan", "64,128", "--data-len", "64"]);
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_utility_mode() {
        assert!(Cli::parse_from(["perftest", "--env-help"]).is_utility_mode());
        assert!(Cli::parse_from(["perftest", "--check-config"]).is_utility_mode());
        let cli = Cli::parse_from(["perftest", "--write-env-example", "x.env"]);
        assert_eq!(cli.write_env_example, Some(PathBuf::from("x.env")));
    }
}
