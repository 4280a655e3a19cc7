//! Type definitions shared across the harness

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// Re-export commonly used types
pub use crate::error::{AppError, Result};

/// Report stream format, chosen once per run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Fixed-width comma separated columns
    #[default]
    Csv,
    /// One JSON document for the whole run
    Json,
    /// Running prose, one line per record
    Legacy,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Json => "json",
            OutputFormat::Legacy => "legacy",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(OutputFormat::Csv),
            "json" => Ok(OutputFormat::Json),
            "legacy" => Ok(OutputFormat::Legacy),
            other => Err(AppError::parse(format!(
                "Invalid output format '{}': expected csv, json or legacy",
                other
            ))),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which statistics a dataset carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatasetKind {
    /// Publisher side, ping/pong round trips
    Latency,
    /// Subscriber side, packet counts and loss
    Throughput,
}

/// Side whose report goes to stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportSide {
    Publisher,
    Subscriber,
}

impl FromStr for ReportSide {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pub" | "publisher" => Ok(ReportSide::Publisher),
            "sub" | "subscriber" => Ok(ReportSide::Subscriber),
            other => Err(AppError::parse(format!(
                "Invalid report side '{}': expected publisher or subscriber",
                other
            ))),
        }
    }
}

impl fmt::Display for ReportSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportSide::Publisher => f.write_str("publisher"),
            ReportSide::Subscriber => f.write_str("subscriber"),
        }
    }
}
