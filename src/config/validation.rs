//! Advisory configuration checks
//!
//! `Config::validate` rejects configurations that cannot run. The checks here
//! accept the configuration but point out settings that make the report less
//! useful than the user probably expects.

use crate::{error::Result, models::Config, types::OutputFormat};
use colored::{Color, Colorize};
use std::collections::HashSet;

/// Configuration validator with advisory rules
pub struct ConfigValidator;

impl ConfigValidator {
    /// Hard validation followed by every advisory rule
    pub fn validate_comprehensive(config: &Config) -> Result<Vec<ValidationWarning>> {
        config.validate()?;

        let mut advisories = Self::reporting_rules(config);
        advisories.extend(Self::sampling_rules(config));
        advisories.extend(Self::scan_rules(config));
        Ok(advisories)
    }

    fn reporting_rules(config: &Config) -> Vec<ValidationWarning> {
        let mut out = Vec::new();

        if config.cpu && config.no_print_intervals {
            out.push(ValidationWarning::info(
                "--cpu",
                "CPU usage is only sampled at intervals; with intervals off it is averaged once per summary",
            ));
        }
        if config.content_filter {
            out.push(ValidationWarning::warning(
                "--cft",
                "Content-filter mode disables loss detection; lost sample counts will read 0",
            ));
        }
        if config.no_output_headers && config.output_format != OutputFormat::Csv {
            out.push(ValidationWarning::info(
                "--no-output-headers",
                format!("Header suppression has no effect on {} output", config.output_format),
            ));
        }
        out
    }

    fn sampling_rules(config: &Config) -> Vec<ValidationWarning> {
        let mut out = Vec::new();

        let pings = config.num_iter / config.latency_count;
        if pings < 100 {
            out.push(ValidationWarning::warning(
                "--latency-count",
                format!(
                    "Only {} latency samples per data length; the 99.99% and 99.9999% percentiles will equal the maximum",
                    pings
                ),
            ));
        }
        if config.history_capacity() > crate::defaults::LARGE_HISTORY {
            out.push(ValidationWarning::info(
                "--latency-count",
                format!(
                    "Latency history holds {} samples per data length and is sorted at every summary",
                    config.history_capacity()
                ),
            ));
        }
        if config.num_iter < 1000 {
            out.push(ValidationWarning::info(
                "--num-iter",
                format!("{} samples per data length may finish before the first reporting interval", config.num_iter),
            ));
        }
        out
    }

    fn scan_rules(config: &Config) -> Vec<ValidationWarning> {
        let mut seen = HashSet::new();
        config
            .scan
            .iter()
            .filter(|len| !seen.insert(**len))
            .map(|len| {
                ValidationWarning::warning(
                    "--scan",
                    format!("Scan list repeats data length {}; each run of it is reported separately", len),
                )
            })
            .collect()
    }
}

/// How much an advisory matters. Hard failures are `AppError::Config`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationLevel {
    Info,
    Warning,
}

impl ValidationLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
        }
    }

    fn color(self) -> Color {
        match self {
            Self::Info => Color::Blue,
            Self::Warning => Color::Yellow,
        }
    }
}

/// One advisory about the option that triggered it
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub level: ValidationLevel,
    /// Command line flag the advisory is about
    pub option: &'static str,
    pub message: String,
}

impl ValidationWarning {
    pub fn info(option: &'static str, message: impl Into<String>) -> Self {
        Self { level: ValidationLevel::Info, option, message: message.into() }
    }

    pub fn warning(option: &'static str, message: impl Into<String>) -> Self {
        Self { level: ValidationLevel::Warning, option, message: message.into() }
    }

    pub fn format(&self, use_color: bool) -> String {
        let tag = format!("[{}]", self.level.as_str());
        if use_color {
            format!("{} {} {}", tag.color(self.level.color()).bold(), self.option.dimmed(), self.message)
        } else {
            format!("{} {} {}", tag, self.option, self.message)
        }
    }
}

/// Hard validation plus advisories, as used by the binary
pub fn validate_config(config: &Config) -> Result<Vec<ValidationWarning>> {
    ConfigValidator::validate_comprehensive(config)
}
