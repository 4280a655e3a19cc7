//! Environment variable handling and .env file management

use crate::error::{AppError, ErrorContext, Result};
use crate::logging::LogLevel;
use crate::models::message::{MIN_PAYLOAD_SIZE, OVERHEAD_BYTES};
use crate::types::{OutputFormat, ReportSide};
use std::path::Path;

/// Environment variable configuration manager
pub struct EnvManager;

impl EnvManager {
    /// Load .env from the working directory if it exists
    pub fn load_env_file(debug: bool) -> Result<()> {
        Self::load_env_file_from(Path::new(".env"), debug)
    }

    /// Load a specific env file if it exists; already-set variables win
    pub fn load_env_file_from(path: &Path, debug: bool) -> Result<()> {
        if path.exists() {
            dotenv::from_path(path).with_context(|| format!("Failed to load {}", path.display()))?;

            if debug {
                eprintln!("Loaded configuration from {}", path.display());
            }
        } else if debug {
            eprintln!("No {} file found, using defaults and CLI arguments", path.display());
        }

        Ok(())
    }

    /// Create example .env file content
    pub fn create_example_env_content() -> String {
        r#"# Pub/Sub Perftest Configuration
#
# Values here are defaults for the perftest binary. Environment variables
# already set in the shell take precedence, and command-line flags override both.

# Entity counts
# PERFTEST_NUM_PUBLISHERS=1
# PERFTEST_NUM_SUBSCRIBERS=1

# Bytes on the wire per sample, 28 bytes of overhead included (32..=63000)
# PERFTEST_DATA_LEN=100

# Scan through several data lengths instead (comma-separated)
# PERFTEST_SCAN=32,64,128,256,512,1024

# Samples per data length, and one ping every PERFTEST_LATENCY_COUNT samples
# PERFTEST_NUM_ITER=10000
# PERFTEST_LATENCY_COUNT=100

# Latency test mode (the publisher waits for every pong)
# PERFTEST_LATENCY_TEST=false

# Report process CPU usage
# PERFTEST_CPU=false

# Report shape: csv, json or legacy
# PERFTEST_OUTPUT_FORMAT=csv
# PERFTEST_NO_PRINT_INTERVALS=false
# PERFTEST_NO_OUTPUT_HEADERS=false
# PERFTEST_REPORT_SIDE=subscriber

# Delivery
# PERFTEST_CFT=false
# PERFTEST_USE_READ_THREAD=false

# Timing
# PERFTEST_PING_TIMEOUT_MS=200
# PERFTEST_INTERVAL_SECS=1
# PERFTEST_TIMEOUT_SECS=300

# Diagnostics
# PERFTEST_ENABLE_COLOR=true
# PERFTEST_VERBOSE=false
# PERFTEST_DEBUG=false
# PERFTEST_LOG_LEVEL=warn
"#.to_string()
    }

    /// Save example .env file to disk
    pub fn save_example_env_file(path: &Path) -> Result<()> {
        let content = Self::create_example_env_content();
        std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(())
    }

    /// Validate environment variable format before parsing
    pub fn validate_env_var(key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            "PERFTEST_NUM_PUBLISHERS" | "PERFTEST_NUM_SUBSCRIBERS" => {
                let count: u32 = parse_value(key, value)?;
                if count == 0 || count > crate::defaults::MAX_ENTITIES {
                    return Err(AppError::config(format!(
                        "{} must be between 1 and {}, got: {}",
                        key, crate::defaults::MAX_ENTITIES, count
                    )));
                }
            }
            "PERFTEST_DATA_LEN" => {
                let len: usize = parse_value(key, value)?;
                check_data_len(key, len)?;
            }
            "PERFTEST_SCAN" => {
                let lengths = crate::models::config::parse_scan_list(value)
                    .map_err(|e| AppError::config(format!("Invalid {} value '{}': {}", key, value, e)))?;
                for len in lengths {
                    check_data_len(key, len)?;
                }
            }
            "PERFTEST_NUM_ITER" | "PERFTEST_LATENCY_COUNT" | "PERFTEST_PING_TIMEOUT_MS"
            | "PERFTEST_INTERVAL_SECS" | "PERFTEST_TIMEOUT_SECS" => {
                let n: u64 = parse_value(key, value)?;
                if n == 0 {
                    return Err(AppError::config(format!("{} must be greater than 0", key)));
                }
            }
            "PERFTEST_LATENCY_TEST" | "PERFTEST_CPU" | "PERFTEST_NO_PRINT_INTERVALS"
            | "PERFTEST_NO_OUTPUT_HEADERS" | "PERFTEST_CFT" | "PERFTEST_USE_READ_THREAD"
            | "PERFTEST_ENABLE_COLOR" | "PERFTEST_VERBOSE" | "PERFTEST_DEBUG" => {
                parse_value::<bool>(key, value)?;
            }
            "PERFTEST_OUTPUT_FORMAT" => {
                parse_value::<OutputFormat>(key, value)?;
            }
            "PERFTEST_REPORT_SIDE" => {
                parse_value::<ReportSide>(key, value)?;
            }
            "PERFTEST_LOG_LEVEL" => {
                parse_value::<LogLevel>(key, value)?;
            }
            _ => {
                // Unknown environment variable, ignore
            }
        }

        Ok(())
    }

    /// Get list of all supported environment variables with descriptions
    pub fn get_supported_env_vars() -> Vec<(&'static str, &'static str, &'static str)> {
        vec![
            ("PERFTEST_NUM_PUBLISHERS", "Number of publishers", "1"),
            ("PERFTEST_NUM_SUBSCRIBERS", "Number of subscribers", "1"),
            ("PERFTEST_DATA_LEN", "Bytes per sample including 28 bytes overhead", "100"),
            ("PERFTEST_SCAN", "Comma-separated data lengths to scan", "32,64,128"),
            ("PERFTEST_NUM_ITER", "Samples per data length", "10000"),
            ("PERFTEST_LATENCY_COUNT", "Samples between two pings", "100"),
            ("PERFTEST_LATENCY_TEST", "Latency test mode", "false"),
            ("PERFTEST_CPU", "Report process CPU usage", "false"),
            ("PERFTEST_NO_PRINT_INTERVALS", "Print summaries only", "false"),
            ("PERFTEST_NO_OUTPUT_HEADERS", "Suppress csv header rows", "false"),
            ("PERFTEST_OUTPUT_FORMAT", "Report format (csv, json, legacy)", "csv"),
            ("PERFTEST_CFT", "Content-filtered delivery", "false"),
            ("PERFTEST_USE_READ_THREAD", "Polling receive instead of callbacks", "false"),
            ("PERFTEST_PING_TIMEOUT_MS", "Pong wait in milliseconds", "200"),
            ("PERFTEST_INTERVAL_SECS", "Subscriber reporting interval", "1"),
            ("PERFTEST_TIMEOUT_SECS", "Abort the run after this many seconds", "300"),
            ("PERFTEST_REPORT_SIDE", "Side streamed to stdout", "publisher"),
            ("PERFTEST_ENABLE_COLOR", "Enable colored output", "true"),
            ("PERFTEST_VERBOSE", "Enable verbose output", "false"),
            ("PERFTEST_DEBUG", "Enable debug output", "false"),
            ("PERFTEST_LOG_LEVEL", "Minimum log level", "warn"),
        ]
    }

    /// Display environment variable help
    pub fn display_env_help() -> String {
        let mut help = String::new();
        help.push_str("Supported Environment Variables:\n\n");

        for (var, description, example) in Self::get_supported_env_vars() {
            help.push_str(&format!("  {:<28} {}\n", var, description));
            help.push_str(&format!("  {:<28} Example: {}\n\n", "", example));
        }

        help.push_str("Configuration Priority (highest to lowest):\n");
        help.push_str("  1. Command-line arguments\n");
        help.push_str("  2. Environment variables\n");
        help.push_str("  3. .env file values\n");
        help.push_str("  4. Default values\n");

        help
    }

    /// Validate all currently set environment variables
    pub fn validate_current_env() -> Result<Vec<String>> {
        let mut warnings = Vec::new();

        for (var_name, _, _) in Self::get_supported_env_vars() {
            if let Ok(value) = std::env::var(var_name) {
                if let Err(e) = Self::validate_env_var(var_name, &value) {
                    warnings.push(format!("Warning: {}", e));
                }
            }
        }

        Ok(warnings)
    }

    /// Check an env file's entries without loading them
    pub fn check_env_file(path: &Path) -> Result<Option<Vec<String>>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;

        let mut warnings = Vec::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                if let Err(e) = Self::validate_env_var(key.trim(), value) {
                    warnings.push(format!("Line '{}': {}", line, e));
                }
            }
        }

        Ok(Some(warnings))
    }
}

fn parse_value<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| AppError::config(format!("Invalid {} value '{}': {}", key, value, e)))
}

fn check_data_len(key: &str, len: usize) -> Result<()> {
    let min = OVERHEAD_BYTES + MIN_PAYLOAD_SIZE;
    let max = crate::defaults::MAX_DATA_LEN;
    if len < min || len > max {
        return Err(AppError::config(format!(
            "{} entries must be between {} and {}, got: {}",
            key, min, max, len
        )));
    }
    Ok(())
}
