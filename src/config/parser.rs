//! Configuration parsing from CLI arguments and environment variables

use crate::{
    cli::Cli,
    config::env::EnvManager,
    error::Result,
    models::Config,
};
use std::path::PathBuf;

/// Configuration parser that layers defaults, .env, environment and CLI
pub struct ConfigParser {
    cli: Cli,
    env_file: PathBuf,
}

impl ConfigParser {
    /// Create a parser reading `.env` from the working directory
    pub fn new(cli: Cli) -> Self {
        Self::with_env_file(cli, PathBuf::from(".env"))
    }

    /// Create a parser reading a specific env file
    pub fn with_env_file(cli: Cli, env_file: PathBuf) -> Self {
        Self { cli, env_file }
    }

    /// Parse and build the complete configuration
    pub fn parse(&self) -> Result<Config> {
        let mut config = Config::default();

        EnvManager::load_env_file_from(&self.env_file, self.cli.debug)?;

        config.merge_from_env()?;

        self.apply_cli_overrides(&mut config);

        config.validate()?;

        Ok(config)
    }

    /// Apply CLI argument overrides to configuration
    fn apply_cli_overrides(&self, config: &mut Config) {
        let cli = &self.cli;

        if let Some(n) = cli.num_publishers {
            config.num_publishers = n;
        }
        if let Some(n) = cli.num_subscribers {
            config.num_subscribers = n;
        }
        if let Some(len) = cli.data_len {
            config.data_len = len;
            config.scan.clear();
        }
        if let Some(ref scan) = cli.scan {
            config.scan = scan.0.clone();
        }
        if let Some(n) = cli.num_iter {
            config.num_iter = n;
        }
        if let Some(n) = cli.latency_count {
            config.latency_count = n;
        }
        if let Some(format) = cli.output_format {
            config.output_format = format;
        }
        if let Some(ms) = cli.ping_timeout_ms {
            config.ping_timeout_ms = ms;
        }
        if let Some(secs) = cli.interval {
            config.interval_secs = secs;
        }
        if let Some(secs) = cli.timeout {
            config.test_timeout_secs = secs;
        }
        if let Some(side) = cli.report_side {
            config.report_side = Some(side);
        }

        // Switches only ever turn behavior on
        config.latency_test |= cli.latency_test;
        config.cpu |= cli.cpu;
        config.no_print_intervals |= cli.no_print_intervals;
        config.no_output_headers |= cli.no_output_headers;
        config.content_filter |= cli.cft;
        config.use_read_thread |= cli.use_read_thread;
        config.verbose |= cli.verbose;
        config.debug |= cli.debug;

        if cli.no_color {
            config.enable_color = false;
        }

        if config.debug {
            eprintln!("Applied CLI overrides to configuration");
            eprintln!("{}", display_config_summary(config));
        }
    }
}

/// Convenience function to load complete configuration from CLI arguments
pub fn load_config(cli: Cli) -> Result<Config> {
    ConfigParser::new(cli).parse()
}

/// Display configuration summary for debug purposes
pub fn display_config_summary(config: &Config) -> String {
    let lengths: Vec<String> = config.data_lengths().iter().map(|l| l.to_string()).collect();
    let mut summary = Vec::new();

    summary.push(format!("Publishers: {}", config.num_publishers));
    summary.push(format!("Subscribers: {}", config.num_subscribers));
    summary.push(format!("Data Lengths: {}", lengths.join(", ")));
    summary.push(format!("Iterations: {}", config.num_iter));
    summary.push(format!("Latency Count: {}", config.latency_count));
    summary.push(format!("Latency Test: {}", config.latency_test));
    summary.push(format!("Output Format: {}", config.output_format));
    summary.push(format!("Report Side: {}", config.resolved_report_side()));
    summary.push(format!("CPU: {}", config.cpu));
    summary.push(format!("Content Filter: {}", config.content_filter));
    summary.push(format!("Read Thread: {}", config.use_read_thread));
    summary.push(format!("Timeout: {}s", config.test_timeout_secs));

    summary.join("\n")
}
