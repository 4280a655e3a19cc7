//! Pub/Sub Perftest - command line entry point
//!
//! Runs publishers and subscribers over the in-process loopback bus and
//! streams the report of one side to stdout. Logs and diagnostics go to
//! stderr.

use clap::Parser;
use pubsub_perftest::{
    app::App,
    build_info,
    cli::Cli,
    config::{display_config_summary, load_config, validate_config, EnvManager},
    error::{ErrorReporter, Result},
};
use std::process;

#[tokio::main]
async fn main() {
    // Set up better panic handling
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("Application panic: {}", panic_info);
        eprintln!("This is a bug in perftest; please report it with the command line used.");
        process::exit(1);
    }));

    // Parse command line arguments
    let cli = Cli::parse();

    if let Err(message) = cli.validate() {
        eprintln!("Error: {}", message);
        process::exit(2);
    }

    let reporter = ErrorReporter::new(cli.use_colors(), cli.verbose);

    if let Err(e) = run_application(cli).await {
        reporter.report_error(&e);
        process::exit(e.exit_code());
    }
}

/// Main application logic
async fn run_application(cli: Cli) -> Result<()> {
    if cli.is_utility_mode() {
        return run_utility(&cli);
    }

    if cli.debug {
        eprintln!("{}", build_info::banner());
        eprintln!("Debug mode enabled");
    }

    let config = load_config(cli.clone())?;

    let warnings = validate_config(&config)?;
    for warning in &warnings {
        eprintln!("{}", warning.format(config.enable_color));
    }

    let summary = App::new(config.clone()).run().await?;

    if config.verbose || config.debug {
        eprintln!();
        eprintln!("Run summary:");
        eprintln!("  Samples sent: {}", summary.samples_sent);
        eprintln!("  Pings sent: {}", summary.pings_sent);
        eprintln!("  Pongs missed: {}", summary.pongs_missed);
        eprintln!("  Unacknowledged control messages: {}", summary.unacknowledged_controls);
        eprintln!("  Dropped messages: {}", summary.anomalies);
        eprintln!("  Elapsed: {:.2}s", summary.elapsed.as_secs_f64());
    }

    Ok(())
}

/// Help and configuration utilities that exit without running a test
fn run_utility(cli: &Cli) -> Result<()> {
    if cli.env_help {
        println!("{}", EnvManager::display_env_help());
    }

    if let Some(path) = &cli.write_env_example {
        EnvManager::save_example_env_file(path)?;
        println!("Wrote example environment file to {}", path.display());
    }

    if cli.check_config {
        let config = load_config(cli.clone())?;
        let warnings = validate_config(&config)?;
        println!("{}", display_config_summary(&config));
        if warnings.is_empty() {
            println!("Configuration is valid");
        } else {
            for warning in &warnings {
                println!("{}", warning.format(config.enable_color && cli.use_colors()));
            }
        }
    }

    Ok(())
}
