//! Pub/Sub Perftest
//!
//! Measurement and coordination core of a publish/subscribe performance
//! test: in-band control message classification, loss tracking, round-trip
//! latency percentiles, multi-publisher completion, process CPU sampling and
//! a streaming report in csv, json or legacy form. An in-process loopback
//! transport runs the whole protocol end to end.

pub mod app;
pub mod classifier;
pub mod cli;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod cpu;
pub mod error;
pub mod latency;
pub mod logging;
pub mod models;
pub mod output;
pub mod stats;
pub mod throughput;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use app::{App, RunSummary};
pub use classifier::{ControlSignal, MessageClass, MessageClassifier};
pub use coordinator::{AnnouncementCounter, AnnouncementListener, FinishedSet};
pub use cpu::{CpuSampler, ProcessClock};
pub use error::{AppError, Result};
pub use latency::LatencyListener;
pub use models::{Config, ListenerSettings, TestMessage};
pub use output::{OutputFormatFactory, ReportFormat, ReportOptions, ReportRenderer};
pub use stats::{LatencyStatistics, RunningStats};
pub use throughput::{LossTracker, ThroughputCounters, ThroughputIntervalMeter, ThroughputListener};
pub use transport::{LoopbackBus, MessageListener, MessageReader, MessageWriter, PingSignal};

/// Application version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
pub const PKG_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Build metadata stamped by build.rs
pub mod build_info {
    pub const BUILD_TIME: Option<&str> = option_env!("BUILD_TIME");
    pub const GIT_COMMIT: Option<&str> = option_env!("GIT_COMMIT");
    pub const TARGET_TRIPLE: Option<&str> = option_env!("TARGET_TRIPLE");

    /// One-line version banner for `--debug` runs
    pub fn banner() -> String {
        format!(
            "{} v{} ({} {}, built {})",
            super::PKG_NAME,
            super::VERSION,
            GIT_COMMIT.unwrap_or("unknown"),
            TARGET_TRIPLE.unwrap_or("unknown"),
            BUILD_TIME.unwrap_or("unknown")
        )
    }
}

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    pub const DEFAULT_NUM_PUBLISHERS: u32 = 1;
    pub const DEFAULT_NUM_SUBSCRIBERS: u32 = 1;
    /// Bytes on the wire, overhead included
    pub const DEFAULT_DATA_LEN: usize = 100;
    pub const DEFAULT_NUM_ITER: u64 = 10_000;
    pub const DEFAULT_LATENCY_COUNT: u64 = 100;
    pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_millis(200);
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
    pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(300);
    pub const DEFAULT_ENABLE_COLOR: bool = true;

    pub const MAX_ENTITIES: u32 = 1024;
    pub const MAX_DATA_LEN: usize = 63_000;
    /// Latency histories above this many samples draw an advisory
    pub const LARGE_HISTORY: usize = 1_000_000;

    /// Initialization samples sent before measuring
    pub const INITIALIZE_SAMPLE_COUNT: usize = 50;
    /// Sends of one control message before giving up on acknowledgments
    pub const MAX_CONTROL_RETRIES: usize = 50;
    /// Wait for acknowledgments after each control send
    pub const CONTROL_ACK_WAIT: Duration = Duration::from_millis(100);
    /// Subscriber reporting loop tick
    pub const CONTROL_POLL: Duration = Duration::from_millis(10);
    /// Upper bound for echoes to drain before an acknowledgment
    pub const CONTROL_DRAIN_WAIT: Duration = Duration::from_secs(5);

    pub const COUNTER_POLL: Duration = Duration::from_millis(1);
    /// Bounded receive wait of delivery threads
    pub const READ_POLL: Duration = Duration::from_millis(10);
    pub const LOOPBACK_QUEUE_DEPTH: usize = 4096;
}
