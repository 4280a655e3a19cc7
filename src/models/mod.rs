//! Data models shared by the listeners, the renderer and the harness

pub mod config;
pub mod message;
pub mod metrics;

// Re-export main model types
pub use config::{Config, ListenerSettings};
pub use message::TestMessage;
pub use metrics::{LatencyInterval, LatencySummary, Percentiles, ThroughputInterval, ThroughputSummary};
