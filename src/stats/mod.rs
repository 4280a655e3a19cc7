//! Latency statistics: running aggregate, bounded history and percentiles

pub mod running;

pub use running::RunningStats;

use crate::models::metrics::{LatencySummary, Percentiles};

/// Percentile ladder as `(numerator, denominator)` fractions:
/// 50%, 90%, 99%, 99.99% and 99.9999%
pub const PERCENTILE_LADDER: [(u64, u64); 5] = [
    (50, 100),
    (90, 100),
    (99, 100),
    (9_999, 10_000),
    (999_999, 1_000_000),
];

/// History index of the `numerator / denominator` percentile among `count`
/// sorted samples: `floor(count * p)`, clamped to the last sample.
///
/// `count` must be non-zero.
pub fn percentile_index(count: usize, numerator: u64, denominator: u64) -> usize {
    let raw = count as u128 * numerator as u128 / denominator.max(1) as u128;
    let last = count.saturating_sub(1);
    usize::try_from(raw).map_or(last, |index| index.min(last))
}

/// One-way latency aggregate for a single data length
///
/// The history keeps at most `capacity` samples. Once it is full, further
/// samples are dropped whole, so the running aggregate and the history
/// always describe the same samples.
#[derive(Debug, Clone)]
pub struct LatencyStatistics {
    running: RunningStats,
    history: Vec<u32>,
    capacity: usize,
}

impl LatencyStatistics {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            running: RunningStats::new(),
            history: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a sample; returns `false` if the history is full and the
    /// sample was dropped
    pub fn record(&mut self, latency_usec: u32) -> bool {
        if self.history.len() >= self.capacity {
            return false;
        }

        self.history.push(latency_usec);
        self.running.add_value(latency_usec);
        true
    }

    pub fn count(&self) -> u64 {
        self.running.count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.history.len() >= self.capacity
    }

    pub fn running(&self) -> &RunningStats {
        &self.running
    }

    /// Sort the history and compute the summary; `None` when empty.
    ///
    /// CPU is left unset for the caller to fill in.
    pub fn summarize(&mut self) -> Option<LatencySummary> {
        if self.history.is_empty() {
            return None;
        }

        self.history.sort_unstable();
        let count = self.history.len();
        let at = |(numerator, denominator): (u64, u64)| {
            self.history[percentile_index(count, numerator, denominator)]
        };

        let percentiles = Percentiles {
            p50: at(PERCENTILE_LADDER[0]),
            p90: at(PERCENTILE_LADDER[1]),
            p99: at(PERCENTILE_LADDER[2]),
            p9999: at(PERCENTILE_LADDER[3]),
            p999999: at(PERCENTILE_LADDER[4]),
        };

        Some(LatencySummary {
            count: self.running.count(),
            average: self.running.average(),
            std_dev: self.running.std_dev(),
            min: self.running.min(),
            max: self.running.max(),
            percentiles,
            cpu: None,
        })
    }

    /// Zero the aggregate; the history allocation is kept for the next cycle
    pub fn reset(&mut self) {
        self.running.reset();
        self.history.clear();
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_of_hundred_values() {
        let mut stats = LatencyStatistics::with_capacity(100);
        // Fed in reverse so the summary has to sort
        for value in (1..=100u32).rev() {
            assert!(stats.record(value * 10));
        }

        let summary = stats.summarize().unwrap();
        assert_eq!(summary.count, 100);
        assert_eq!(summary.percentiles.p50, 510);
        assert_eq!(summary.percentiles.p90, 910);
        assert_eq!(summary.percentiles.p99, 1000);
        assert_eq!(summary.percentiles.p9999, 1000);
        assert_eq!(summary.min, 10);
        assert_eq!(summary.max, 1000);
        assert!((summary.average - 505.0).abs() < 1e-9);
    }

    #[test]
    fn test_full_history_drops_samples() {
        let mut stats = LatencyStatistics::with_capacity(3);
        assert!(stats.record(5));
        assert!(stats.record(6));
        assert!(stats.record(7));
        assert!(stats.is_full());
        assert!(!stats.record(1_000_000));

        let summary = stats.summarize().unwrap();
        assert_eq!(summary.count, 3);
        assert_eq!(summary.max, 7);
    }

    #[test]
    fn test_empty_summary() {
        let mut stats = LatencyStatistics::with_capacity(10);
        assert!(stats.summarize().is_none());

        let mut none = LatencyStatistics::with_capacity(0);
        assert!(!none.record(1));
        assert!(none.summarize().is_none());
    }

    #[test]
    fn test_reset_starts_a_new_cycle() {
        let mut stats = LatencyStatistics::with_capacity(2);
        stats.record(100);
        stats.record(200);
        stats.summarize();
        stats.reset();

        assert_eq!(stats.count(), 0);
        assert!(stats.record(3));
        let summary = stats.summarize().unwrap();
        assert_eq!(summary.min, 3);
        assert_eq!(summary.max, 3);
        assert_eq!(summary.percentiles.p50, 3);
    }

    #[test]
    fn test_percentile_index_clamps() {
        assert_eq!(percentile_index(1, 50, 100), 0);
        assert_eq!(percentile_index(100, 50, 100), 50);
        assert_eq!(percentile_index(100, 999_999, 1_000_000), 99);
        assert_eq!(percentile_index(2_000_000, 999_999, 1_000_000), 1_999_998);
        assert_eq!(percentile_index(10, 1, 1), 9);
    }
}
