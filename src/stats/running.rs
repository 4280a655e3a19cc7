//! Streaming aggregate over integer latency samples

/// Running count, sum, sum of squares and extremes
///
/// Sums are kept as integers so long runs do not drift.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningStats {
    count: u64,
    sum: u64,
    sum_squared: u128,
    min: u32,
    max: u32,
}

impl RunningStats {
    /// Create an empty aggregate
    pub fn new() -> Self {
        Self {
            count: 0,
            sum: 0,
            sum_squared: 0,
            min: u32::MAX,
            max: 0,
        }
    }

    /// Add a sample
    pub fn add_value(&mut self, value: u32) {
        self.count += 1;
        self.sum = self.sum.saturating_add(value as u64);
        self.sum_squared = self.sum_squared.saturating_add(value as u128 * value as u128);

        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum(&self) -> u64 {
        self.sum
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Smallest sample, 0 when empty
    pub fn min(&self) -> u32 {
        if self.count == 0 {
            0
        } else {
            self.min
        }
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    /// Get current average
    pub fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum as f64 / self.count as f64
        }
    }

    /// Population variance, clamped at zero against rounding
    pub fn variance(&self) -> f64 {
        if self.count <= 1 {
            return 0.0;
        }

        let avg = self.average();
        let count_f64 = self.count as f64;

        ((self.sum_squared as f64 / count_f64) - (avg * avg)).max(0.0)
    }

    /// Get current standard deviation
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Reset all values
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for RunningStats {
    fn default() -> Self {
        Self::new()
    }
}
