//! Microsecond wall clock used for message timestamps and interval timing

use chrono::Utc;

/// Microseconds since the Unix epoch.
///
/// Ping timestamps are split into two 32-bit halves on the wire, so the
/// value is kept unsigned. A clock set before 1970 reads as zero.
pub fn now_usec() -> u64 {
    u64::try_from(Utc::now().timestamp_micros()).unwrap_or(0)
}

/// Elapsed microseconds between two readings, zero if the clock went back.
pub fn elapsed_usec(since: u64, now: u64) -> u64 {
    now.saturating_sub(since)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_monotone_enough() {
        let a = now_usec();
        let b = now_usec();
        assert!(a > 1_600_000_000_000_000);
        assert!(b >= a);
    }

    #[test]
    fn test_elapsed_saturates() {
        assert_eq!(elapsed_usec(10, 25), 15);
        assert_eq!(elapsed_usec(25, 10), 0);
    }
}
