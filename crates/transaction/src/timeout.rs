//! Timeout tick arithmetic
//!
//! Transaction timeouts are tracked in coarse ticks rather than exact
//! durations: milliseconds shifted right by [`TIMER_EXPONENT`] (512 ms
//! buckets) plus [`TICK_OFFSET`]. A zero timeout means "never times out" and
//! maps to [`NO_TIMEOUT`].
//!
//! Converting back loses at most one bucket, and [`ticks_to_seconds`] rounds
//! up, so whole-second timeouts survive a round trip exactly:
//!
//! ```text
//! 25 s -> 25000 ms -> (25000 >> 9) + 2 = 50 ticks
//! 50 ticks -> (50 - 2) << 9 = 24576 ms -> ceil = 25 s
//! ```

use std::time::Duration;

/// Bucket granularity exponent (2^9 ms)
pub const TIMER_EXPONENT: u32 = 9;

/// Constant added to every finite tick count
pub const TICK_OFFSET: i64 = 2;

/// Tick value meaning "no timeout"
pub const NO_TIMEOUT: i64 = i64::MAX;

/// Convert a timeout to ticks
pub fn timeout_to_ticks(timeout: Duration) -> i64 {
    if timeout.is_zero() {
        return NO_TIMEOUT;
    }
    elapsed_to_ticks(timeout)
}

/// Convert a duration to ticks without the zero special case
pub(crate) fn elapsed_to_ticks(elapsed: Duration) -> i64 {
    let millis = elapsed.as_millis().min(i64::MAX as u128) as i64;
    (millis >> TIMER_EXPONENT).saturating_add(TICK_OFFSET)
}

/// Convert ticks back to a duration; [`NO_TIMEOUT`] gives `Duration::ZERO`
pub fn ticks_to_timeout(ticks: i64) -> Duration {
    if ticks == NO_TIMEOUT {
        return Duration::ZERO;
    }
    let buckets = ticks.saturating_sub(TICK_OFFSET).max(0) as u64;
    Duration::from_millis(buckets.saturating_mul(1 << TIMER_EXPONENT))
}

/// Convert ticks back to whole seconds, rounding up
pub fn ticks_to_seconds(ticks: i64) -> u64 {
    let millis = ticks_to_timeout(ticks).as_millis();
    ((millis + 999) / 1000).min(u64::MAX as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_is_no_timeout() {
        assert_eq!(timeout_to_ticks(Duration::ZERO), NO_TIMEOUT);
        assert_eq!(ticks_to_timeout(NO_TIMEOUT), Duration::ZERO);
        assert_eq!(ticks_to_seconds(NO_TIMEOUT), 0);
    }

    #[test]
    fn test_twenty_five_seconds_round_trip() {
        let ticks = timeout_to_ticks(Duration::from_secs(25));
        assert_eq!(ticks, 50);
        assert_eq!(ticks_to_timeout(ticks), Duration::from_millis(24_576));
        assert_eq!(ticks_to_seconds(ticks), 25);
    }

    #[test]
    fn test_whole_seconds_round_trip() {
        for secs in 1..=3_600u64 {
            let ticks = timeout_to_ticks(Duration::from_secs(secs));
            assert_eq!(ticks_to_seconds(ticks), secs, "round trip of {}s", secs);
        }
    }

    #[test]
    fn test_sub_bucket_timeout() {
        assert_eq!(timeout_to_ticks(Duration::from_millis(100)), TICK_OFFSET);
        assert_eq!(timeout_to_ticks(Duration::from_millis(512)), TICK_OFFSET + 1);
    }

    #[test]
    fn test_huge_timeout_saturates() {
        let ticks = timeout_to_ticks(Duration::from_secs(u64::MAX));
        assert!(ticks > 0);
        assert!(ticks < NO_TIMEOUT);
    }

    #[test]
    fn test_extreme_ticks_do_not_overflow() {
        let cases: &[(i64, u64)] = &[
            (i64::MAX - 1, (u64::MAX / 1000) + 1),
            (TICK_OFFSET, 0),
            (0, 0),
            (-1, 0),
            (i64::MIN, 0),
        ];
        for &(ticks, secs) in cases {
            assert_eq!(ticks_to_seconds(ticks), secs, "ticks {}", ticks);
        }
        assert_eq!(ticks_to_timeout(i64::MIN), Duration::ZERO);
    }
}
