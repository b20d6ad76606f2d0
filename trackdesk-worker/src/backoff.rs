/// Retry schedule for failed deliveries
///
/// ```text
/// attempt   1    2    3    4    5     6  ...
/// delay    30s  1m   2m   4m   8m   16m  ... capped at 6h
/// ```
///
/// Each delay is spread by ±10% so retries from one outage don't arrive
/// together.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

pub const BASE_DELAY_SECS: i64 = 30;
pub const MAX_DELAY_SECS: i64 = 6 * 60 * 60;
pub const JITTER_RATIO: f64 = 0.10;

/// Delay before the next try after `attempt` failed attempts, without jitter
pub fn base_delay(attempt: i32) -> Duration {
    let exponent = attempt.saturating_sub(1).clamp(0, 30) as u32;
    let secs = BASE_DELAY_SECS
        .saturating_mul(1_i64 << exponent)
        .min(MAX_DELAY_SECS);
    Duration::seconds(secs)
}

/// Applies a jitter factor in `[-1.0, 1.0]` scaled by [`JITTER_RATIO`]
pub fn with_jitter(delay: Duration, factor: f64) -> Duration {
    let factor = factor.clamp(-1.0, 1.0) * JITTER_RATIO;
    let millis = delay.num_milliseconds() as f64 * (1.0 + factor);
    Duration::milliseconds(millis.round() as i64)
}

/// When a delivery that has failed `attempt` times should run again
pub fn next_attempt_at(attempt: i32, now: DateTime<Utc>) -> DateTime<Utc> {
    let factor = rand::thread_rng().gen_range(-1.0..=1.0);
    now + with_jitter(base_delay(attempt), factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_delay_doubles() {
        assert_eq!(base_delay(1), Duration::seconds(30));
        assert_eq!(base_delay(2), Duration::seconds(60));
        assert_eq!(base_delay(4), Duration::seconds(240));
    }

    #[test]
    fn test_base_delay_capped() {
        assert_eq!(base_delay(12), Duration::seconds(MAX_DELAY_SECS));
        assert_eq!(base_delay(i32::MAX), Duration::seconds(MAX_DELAY_SECS));
        assert_eq!(base_delay(0), Duration::seconds(30));
    }

    #[test]
    fn test_jitter_bounds() {
        let delay = Duration::seconds(100);
        assert_eq!(with_jitter(delay, 1.0), Duration::seconds(110));
        assert_eq!(with_jitter(delay, -1.0), Duration::seconds(90));
        assert_eq!(with_jitter(delay, 5.0), Duration::seconds(110));
    }

    #[test]
    fn test_next_attempt_within_window() {
        let now = Utc::now();
        for _ in 0..50 {
            let next = next_attempt_at(3, now);
            let delay = next - now;
            assert!(delay >= Duration::seconds(108) && delay <= Duration::seconds(132));
        }
    }
}
