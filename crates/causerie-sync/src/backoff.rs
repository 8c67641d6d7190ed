//! Exponential backoff with jitter for listener resynchronisation.

use std::time::Duration;

use rand::Rng;

/// Upper bound on a single delay.
const MAX_DELAY: Duration = Duration::from_secs(30);

/// Delay before resync attempt `attempt` (0-based).
///
/// `base` doubled each attempt, +/-25% jitter, capped at [`MAX_DELAY`]:
/// - attempt 0: ~base
/// - attempt 1: ~2 * base
/// - attempt 2: ~4 * base
pub(crate) fn resync_delay(base: Duration, attempt: u32) -> Duration {
    let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    let scaled = base_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(MAX_DELAY.as_millis() as u64);
    let jitter_range = scaled / 4;
    let jitter = if jitter_range > 0 {
        let offset = rand::thread_rng().gen_range(0..=jitter_range * 2);
        offset as i64 - jitter_range as i64
    } else {
        0
    };
    Duration::from_millis((scaled as i64 + jitter).max(1) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_exponentially_within_jitter() {
        let base = Duration::from_millis(100);
        for attempt in 0..4 {
            let expected = 100u64 * 2u64.pow(attempt);
            let d = resync_delay(base, attempt).as_millis() as u64;
            assert!(d >= expected * 3 / 4, "attempt {attempt}: {d}ms");
            assert!(d <= expected * 5 / 4, "attempt {attempt}: {d}ms");
        }
    }

    #[test]
    fn delay_is_capped() {
        let d = resync_delay(Duration::from_secs(10), 20);
        assert!(d <= MAX_DELAY + MAX_DELAY / 4);
    }
}
