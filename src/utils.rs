//! Small helpers shared by the worker loop.

/// Base delay of the first idle backoff step (in milliseconds)
const BASE_BACKOFF_MS: u64 = 10;

/// Idle sleep after `attempt` consecutive empty polls.
///
/// Doubles from [`BASE_BACKOFF_MS`] and is capped at `max_ms`. With the
/// `jitter` feature, `seed` (usually the worker unit id) spreads units that
/// went idle at the same moment.
pub fn calculate_backoff(attempt: u32, seed: u64, max_ms: u64) -> u64 {
    let exponent = attempt.saturating_sub(1).min(16);
    let delay = BASE_BACKOFF_MS.saturating_mul(1 << exponent).min(max_ms);

    #[cfg(feature = "jitter")]
    {
        let spread = delay / 4;
        if spread > 0 {
            let mixed = seed
                .wrapping_mul(6364136223846793005)
                .wrapping_add(u64::from(attempt));
            return (delay - spread + mixed % (spread * 2 + 1)).min(max_ms);
        }
    }

    #[cfg(not(feature = "jitter"))]
    let _ = seed;

    delay
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let first = calculate_backoff(1, 0, 1000);
        let third = calculate_backoff(3, 0, 1000);
        assert!(first <= 13);
        assert!(third > first);
        assert_eq!(calculate_backoff(30, 0, 1000), 1000);
        assert_eq!(calculate_backoff(u32::MAX, 7, 250), 250);
    }

    #[test]
    fn test_backoff_never_exceeds_cap() {
        for attempt in 0..40 {
            for seed in 0..8 {
                assert!(calculate_backoff(attempt, seed, 500) <= 500);
            }
        }
    }
}
