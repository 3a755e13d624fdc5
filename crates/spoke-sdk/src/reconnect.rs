//! Reconnect policy with jittered exponential back-off.

use std::time::Duration;

/// Controls how the spoke client reconnects after a channel drop.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Cap on the delay between attempts.
    pub max_delay: Duration,
    /// Multiplier applied after each failed attempt.
    pub multiplier: f64,
    /// Consecutive failures before giving up. `0` retries forever.
    pub max_attempts: u32,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            max_attempts: 0,
        }
    }
}

impl ReconnectBackoff {
    /// Delay for the given attempt number (0-indexed), with up to 25%
    /// jitter so a fleet of spokes does not reconnect in lockstep.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let grown_ms = base_ms * self.multiplier.powi(attempt as i32);
        let capped_ms = grown_ms.min(self.max_delay.as_millis() as f64);

        let jitter_ms = capped_ms * 0.25 * hash_fraction(attempt);
        Duration::from_millis((capped_ms + jitter_ms) as u64)
    }

    /// Whether the given attempt number exceeds the limit.
    pub fn should_give_up(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt >= self.max_attempts
    }
}

/// Deterministic fraction in `[0, 1)` derived from the attempt number.
/// Not random in any meaningful sense, just spread.
fn hash_fraction(attempt: u32) -> f64 {
    let mut x = attempt.wrapping_add(1).wrapping_mul(0x9E37_79B9);
    x ^= x >> 16;
    (x as f64) / (u32::MAX as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_until_capped() {
        let p = ReconnectBackoff {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
            max_attempts: 0,
        };
        assert!(p.delay_for_attempt(1) > p.delay_for_attempt(0));
        // 2^10 seconds is far past the cap; 8s + 25% jitter is the ceiling.
        assert!(p.delay_for_attempt(10) <= Duration::from_millis(10_000));
    }

    #[test]
    fn zero_max_attempts_never_gives_up() {
        let p = ReconnectBackoff::default();
        assert!(!p.should_give_up(0));
        assert!(!p.should_give_up(u32::MAX));
    }

    #[test]
    fn limited_policy_gives_up_at_threshold() {
        let p = ReconnectBackoff {
            max_attempts: 3,
            ..Default::default()
        };
        assert!(!p.should_give_up(2));
        assert!(p.should_give_up(3));
    }
}
