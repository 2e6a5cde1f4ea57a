//! Reconnect delay policy.

use std::time::Duration;

/// Exponential backoff: `min(base * factor^(attempt - 1), max)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub factor: f64,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 1.5,
            max: Duration::from_secs(30),
        }
    }
}

impl Backoff {
    /// Delay before reconnect attempt `attempt` (1-based). Attempt 0 is
    /// treated as 1.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.base.as_secs_f64() * self.factor.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max.as_secs_f64() {
            return self.max;
        }
        Duration::from_secs_f64(scaled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(d: Duration) -> u128 {
        d.as_millis()
    }

    #[test]
    fn default_sequence() {
        let b = Backoff::default();
        assert_eq!(ms(b.delay_for(1)), 1000);
        assert_eq!(ms(b.delay_for(2)), 1500);
        assert_eq!(ms(b.delay_for(3)), 2250);
        assert_eq!(ms(b.delay_for(4)), 3375);
        assert_eq!(ms(b.delay_for(5)), 5062);
    }

    #[test]
    fn caps_at_max() {
        let b = Backoff::default();
        // 1000 * 1.5^8 is still below the cap; the tenth attempt is the first capped one.
        assert_eq!(ms(b.delay_for(9)), 25_628);
        assert_eq!(ms(b.delay_for(10)), 30_000);
        assert_eq!(ms(b.delay_for(11)), 30_000);
        assert_eq!(ms(b.delay_for(u32::MAX)), 30_000);
    }

    #[test]
    fn zero_attempt_uses_base() {
        assert_eq!(Backoff::default().delay_for(0), Duration::from_secs(1));
    }
}
