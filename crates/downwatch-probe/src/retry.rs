//! Capped exponential backoff.

use std::time::Duration;

use downwatch_core::ProbeConfig;

/// How many times to try and how long to wait in between.
///
/// The wait before retry `n` (0-based) is `base_delay * multiplier^n`,
/// capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            multiplier: 2,
            max_delay: Duration::from_millis(5000),
        }
    }
}

impl From<&ProbeConfig> for RetryPolicy {
    fn from(config: &ProbeConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: config.base_delay,
            multiplier: config.multiplier,
            max_delay: config.max_delay,
        }
    }
}

impl RetryPolicy {
    /// Wait before the `retry`-th retry (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.multiplier.checked_pow(retry).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Wait after failed attempt number `attempt` (1-based), or `None` once
    /// the attempt budget is spent.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.max_attempts).then(|| self.delay_for(attempt.saturating_sub(1)))
    }

    /// Every wait a fully failing probe goes through, in order.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_attempts.saturating_sub(1)).map(|retry| self.delay_for(retry))
    }

    /// Upper bound on the wall time of one probe given a per-attempt timeout.
    pub fn worst_case(&self, attempt_timeout: Duration) -> Duration {
        let waiting: Duration = self.delays().sum();
        waiting + attempt_timeout.saturating_mul(self.max_attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_delays_double_from_500ms() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = policy.delays().map(|d| d.as_millis() as u64).collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000]);
    }

    #[test]
    fn delays_cap_at_max() {
        let policy = RetryPolicy {
            max_attempts: 8,
            ..RetryPolicy::default()
        };
        let delays: Vec<u64> = policy.delays().map(|d| d.as_millis() as u64).collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000, 5000, 5000, 5000]);
    }

    #[test]
    fn delay_after_stops_at_budget() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Some(Duration::from_millis(500)));
        assert_eq!(policy.delay_after(4), Some(Duration::from_millis(4000)));
        assert_eq!(policy.delay_after(5), None);
    }

    #[test]
    fn single_attempt_never_waits() {
        let policy = RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_after(1), None);
        assert_eq!(policy.delays().count(), 0);
    }

    #[test]
    fn huge_exponents_saturate_to_cap() {
        let policy = RetryPolicy {
            max_attempts: 100,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(64), Duration::from_millis(5000));
    }

    #[test]
    fn worst_case_adds_waits_and_timeouts() {
        let policy = RetryPolicy::default();
        // 7.5s of backoff plus five 10s attempts.
        assert_eq!(
            policy.worst_case(Duration::from_secs(10)),
            Duration::from_millis(57_500)
        );
    }

    #[test]
    fn from_probe_config() {
        let config = ProbeConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            multiplier: 3,
            max_delay: Duration::from_millis(250),
            ..ProbeConfig::default()
        };
        let policy = RetryPolicy::from(&config);
        let delays: Vec<u64> = policy.delays().map(|d| d.as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 250]);
    }
}
