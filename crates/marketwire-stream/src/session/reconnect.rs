/*
[INPUT]:  Unexpected socket closes reported by the session driver
[OUTPUT]: Jittered exponential backoff delays, or exhaustion
[POS]:    Session layer - reconnection policy
[UPDATE]: When changing backoff math or attempt accounting
*/

use rand::Rng;
use std::time::Duration;

use crate::session::config::ReconnectConfig;

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempts: u32,
    current_delay: Duration,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        let current_delay = config.initial_delay;
        Self {
            config,
            attempts: 0,
            current_delay,
        }
    }

    /// `min(max_delay, initial_delay * factor^(attempt-1))`, before jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.config.initial_delay.as_secs_f64() * self.config.factor.powi(exp);
        let max = self.config.max_delay.as_secs_f64();
        if !scaled.is_finite() || scaled >= max {
            return self.config.max_delay;
        }
        Duration::from_secs_f64(scaled)
    }

    /// Count one failed attempt. `None` once attempts exceed `max_attempts`.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.next_delay_with(&mut rand::thread_rng())
    }

    pub fn next_delay_with<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<Duration> {
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts > self.config.max_attempts {
            return None;
        }

        let jitter = if self.config.jitter_max > self.config.jitter_min {
            rng.gen_range(self.config.jitter_min..=self.config.jitter_max)
        } else {
            self.config.jitter_min
        };
        self.current_delay = self.jittered(self.base_delay(self.attempts), jitter);
        Some(self.current_delay)
    }

    /// `base * jitter` clamped to `max_delay`; out-of-range products clamp too.
    fn jittered(&self, base: Duration, jitter: f64) -> Duration {
        match Duration::try_from_secs_f64(base.as_secs_f64() * jitter) {
            Ok(delay) => delay.min(self.config.max_delay),
            Err(_) => self.config.max_delay,
        }
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.current_delay = self.config.initial_delay;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rstest::rstest;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy::new(ReconnectConfig::default())
    }

    #[rstest]
    #[case(1, 1_000)]
    #[case(2, 2_000)]
    #[case(3, 4_000)]
    #[case(5, 16_000)]
    #[case(6, 30_000)]
    #[case(40, 30_000)]
    #[case(u32::MAX, 30_000)]
    fn base_delay_clamps_at_ceiling(#[case] attempt: u32, #[case] expected_ms: u64) {
        assert_eq!(policy().base_delay(attempt), Duration::from_millis(expected_ms));
    }

    #[test]
    fn base_delay_is_monotonic() {
        let policy = policy();
        let delays: Vec<_> = (1..=64).map(|attempt| policy.base_delay(attempt)).collect();
        assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]));
        assert!(delays.iter().all(|delay| *delay <= Duration::from_secs(30)));
    }

    #[test]
    fn jitter_stays_in_bounds_and_under_ceiling() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut policy = policy();
        for attempt in 1..=10 {
            let delay = policy.next_delay_with(&mut rng).expect("delay");
            let base = policy.base_delay(attempt).as_secs_f64();
            let secs = delay.as_secs_f64();
            assert!(secs >= base * 0.75 - 1e-9, "attempt {attempt}: {secs} < {base}*0.75");
            assert!(secs <= (base * 1.25).min(30.0) + 1e-9);
        }
    }

    #[test]
    fn oversized_jitter_clamps_to_ceiling() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig {
            jitter_min: 1e30,
            jitter_max: 1e30,
            ..ReconnectConfig::default()
        });
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(30)));

        let mut policy = ReconnectPolicy::new(ReconnectConfig {
            jitter_min: f64::NAN,
            jitter_max: f64::NAN,
            ..ReconnectConfig::default()
        });
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn exhaustion_after_max_attempts_and_reset() {
        let mut policy = policy();
        for _ in 0..10 {
            assert!(policy.next_delay().is_some());
        }
        assert!(policy.next_delay().is_none());
        assert_eq!(policy.attempts(), 11);

        policy.reset();
        assert_eq!(policy.attempts(), 0);
        assert_eq!(policy.current_delay(), Duration::from_secs(1));
        assert!(policy.next_delay().is_some());
    }
}
