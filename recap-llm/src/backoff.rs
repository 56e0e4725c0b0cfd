use rand::Rng;
use std::time::Duration;

/// Exponential backoff with a cap and random jitter.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub base_ms: u64,
    pub factor: f64,
    pub cap_ms: u64,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            base_ms: 500,
            factor: 2.0,
            cap_ms: 30_000,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Deterministic delay for the given attempt (1-based), before jitter.
    /// Non-decreasing in `attempt` up to the cap.
    pub fn raw_delay_ms(&self, attempt: u32) -> u64 {
        if attempt == 0 {
            return 0;
        }
        let exp = (attempt - 1) as f64;
        let delay = (self.base_ms as f64) * self.factor.powf(exp);
        if delay >= self.cap_ms as f64 {
            self.cap_ms
        } else {
            delay.round() as u64
        }
    }

    /// Delay for the given attempt with jitter applied.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let raw = self.raw_delay_ms(attempt) as f64;
        if raw <= 0.0 {
            return Duration::ZERO;
        }
        let mut delay = raw;
        if self.jitter > 0.0 {
            let mut rng = rand::thread_rng();
            let jitter = rng.gen_range(-self.jitter..self.jitter);
            delay *= 1.0 + jitter;
            if delay < 0.0 {
                delay = self.base_ms as f64;
            }
        }
        Duration::from_millis(delay.round() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_delays_are_non_decreasing_and_capped() {
        let policy = RetryPolicy::default();
        let mut prev = 0;
        for attempt in 1..=12 {
            let d = policy.raw_delay_ms(attempt);
            assert!(d >= prev, "attempt {attempt}: {d} < {prev}");
            assert!(d <= policy.cap_ms);
            prev = d;
        }
        assert_eq!(policy.raw_delay_ms(12), policy.cap_ms);
    }

    #[test]
    fn first_attempt_doubles_from_base() {
        let policy = RetryPolicy {
            base_ms: 100,
            factor: 2.0,
            cap_ms: 10_000,
            jitter: 0.0,
        };
        assert_eq!(policy.raw_delay_ms(1), 100);
        assert_eq!(policy.raw_delay_ms(2), 200);
        assert_eq!(policy.raw_delay_ms(3), 400);
        assert_eq!(policy.next_delay(2), Duration::from_millis(200));
    }
}
