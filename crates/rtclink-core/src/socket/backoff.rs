use std::time::Duration;

use rand::Rng;

/// Exponential backoff with jitter: `base * 2^n`, capped, then scaled by `1 ± jitter`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: f64,
    immediate_first: bool,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: f64) -> Self {
        Self {
            base,
            max,
            jitter: jitter.clamp(0.0, 1.0),
            immediate_first: false,
            attempt: 0,
        }
    }

    /// First delay after a reset is zero; the exponential series starts on the second.
    pub fn immediate_first(mut self) -> Self {
        self.immediate_first = true;
        self
    }

    pub fn next_delay(&mut self) -> Duration {
        self.next_delay_with(&mut rand::thread_rng())
    }

    pub fn next_delay_with<R: Rng>(&mut self, rng: &mut R) -> Duration {
        let attempt = self.attempt;
        self.attempt = self.attempt.saturating_add(1);

        let exponent = match (self.immediate_first, attempt) {
            (true, 0) => return Duration::ZERO,
            (true, n) => n - 1,
            (false, n) => n,
        };
        // Clamp keeps the factor finite; the cap applies long before.
        let factor = 2f64.powi(exponent.min(31) as i32);
        let capped = (self.base.as_secs_f64() * factor).min(self.max.as_secs_f64());
        let spread = if self.jitter > 0.0 {
            rng.gen_range(-self.jitter..=self.jitter)
        } else {
            0.0
        };
        Duration::from_secs_f64((capped * (1.0 + spread)).max(0.0))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Delays handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
