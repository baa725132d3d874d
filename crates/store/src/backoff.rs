use std::time::Duration;

/// Capped exponential backoff without an attempt limit.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    factor: u32,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, factor: u32, max: Duration) -> Self {
        Self { base, factor: factor.max(1), max, attempt: 0 }
    }

    pub fn attempt(&self) -> u32 { self.attempt }

    /// Delay for the current attempt, then advance.
    pub fn next_delay(&mut self) -> Duration {
        let mut delay = self.base;
        for _ in 0..self.attempt {
            delay = delay.saturating_mul(self.factor);
            if delay >= self.max {
                break;
            }
        }
        self.attempt = self.attempt.saturating_add(1);
        delay.min(self.max)
    }

    pub fn reset(&mut self) { self.attempt = 0; }
}
