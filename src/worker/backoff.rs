//! Optional exponential backoff after consecutive store failures.
//!
//! Disabled when the cap is zero: the worker then retries every cycle, and
//! only the jitter separates attempts. Retries are never capped in count.

use std::time::Duration;

const BASE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct Backoff {
    max: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(max: Duration) -> Self {
        Self { max, failures: 0 }
    }

    pub fn is_enabled(&self) -> bool {
        !self.max.is_zero()
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Record a failure and return the extra delay before the next cycle.
    pub fn on_failure(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        if !self.is_enabled() {
            return Duration::ZERO;
        }
        let exp = (self.failures - 1).min(20);
        BASE_DELAY.saturating_mul(1u32 << exp).min(self.max)
    }

    pub fn on_success(&mut self) {
        self.failures = 0;
    }
}
