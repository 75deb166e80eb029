//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Exponential backoff: `base * factor^(retry - 1)`, capped, with ±jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub factor: f64,
    /// Relative jitter, e.g. 0.2 for ±20%.
    pub jitter: f64,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            factor: 2.0,
            jitter: 0.2,
            max: Duration::from_millis(2_000),
        }
    }
}

impl From<&RetryConfig> for Backoff {
    fn from(config: &RetryConfig) -> Self {
        Self {
            base: Duration::from_millis(config.base_delay_ms),
            factor: config.factor,
            jitter: config.jitter,
            max: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl Backoff {
    /// Delay before retry number `retry` (1-based) without jitter.
    pub fn nominal(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
        let millis = self.base.as_millis() as f64 * self.factor.powi(exponent);
        let capped = millis.min(self.max.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Delay before retry number `retry` (1-based), jittered.
    pub fn delay(&self, retry: u32) -> Duration {
        let nominal = self.nominal(retry);
        if nominal.is_zero() || self.jitter <= 0.0 {
            return nominal;
        }
        let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        nominal.mul_f64(1.0 + spread)
    }
}
