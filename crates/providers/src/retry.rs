//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;
use writingway_config::RetryConfig;

/// How many times to try a provider and how long to wait in between.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts against the primary provider, first call included. At least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Fraction in `[0, 1]`; each delay is scaled by a random factor in
    /// `[1 - jitter, 1 + jitter]`.
    pub jitter: f64,
}

impl RetryPolicy {
    /// A policy that never waits. Useful in tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        }
    }

    /// Delay before retry number `retry` (1 for the first retry).
    ///
    /// A vendor `Retry-After` hint replaces the computed backoff, up to
    /// `max_delay`.
    pub fn delay(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(hint) = retry_after {
            return hint.min(self.max_delay);
        }

        let exp = retry.saturating_sub(1).min(30) as i32;
        let raw = self.base_delay.as_secs_f64() * self.multiplier.powi(exp);
        let capped = raw.min(self.max_delay.as_secs_f64());

        let scaled = if self.jitter > 0.0 && capped > 0.0 {
            let mut rng = rand::rng();
            capped * rng.random_range((1.0 - self.jitter)..=(1.0 + self.jitter))
        } else {
            capped
        };

        Duration::try_from_secs_f64(scaled.clamp(0.0, self.max_delay.as_secs_f64()))
            .unwrap_or(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            multiplier: config.multiplier.max(1.0),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter.clamp(0.0, 1.0),
        }
    }
}
