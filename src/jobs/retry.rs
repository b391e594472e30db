//! Backoff policy applied after a failed execution

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;
use crate::jobs::error::FailureKind;

/// Growth curve of the delay between attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffStrategy {
    /// `base * multiplier^(attempt - 1)`
    Exponential { multiplier: f64 },
    /// `base * attempt`
    Linear,
}

/// Outcome of consulting the policy after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry(Duration),
    Fail,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    strategy: BackoffStrategy,
    base_delay: Duration,
    max_delay: Duration,
    jitter: f64,
}

impl RetryPolicy {
    pub fn new(strategy: BackoffStrategy, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            strategy,
            base_delay,
            max_delay: max_delay.max(base_delay),
            jitter: 0.0,
        }
    }

    /// Add up to `jitter` of the gap to the next step, `0.0..=1.0`
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = if jitter.is_finite() {
            jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        let strategy = match config.strategy.to_lowercase().as_str() {
            "linear" => BackoffStrategy::Linear,
            _ => BackoffStrategy::Exponential {
                multiplier: config.multiplier,
            },
        };

        Self::new(
            strategy,
            Duration::from_secs(config.base_delay),
            Duration::from_secs(config.max_delay),
        )
        .with_jitter(config.jitter)
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Decide what happens to a job whose `attempt`-th execution just failed
    pub fn next_action(&self, attempt: u32, max_attempts: u32, kind: FailureKind) -> RetryDecision {
        if attempt >= max_attempts || kind == FailureKind::Permanent {
            return RetryDecision::Fail;
        }
        RetryDecision::Retry(self.delay_for(attempt))
    }

    /// Delay before the next attempt after `attempt` failures
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let u = if self.jitter > 0.0 {
            rand::rng().random::<f64>()
        } else {
            0.0
        };
        self.delay_with(attempt, u)
    }

    /// Jitter only ever fills part of the gap to the next step, so for any
    /// draws `delay(n) <= delay(n + 1)` and the sequence stays monotonic.
    fn delay_with(&self, attempt: u32, u: f64) -> Duration {
        let attempt = attempt.max(1);
        let raw = self.raw_seconds(attempt);
        let next = self.raw_seconds(attempt.saturating_add(1));
        let jittered = raw + u * self.jitter * (next - raw);

        let capped = jittered.min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }

    fn raw_seconds(&self, attempt: u32) -> f64 {
        let base = self.base_delay.as_secs_f64();
        match self.strategy {
            BackoffStrategy::Exponential { multiplier } => {
                let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
                base * multiplier.powi(exponent)
            }
            BackoffStrategy::Linear => base * f64::from(attempt),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
