//! Retry with backoff against a deadline.
//!
//! Timing uses `tokio::time`, so tests can drive it with a paused clock.

use hermes_core::RetrySettings;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Backoff policy for settlement submission.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    pub jitter: f64,
}

/// Returned when the deadline passed before the operation succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

impl RetryPolicy {
    /// Constant interval, no jitter.
    pub fn fixed(interval: Duration) -> Self {
        Self {
            initial_interval: interval,
            max_interval: interval,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }

    /// Delay after the given failed attempt (1-based), before jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let nanos = self.initial_interval.as_nanos() as f64 * self.multiplier.powi(exponent);
        if nanos.is_nan() || nanos >= self.max_interval.as_nanos() as f64 {
            return self.max_interval;
        }
        Duration::from_nanos(nanos.max(0.0) as u64)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let factor = rand::thread_rng().gen_range((1.0 - self.jitter)..=1.0);
        delay.mul_f64(factor)
    }

    /// Run `op` until it succeeds or the next attempt would start after
    /// `deadline`. The attempt number (1-based) is passed to `op`.
    pub async fn run_until<T, E, F, Fut>(
        &self,
        deadline: Instant,
        mut op: F,
    ) -> Result<T, RetryExhausted<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let last_error = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            let delay = self.jittered(self.delay_for_attempt(attempt));
            if Instant::now() + delay >= deadline {
                return Err(RetryExhausted {
                    attempts: attempt,
                    last_error,
                });
            }
            tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, error = %last_error, "retrying");
            tokio::time::sleep(delay).await;
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            initial_interval: settings.initial_interval,
            max_interval: settings.max_interval,
            multiplier: settings.multiplier,
            jitter: settings.jitter,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}
