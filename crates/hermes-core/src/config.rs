use std::time::Duration;

use crate::error::CoreError;
use crate::types::Address;

/// Backoff settings for settlement submission retries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrySettings {
    /// Delay before the second attempt.
    pub initial_interval: Duration,
    /// Upper bound for a single delay.
    pub max_interval: Duration,
    /// Growth factor applied per attempt (1.0 = constant interval).
    pub multiplier: f64,
    /// Fraction of each delay randomised away, in [0, 1).
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

/// Configuration of the promise settler.
///
/// Supplied once at construction and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct HermesConfig {
    /// Settlement counterparty all channels and promises are denominated against.
    pub hermes_address: Address,
    /// Fraction of the available balance at or below which settlement triggers.
    pub threshold: f64,
    /// Total window for one settlement, from first submission attempt.
    pub max_wait_for_settlement: Duration,
    /// Capacity of the bounded settle queue.
    pub settle_queue_capacity: usize,
    /// Submission retry backoff.
    pub retry: RetrySettings,
}

impl HermesConfig {
    /// Build a config with default queue and retry settings.
    pub fn new(hermes_address: Address, threshold: f64, max_wait_for_settlement: Duration) -> Self {
        Self {
            hermes_address,
            threshold,
            max_wait_for_settlement,
            ..Default::default()
        }
    }

    /// Reject configurations the settler cannot run with.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.threshold.is_finite() || !(0.0..=1.0).contains(&self.threshold) {
            return Err(CoreError::InvalidConfig(format!(
                "threshold must be within [0, 1], got {}",
                self.threshold
            )));
        }
        if self.max_wait_for_settlement.is_zero() {
            return Err(CoreError::InvalidConfig(
                "max_wait_for_settlement must be greater than zero".into(),
            ));
        }
        if self.settle_queue_capacity == 0 {
            return Err(CoreError::InvalidConfig(
                "settle_queue_capacity must be greater than zero".into(),
            ));
        }
        if self.retry.initial_interval.is_zero() {
            return Err(CoreError::InvalidConfig(
                "retry initial_interval must be greater than zero".into(),
            ));
        }
        if self.retry.max_interval < self.retry.initial_interval {
            return Err(CoreError::InvalidConfig(
                "retry max_interval must not be below initial_interval".into(),
            ));
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(CoreError::InvalidConfig(format!(
                "retry multiplier must be at least 1.0, got {}",
                self.retry.multiplier
            )));
        }
        if !self.retry.jitter.is_finite() || !(0.0..1.0).contains(&self.retry.jitter) {
            return Err(CoreError::InvalidConfig(format!(
                "retry jitter must be within [0, 1), got {}",
                self.retry.jitter
            )));
        }
        Ok(())
    }
}

impl Default for HermesConfig {
    fn default() -> Self {
        Self {
            hermes_address: Address::default(),
            threshold: 0.1,
            max_wait_for_settlement: Duration::from_secs(600),
            settle_queue_capacity: 32,
            retry: RetrySettings::default(),
        }
    }
}
