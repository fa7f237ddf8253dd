use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Dispatcher tuning knobs.
///
/// Backends are not part of the config; they are handed to
/// [`Dispatcher::new`](crate::Dispatcher::new) alongside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Attempts per backend before failing over. Must be >= 1.
    pub retry_limit: u32,

    /// Exponential backoff base. Must be > 1.
    pub backoff_factor: f64,

    /// Backoff unit in milliseconds: delay = factor^attempt * unit.
    pub backoff_unit_ms: u64,

    /// Optional ceiling for a single backoff delay.
    pub backoff_max_ms: Option<u64>,

    /// Dispatch throttle.
    pub rate: RateConfig,

    /// When to give up on a message.
    pub rotation: RotationPolicy,

    /// Optional per-call timeout for backend attempts.
    pub attempt_timeout_ms: Option<u64>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            retry_limit: 3,
            backoff_factor: 2.0,
            backoff_unit_ms: 1_000,
            backoff_max_ms: None,
            rate: RateConfig::PerSecond(10.0),
            rotation: RotationPolicy::Bounded,
            attempt_timeout_ms: None,
        }
    }
}

impl DispatcherConfig {
    /// Check every field, failing on the first invalid one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry_limit == 0 {
            return Err(ConfigError::InvalidRetryLimit(self.retry_limit));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor <= 1.0 {
            return Err(ConfigError::InvalidBackoffFactor(self.backoff_factor));
        }
        if self.backoff_unit_ms == 0 {
            return Err(ConfigError::InvalidBackoffUnit);
        }
        self.rate.min_interval()?;
        if let RotationPolicy::Unbounded { max_total_attempts: 0 } = self.rotation {
            return Err(ConfigError::InvalidRotationCap);
        }
        if self.attempt_timeout_ms == Some(0) {
            return Err(ConfigError::InvalidAttemptTimeout);
        }
        Ok(())
    }

    pub(crate) fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout_ms.map(Duration::from_millis)
    }
}

/// Throttle parameterization. Both forms are equivalent:
/// `interval = 1000ms / rate`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateConfig {
    /// Messages per second.
    PerSecond(f64),

    /// Minimum spacing between dispatches, in milliseconds.
    MinIntervalMs(u64),
}

impl RateConfig {
    /// Minimum spacing between two dispatches.
    pub fn min_interval(&self) -> Result<Duration, ConfigError> {
        match *self {
            RateConfig::PerSecond(rate) => {
                if !rate.is_finite() || rate <= 0.0 {
                    return Err(ConfigError::InvalidRate(rate));
                }
                Duration::try_from_secs_f64(1.0 / rate).map_err(|_| ConfigError::InvalidRate(rate))
            }
            RateConfig::MinIntervalMs(0) => Err(ConfigError::InvalidInterval),
            RateConfig::MinIntervalMs(ms) => Ok(Duration::from_millis(ms)),
        }
    }

    /// Equivalent rate in messages per second.
    pub fn per_second(&self) -> Result<f64, ConfigError> {
        let interval = self.min_interval()?;
        Ok(1.0 / interval.as_secs_f64())
    }
}

/// Termination policy for a single message's delivery sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationPolicy {
    /// Give up once every backend has been tried `retry_limit` times
    /// (`retry_limit * backend_count` calls in total).
    Bounded,

    /// Keep rotating through backends until one succeeds or
    /// `max_total_attempts` calls have been made.
    Unbounded { max_total_attempts: u32 },
}
