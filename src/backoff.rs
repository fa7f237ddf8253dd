use std::time::Duration;

use crate::config::DispatcherConfig;

/// Upper bound used when the exponential blows past what a `Duration`
/// can sensibly hold.
const MAX_DELAY_SECS: f64 = 60.0 * 60.0 * 24.0 * 365.0;

/// Deterministic exponential backoff: `factor^attempt * unit`.
///
/// `attempt` is 1 for the first retry; there is no delay before the very
/// first attempt. No jitter is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    factor: f64,
    unit: Duration,
    max: Option<Duration>,
}

impl BackoffPolicy {
    pub fn new(factor: f64, unit: Duration) -> Self {
        Self { factor, unit, max: None }
    }

    /// Cap any single delay at `max`.
    pub fn with_max(mut self, max: Duration) -> Self {
        self.max = Some(max);
        self
    }

    pub(crate) fn from_config(config: &DispatcherConfig) -> Self {
        let policy = Self::new(config.backoff_factor, Duration::from_millis(config.backoff_unit_ms));
        match config.backoff_max_ms {
            Some(max_ms) => policy.with_max(Duration::from_millis(max_ms)),
            None => policy,
        }
    }

    /// Delay to wait after the `attempt`-th failure.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.factor.powi(exponent) * self.unit.as_secs_f64();
        // A factor below zero alternates sign; treat negative delays as none.
        let delay = if secs.is_finite() {
            Duration::from_secs_f64(secs.clamp(0.0, MAX_DELAY_SECS))
        } else {
            Duration::from_secs_f64(MAX_DELAY_SECS)
        };
        match self.max {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}
