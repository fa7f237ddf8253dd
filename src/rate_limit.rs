use std::time::Duration;

use tokio::time::{sleep_until, Instant};

use crate::config::RateConfig;
use crate::error::ConfigError;

/// Enforces a minimum spacing between consecutive dispatches.
///
/// Owned by the worker loop; `wait` is called once per dequeued message,
/// never per attempt.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last: Option<Instant>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval, last: None }
    }

    /// Build from a target rate in messages per second.
    pub fn per_second(rate: f64) -> Result<Self, ConfigError> {
        RateConfig::PerSecond(rate).min_interval().map(Self::new)
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Suspend until at least `min_interval` has elapsed since the
    /// previous `wait` returned. The first call returns immediately.
    pub async fn wait(&mut self) {
        if let Some(last) = self.last {
            let ready_at = last + self.min_interval;
            if ready_at > Instant::now() {
                sleep_until(ready_at).await;
            }
        }
        self.last = Some(Instant::now());
    }
}
