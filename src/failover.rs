//! Retry-and-failover decisions for a single message.
//!
//! The policy is pure: given the attempt that just failed and the number
//! of calls made so far it says whether to retry the same backend, move
//! to the next one, or give up. The worker owns the clock and the cursor.

use std::time::Duration;

use tokio::time::Instant;

use crate::backoff::BackoffPolicy;
use crate::config::RotationPolicy;
use crate::error::BackendError;

/// What a single backend call produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptResult {
    Delivered,

    /// Backend returned `false`.
    Declined,

    Error(BackendError),
}

impl AttemptResult {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptResult::Delivered)
    }
}

impl std::fmt::Display for AttemptResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptResult::Delivered => write!(f, "delivered"),
            AttemptResult::Declined => write!(f, "backend declined delivery"),
            AttemptResult::Error(err) => write!(f, "{err}"),
        }
    }
}

/// One backend call. Lives only while its message is in flight.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub backend_index: usize,

    /// 1-based attempt number on this backend.
    pub attempt: u32,

    pub at: Instant,

    pub result: AttemptResult,
}

/// Next step after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextStep {
    /// Try the same backend again after `delay`.
    Retry { delay: Duration },

    /// Current backend is exhausted; continue on `backend_index` after `delay`.
    Failover { backend_index: usize, delay: Duration },

    /// Stop. `cursor` is where the backend cursor should rest.
    GiveUp { cursor: usize },
}

#[derive(Debug, Clone)]
pub struct RetryFailoverPolicy {
    retry_limit: u32,
    backend_count: usize,
    rotation: RotationPolicy,
    backoff: BackoffPolicy,
}

impl RetryFailoverPolicy {
    pub fn new(
        retry_limit: u32,
        backend_count: usize,
        rotation: RotationPolicy,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            retry_limit: retry_limit.max(1),
            backend_count: backend_count.max(1),
            rotation,
            backoff,
        }
    }

    /// Most backend calls a single message can cause.
    pub fn attempt_cap(&self) -> u32 {
        match self.rotation {
            RotationPolicy::Bounded => {
                let backends = u32::try_from(self.backend_count).unwrap_or(u32::MAX);
                self.retry_limit.saturating_mul(backends)
            }
            RotationPolicy::Unbounded { max_total_attempts } => max_total_attempts.max(1),
        }
    }

    /// Decide what follows `failed`, given `total_attempts` calls so far
    /// (including `failed`).
    pub fn after_failure(&self, failed: &AttemptRecord, total_attempts: u32) -> NextStep {
        let exhausted = failed.attempt >= self.retry_limit;
        let next_backend = if exhausted {
            (failed.backend_index + 1) % self.backend_count
        } else {
            failed.backend_index
        };

        if total_attempts >= self.attempt_cap() {
            return NextStep::GiveUp { cursor: next_backend };
        }

        let delay = self.backoff.delay_for(failed.attempt);
        if exhausted {
            NextStep::Failover { backend_index: next_backend, delay }
        } else {
            NextStep::Retry { delay }
        }
    }
}
