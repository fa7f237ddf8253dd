use std::time::Duration;

use thiserror::Error;

/// Errors returned when submitting work fails *before* it is queued.
///
/// A duplicate id is not an error: it is reported through the
/// receipt's outcome.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// Dispatcher has been shut down.
    #[error("dispatcher is shut down")]
    Shutdown,
}

/// Invalid dispatcher configuration. Raised at construction, before any
/// message can be accepted.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("at least one delivery backend is required")]
    NoBackends,

    #[error("retry limit must be >= 1 (got {0})")]
    InvalidRetryLimit(u32),

    #[error("backoff factor must be a finite number > 1 (got {0})")]
    InvalidBackoffFactor(f64),

    #[error("backoff unit must be > 0ms")]
    InvalidBackoffUnit,

    #[error("rate must be a finite number of messages per second > 0 (got {0})")]
    InvalidRate(f64),

    #[error("minimum dispatch interval must be > 0ms")]
    InvalidInterval,

    #[error("unbounded rotation requires a total attempt cap >= 1")]
    InvalidRotationCap,

    #[error("attempt timeout must be >= 1ms")]
    InvalidAttemptTimeout,
}

/// Error raised by a backend for a single delivery attempt.
///
/// Every variant counts as a failed attempt: the dispatcher backs off,
/// retries or fails over. None of them ever reaches the submitter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("transient delivery error: {0}")]
    Transient(String),

    #[error("delivery attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("delivery rejected: {0}")]
    Rejected(String),
}

/// Why a message ended `Failed`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FailureReason {
    #[error("retries exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
}
