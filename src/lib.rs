//! A single-process message delivery queue.
//!
//! Callers submit messages carrying their own unique id. The dispatcher
//! queues them, throttles dispatch, and delivers each one through an
//! ordered set of interchangeable backends, retrying with exponential
//! backoff and failing over to the next backend when one is exhausted.
//!
//! ## Guarantees
//! - At most one delivery sequence per message id
//! - FIFO dispatch, one message at a time
//! - Bounded attempts per message (`retry_limit * backends` by default)
//! - Minimum spacing between dispatches
//! - Every attempt failure is logged and reflected in the status detail
//!
//! ## Non-Guarantees
//! - Durability across restarts
//! - Exactly-once delivery
//! - Ordering across backends
//! - Priorities
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use message_dispatcher::{
//!     async_trait, BackendError, DeliveryBackend, Dispatcher, DispatcherConfig, Message,
//! };
//!
//! struct Stdout;
//!
//! #[async_trait]
//! impl DeliveryBackend for Stdout {
//!     fn name(&self) -> &str {
//!         "stdout"
//!     }
//!
//!     async fn attempt(&self, message: &Message) -> Result<bool, BackendError> {
//!         println!("{} -> {}", message.subject, message.recipient);
//!         Ok(true)
//!     }
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let dispatcher = Dispatcher::new(DispatcherConfig::default(), vec![Arc::new(Stdout)])?;
//! let receipt = dispatcher
//!     .submit(Message::new("msg-1", "ops@example.com", "hello", "world"))
//!     .await?;
//! dispatcher.flush().await;
//! println!("{}: {}", receipt.id, dispatcher.status(&receipt.id).await);
//! # Ok(())
//! # }
//! ```

mod backend;
mod backoff;
mod config;
mod dispatcher;
mod error;
mod failover;
mod idempotency;
mod queue;
mod rate_limit;
mod signing;
mod status;
mod types;
mod worker;

pub use async_trait::async_trait;

pub use backend::DeliveryBackend;
pub use backoff::BackoffPolicy;
pub use config::{DispatcherConfig, RateConfig, RotationPolicy};
pub use dispatcher::Dispatcher;
pub use error::{BackendError, ConfigError, DispatchError, FailureReason};
pub use failover::{AttemptRecord, AttemptResult, NextStep, RetryFailoverPolicy};
pub use idempotency::IdempotencyGuard;
pub use queue::{DeliveryQueue, QueueEntry};
pub use rate_limit::RateLimiter;
pub use signing::{
    compute_signature,
    is_timestamp_fresh,
    signature_headers,
    verify_request,
    verify_signature,
    SignatureHeaders,
    VerificationError,
    DEFAULT_SIGNATURE_HEADER,
    DEFAULT_TIMESTAMP_HEADER,
};
pub use status::StatusTable;
pub use types::{DeliveryOutcome, DeliveryState, Message, MessageId, SubmitReceipt};

#[cfg(feature = "http")]
pub use backend::HttpBackend;
