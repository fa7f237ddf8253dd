use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::backend::DeliveryBackend;
use crate::backoff::BackoffPolicy;
use crate::config::DispatcherConfig;
use crate::error::{ConfigError, DispatchError};
use crate::failover::RetryFailoverPolicy;
use crate::idempotency::IdempotencyGuard;
use crate::rate_limit::RateLimiter;
use crate::types::{DeliveryOutcome, DeliveryState, Message, MessageId, SubmitReceipt};
use crate::worker::{worker_loop, WorkerContext};

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

/// Handle to a running delivery queue.
///
/// Owns the idempotency guard and the single worker task. Callers only
/// submit and query; the backend cursor and status table are written by
/// the worker alone.
pub struct Dispatcher {
    guard: IdempotencyGuard,
    ctx: Arc<WorkerContext>,
    worker_handle: Option<JoinHandle<()>>,
    config: DispatcherConfig,
}

impl Dispatcher {
    /// Validate `config`, then start the worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: DispatcherConfig,
        backends: Vec<Arc<dyn DeliveryBackend>>,
    ) -> Result<Self, ConfigError> {
        if backends.is_empty() {
            return Err(ConfigError::NoBackends);
        }
        config.validate()?;

        let limiter = RateLimiter::new(config.rate.min_interval()?);
        let policy = RetryFailoverPolicy::new(
            config.retry_limit,
            backends.len(),
            config.rotation,
            BackoffPolicy::from_config(&config),
        );

        tracing::debug!(
            backends = backends.len(),
            retry_limit = config.retry_limit,
            attempt_cap = policy.attempt_cap(),
            min_interval_ms = limiter.min_interval().as_millis() as u64,
            "starting dispatcher"
        );

        let ctx = Arc::new(WorkerContext::new(backends, config.attempt_timeout()));
        let worker_handle = tokio::spawn(worker_loop(ctx.clone(), limiter, policy));

        Ok(Self {
            guard: IdempotencyGuard::new(),
            ctx,
            worker_handle: Some(worker_handle),
            config,
        })
    }

    /// Accept `message` for delivery, unless its id was seen before.
    ///
    /// The id check, the `Queued` status write and the enqueue happen
    /// under one lock, so acceptance order is queue order and two
    /// concurrent submissions of a new id cannot both get through.
    pub async fn submit(&self, message: Message) -> Result<SubmitReceipt, DispatchError> {
        let id = message.id.clone();
        let mut intake = self.guard.lock().await;

        if !self.ctx.is_running() {
            metric_inc("dispatcher.submit.shutdown");
            return Err(DispatchError::Shutdown);
        }

        if !intake.accept(&id) {
            metric_inc("dispatcher.submit.duplicate");
            tracing::debug!(message_id = %id, "duplicate submission ignored");
            return Ok(SubmitReceipt {
                id,
                outcome: DeliveryOutcome::Duplicate,
            });
        }

        self.ctx.status.record_outcome(&id, DeliveryState::queued()).await;
        self.ctx.queue.enqueue(Arc::new(message)).await;
        drop(intake);

        metric_inc("dispatcher.submit.queued");
        tracing::debug!(message_id = %id, "message queued");
        Ok(SubmitReceipt {
            id,
            outcome: DeliveryOutcome::Queued,
        })
    }

    /// `Queued`, `Sent`, `Failed`, or `Unknown` for ids never submitted.
    pub async fn status(&self, id: &MessageId) -> DeliveryOutcome {
        self.ctx.status.lookup(id).await
    }

    pub async fn delivery_state(&self, id: &MessageId) -> Option<DeliveryState> {
        self.ctx.status.details(id).await
    }

    pub async fn status_all(&self) -> HashMap<MessageId, DeliveryState> {
        self.ctx.status.snapshot().await
    }

    /// Ids still in the queue, head (possibly in flight) first.
    pub async fn pending(&self) -> Vec<MessageId> {
        self.ctx.queue.list().await
    }

    pub async fn pending_len(&self) -> usize {
        self.ctx.queue.len().await
    }

    /// Index of the backend the next message will start on.
    pub fn active_backend(&self) -> usize {
        self.ctx.cursor()
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.ctx.backends.iter().map(|b| b.name().to_string()).collect()
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Wait until the worker has observed an empty queue.
    pub async fn flush(&self) {
        loop {
            let idle = self.ctx.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();

            if self.ctx.queue.is_empty().await {
                return;
            }
            idle.await;
        }
    }

    /// Stop accepting messages, let the worker drain what is queued, and
    /// wait for it to exit.
    pub async fn shutdown(&mut self) {
        {
            let _intake = self.guard.lock().await;
            self.ctx.is_running.store(false, Ordering::SeqCst);
        }
        self.ctx.queue.wake();

        if let Some(handle) = self.worker_handle.take() {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "dispatcher worker terminated abnormally");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.ctx.is_running()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if let Some(handle) = self.worker_handle.take() {
            handle.abort();
        }
    }
}
