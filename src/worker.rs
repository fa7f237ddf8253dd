use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::Notify;
use tokio::time::{sleep, Instant};

use crate::backend::DeliveryBackend;
use crate::error::{BackendError, FailureReason};
use crate::failover::{AttemptRecord, AttemptResult, NextStep, RetryFailoverPolicy};
use crate::queue::{DeliveryQueue, QueueEntry};
use crate::rate_limit::RateLimiter;
use crate::status::StatusTable;
use crate::types::{now_secs, DeliveryOutcome, DeliveryState, Message};

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

#[cfg(feature = "metrics")]
fn metric_inc_backend(name: &'static str, backend: &str) {
    metrics::increment_counter!(name, "backend" => backend.to_string());
}

#[cfg(not(feature = "metrics"))]
fn metric_inc_backend(_name: &'static str, _backend: &str) {}

/// State shared between the dispatcher handle and its worker.
///
/// The worker is the only writer of the status table's terminal
/// outcomes and of the backend cursor.
pub(crate) struct WorkerContext {
    pub queue: DeliveryQueue,

    pub status: StatusTable,

    /// Ordered, non-empty backend set.
    pub backends: Vec<Arc<dyn DeliveryBackend>>,

    /// Backend the next message starts on. Persists across messages.
    pub cursor: AtomicUsize,

    pub is_running: AtomicBool,

    /// Signalled every time the worker observes an empty queue.
    pub idle: Notify,

    pub attempt_timeout: Option<Duration>,
}

impl WorkerContext {
    pub fn new(backends: Vec<Arc<dyn DeliveryBackend>>, attempt_timeout: Option<Duration>) -> Self {
        Self {
            queue: DeliveryQueue::new(),
            status: StatusTable::new(),
            backends,
            cursor: AtomicUsize::new(0),
            is_running: AtomicBool::new(true),
            idle: Notify::new(),
            attempt_timeout,
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }
}

/// The single consumption path over the queue.
///
/// Drains the queue one message at a time: throttle, run the full
/// retry/failover sequence, record the terminal outcome, then drop the
/// entry. Idles on the queue's wake signal when empty, and exits once
/// shut down and drained.
pub(crate) async fn worker_loop(
    ctx: Arc<WorkerContext>,
    mut limiter: RateLimiter,
    policy: RetryFailoverPolicy,
) {
    loop {
        while let Some(entry) = ctx.queue.head().await {
            limiter.wait().await;
            dispatch_entry(&entry, &ctx, &policy).await;
            ctx.queue.complete_head().await;
        }

        ctx.idle.notify_waiters();

        if !ctx.is_running() {
            // Submissions stop before the flag flips, so anything that got
            // in is already visible here.
            if ctx.queue.is_empty().await {
                tracing::debug!("dispatcher worker drained, exiting");
                return;
            }
            continue;
        }

        ctx.queue.wait_ready().await;
    }
}

async fn dispatch_entry(entry: &QueueEntry, ctx: &WorkerContext, policy: &RetryFailoverPolicy) {
    let message = &entry.message;
    tracing::debug!(
        message_id = %message.id,
        queued_for_ms = entry.enqueued_at.elapsed().as_millis() as u64,
        "dispatching message"
    );

    let state = deliver(message, ctx, policy).await;

    match state.outcome {
        DeliveryOutcome::Sent => {
            metric_inc("dispatcher.delivery.sent");
            tracing::info!(
                message_id = %message.id,
                attempts = state.attempts,
                backend = state.last_backend.as_deref().unwrap_or_default(),
                "message sent"
            );
        }
        _ => {
            metric_inc("dispatcher.delivery.failed");
            tracing::info!(
                message_id = %message.id,
                attempts = state.attempts,
                error = state.last_error.as_deref().unwrap_or_default(),
                "message failed"
            );
        }
    }

    ctx.status.record_outcome(&message.id, state).await;
}

/// Run one message's delivery sequence to a terminal state.
async fn deliver(message: &Message, ctx: &WorkerContext, policy: &RetryFailoverPolicy) -> DeliveryState {
    let backend_count = ctx.backends.len();
    let mut backend_index = ctx.cursor() % backend_count;
    let mut attempt = 0u32;
    let mut history: Vec<AttemptRecord> = Vec::new();

    loop {
        attempt += 1;
        let backend = &ctx.backends[backend_index];
        let result = attempt_once(&**backend, message, ctx.attempt_timeout).await;
        let record = AttemptRecord {
            backend_index,
            attempt,
            at: Instant::now(),
            result,
        };
        let total = history.len() as u32 + 1;

        if record.result.is_success() {
            return DeliveryState {
                outcome: DeliveryOutcome::Sent,
                attempts: total,
                last_backend: Some(backend.name().to_string()),
                last_error: history.last().map(|r| r.result.to_string()),
                last_updated_secs: now_secs(),
            };
        }

        metric_inc_backend("dispatcher.attempt.failure", backend.name());
        tracing::warn!(
            message_id = %message.id,
            backend = backend.name(),
            attempt,
            total_attempts = total,
            error = %record.result,
            "delivery attempt failed"
        );

        let last_error = record.result.to_string();
        let next = policy.after_failure(&record, total);
        history.push(record);

        match next {
            NextStep::Retry { delay } => {
                record_progress(ctx, message, total, backend.name(), &last_error).await;
                sleep(delay).await;
            }
            NextStep::Failover { backend_index: next_index, delay } => {
                record_progress(ctx, message, total, backend.name(), &last_error).await;
                ctx.cursor.store(next_index, Ordering::SeqCst);
                metric_inc("dispatcher.failover");
                tracing::info!(
                    message_id = %message.id,
                    from = backend.name(),
                    to = ctx.backends[next_index].name(),
                    "backend exhausted, failing over"
                );
                sleep(delay).await;
                backend_index = next_index;
                attempt = 0;
            }
            NextStep::GiveUp { cursor } => {
                ctx.cursor.store(cursor, Ordering::SeqCst);
                let reason = FailureReason::RetriesExhausted { attempts: total };
                return DeliveryState {
                    outcome: DeliveryOutcome::Failed,
                    attempts: total,
                    last_backend: Some(backend.name().to_string()),
                    last_error: Some(format!("{reason} (last: {last_error})")),
                    last_updated_secs: now_secs(),
                };
            }
        }
    }
}

/// Keep the in-flight message's detail current while it is retried.
async fn record_progress(
    ctx: &WorkerContext,
    message: &Message,
    attempts: u32,
    backend: &str,
    last_error: &str,
) {
    let state = DeliveryState {
        outcome: DeliveryOutcome::Queued,
        attempts,
        last_backend: Some(backend.to_string()),
        last_error: Some(last_error.to_string()),
        last_updated_secs: now_secs(),
    };
    ctx.status.record_outcome(&message.id, state).await;
}

/// One backend call. A panic inside the backend counts as a transient
/// failure so the worker survives it.
async fn attempt_once(
    backend: &dyn DeliveryBackend,
    message: &Message,
    timeout: Option<Duration>,
) -> AttemptResult {
    let call = AssertUnwindSafe(backend.attempt(message))
        .catch_unwind()
        .map(|caught| caught.unwrap_or_else(|payload| Err(panic_error(&*payload))));
    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(limit)),
        },
        None => call.await,
    };

    match outcome {
        Ok(true) => AttemptResult::Delivered,
        Ok(false) => AttemptResult::Declined,
        Err(err) => AttemptResult::Error(err),
    }
}

fn panic_error(payload: &(dyn Any + Send)) -> BackendError {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string payload".to_string());
    BackendError::Transient(format!("backend panicked: {detail}"))
}
