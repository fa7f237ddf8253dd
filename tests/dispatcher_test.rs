use std::sync::{Arc, Mutex};
use std::time::Duration;

use message_dispatcher::{
    async_trait, BackendError, ConfigError, DeliveryBackend, DeliveryOutcome, DispatchError,
    Dispatcher, DispatcherConfig, Message, MessageId, RateConfig, RotationPolicy,
};
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Call {
    backend: String,
    id: MessageId,
    body: String,
    at: Instant,
}

type CallLog = Arc<Mutex<Vec<Call>>>;

#[derive(Clone, Copy)]
enum Behavior {
    Succeed,
    Decline,
    Error,
    /// Fail this many calls, then succeed.
    FailFirst(usize),
    /// Never answer within any reasonable timeout.
    Hang,
    /// Panic inside the call.
    Panic,
}

struct ScriptedBackend {
    name: String,
    behavior: Behavior,
    log: CallLog,
    gate: Option<Arc<Gate>>,
}

/// Holds a backend call open until released.
#[derive(Default)]
struct Gate {
    entered: Notify,
    release: Notify,
}

impl ScriptedBackend {
    fn new(name: &str, behavior: Behavior, log: &CallLog) -> Arc<dyn DeliveryBackend> {
        Arc::new(Self {
            name: name.to_string(),
            behavior,
            log: log.clone(),
            gate: None,
        })
    }

    fn gated(name: &str, log: &CallLog, gate: Arc<Gate>) -> Arc<dyn DeliveryBackend> {
        Arc::new(Self {
            name: name.to_string(),
            behavior: Behavior::Succeed,
            log: log.clone(),
            gate: Some(gate),
        })
    }

    fn calls_so_far(&self) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.backend == self.name)
            .count()
    }
}

#[async_trait]
impl DeliveryBackend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn attempt(&self, message: &Message) -> Result<bool, BackendError> {
        let previous = self.calls_so_far();
        self.log.lock().unwrap().push(Call {
            backend: self.name.clone(),
            id: message.id.clone(),
            body: message.body.clone(),
            at: Instant::now(),
        });

        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        match self.behavior {
            Behavior::Succeed => Ok(true),
            Behavior::Decline => Ok(false),
            Behavior::Error => Err(BackendError::Transient("connection reset".to_string())),
            Behavior::FailFirst(n) if previous < n => Ok(false),
            Behavior::FailFirst(_) => Ok(true),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(true)
            }
            Behavior::Panic => panic!("backend blew up on {}", message.id),
        }
    }
}

fn config(retry_limit: u32) -> DispatcherConfig {
    DispatcherConfig {
        retry_limit,
        backoff_unit_ms: 10,
        rate: RateConfig::MinIntervalMs(1),
        ..Default::default()
    }
}

fn message(id: &str) -> Message {
    Message::new(id, "ops@example.com", "subject", format!("body of {id}"))
}

fn calls(log: &CallLog) -> Vec<Call> {
    log.lock().unwrap().clone()
}

fn count(log: &CallLog, backend: &str) -> usize {
    calls(log).iter().filter(|c| c.backend == backend).count()
}

#[tokio::test(start_paused = true)]
async fn resubmission_is_reported_duplicate() {
    let log = CallLog::default();
    let dispatcher =
        Dispatcher::new(config(3), vec![ScriptedBackend::new("b1", Behavior::Succeed, &log)]).unwrap();

    let first = dispatcher.submit(message("a")).await.unwrap();
    let second = dispatcher.submit(message("a")).await.unwrap();
    assert_eq!(first.outcome, DeliveryOutcome::Queued);
    assert_eq!(second.outcome, DeliveryOutcome::Duplicate);
    assert_eq!(second.id, MessageId::new("a"));

    dispatcher.flush().await;
    assert_eq!(count(&log, "b1"), 1);
    assert_eq!(dispatcher.status(&MessageId::new("a")).await, DeliveryOutcome::Sent);
}

#[tokio::test(start_paused = true)]
async fn duplicate_payload_never_reaches_a_backend() {
    let log = CallLog::default();
    let dispatcher =
        Dispatcher::new(config(3), vec![ScriptedBackend::new("b1", Behavior::Succeed, &log)]).unwrap();

    dispatcher
        .submit(Message::new("x", "a@example.com", "s", "first"))
        .await
        .unwrap();
    let receipt = dispatcher
        .submit(Message::new("x", "b@example.com", "s", "second"))
        .await
        .unwrap();
    assert_eq!(receipt.outcome, DeliveryOutcome::Duplicate);

    dispatcher.flush().await;
    let bodies: Vec<_> = calls(&log).into_iter().map(|c| c.body).collect();
    assert_eq!(bodies, vec!["first"]);
}

#[tokio::test(start_paused = true)]
async fn failed_message_still_blocks_resubmission() {
    let log = CallLog::default();
    let dispatcher =
        Dispatcher::new(config(1), vec![ScriptedBackend::new("b1", Behavior::Decline, &log)]).unwrap();

    dispatcher.submit(message("a")).await.unwrap();
    dispatcher.flush().await;
    assert_eq!(dispatcher.status(&MessageId::new("a")).await, DeliveryOutcome::Failed);

    let again = dispatcher.submit(message("a")).await.unwrap();
    assert_eq!(again.outcome, DeliveryOutcome::Duplicate);
    dispatcher.flush().await;
    assert_eq!(count(&log, "b1"), 1);
    assert_eq!(dispatcher.status(&MessageId::new("a")).await, DeliveryOutcome::Failed);
}

#[tokio::test(start_paused = true)]
async fn status_progresses_from_unknown_to_sent() {
    let log = CallLog::default();
    let dispatcher =
        Dispatcher::new(config(3), vec![ScriptedBackend::new("b1", Behavior::Succeed, &log)]).unwrap();
    let id = MessageId::new("m1");

    assert_eq!(dispatcher.status(&id).await, DeliveryOutcome::Unknown);

    dispatcher.submit(message("m1")).await.unwrap();
    assert_eq!(dispatcher.status(&id).await, DeliveryOutcome::Queued);

    dispatcher.flush().await;
    assert_eq!(dispatcher.status(&id).await, DeliveryOutcome::Sent);

    let state = dispatcher.delivery_state(&id).await.unwrap();
    assert_eq!(state.attempts, 1);
    assert_eq!(state.last_backend.as_deref(), Some("b1"));
    assert_eq!(state.last_error, None);
}

#[tokio::test(start_paused = true)]
async fn fails_over_to_second_backend() {
    let log = CallLog::default();
    let dispatcher = Dispatcher::new(
        config(2),
        vec![
            ScriptedBackend::new("b1", Behavior::Decline, &log),
            ScriptedBackend::new("b2", Behavior::Succeed, &log),
        ],
    )
    .unwrap();

    dispatcher.submit(message("m1")).await.unwrap();
    dispatcher.flush().await;

    let order: Vec<_> = calls(&log).into_iter().map(|c| c.backend).collect();
    assert_eq!(order, vec!["b1", "b1", "b2"]);
    assert_eq!(dispatcher.status(&MessageId::new("m1")).await, DeliveryOutcome::Sent);
    assert_eq!(dispatcher.delivery_state(&MessageId::new("m1")).await.unwrap().attempts, 3);
}

#[tokio::test(start_paused = true)]
async fn single_failing_backend_gives_up_after_retry_limit() {
    let log = CallLog::default();
    let dispatcher =
        Dispatcher::new(config(3), vec![ScriptedBackend::new("b1", Behavior::Decline, &log)]).unwrap();

    dispatcher.submit(message("m1")).await.unwrap();
    dispatcher.flush().await;

    assert_eq!(count(&log, "b1"), 3);
    let state = dispatcher.delivery_state(&MessageId::new("m1")).await.unwrap();
    assert_eq!(state.outcome, DeliveryOutcome::Failed);
    assert_eq!(state.attempts, 3);
    assert!(state.last_error.unwrap().contains("retries exhausted after 3 attempts"));
}

#[tokio::test(start_paused = true)]
async fn bounded_rotation_caps_total_calls() {
    let log = CallLog::default();
    let dispatcher = Dispatcher::new(
        config(2),
        vec![
            ScriptedBackend::new("b1", Behavior::Decline, &log),
            ScriptedBackend::new("b2", Behavior::Error, &log),
            ScriptedBackend::new("b3", Behavior::Decline, &log),
        ],
    )
    .unwrap();

    dispatcher.submit(message("m1")).await.unwrap();
    dispatcher.flush().await;

    assert_eq!(calls(&log).len(), 6);
    for backend in ["b1", "b2", "b3"] {
        assert_eq!(count(&log, backend), 2);
    }
    assert_eq!(dispatcher.status(&MessageId::new("m1")).await, DeliveryOutcome::Failed);
    // A full rotation brings the cursor back where it started.
    assert_eq!(dispatcher.active_backend(), 0);
}

#[tokio::test(start_paused = true)]
async fn unbounded_rotation_stops_at_cap() {
    let log = CallLog::default();
    let dispatcher = Dispatcher::new(
        DispatcherConfig {
            rotation: RotationPolicy::Unbounded { max_total_attempts: 5 },
            ..config(1)
        },
        vec![
            ScriptedBackend::new("b1", Behavior::Decline, &log),
            ScriptedBackend::new("b2", Behavior::Decline, &log),
        ],
    )
    .unwrap();

    dispatcher.submit(message("m1")).await.unwrap();
    dispatcher.flush().await;

    let order: Vec<_> = calls(&log).into_iter().map(|c| c.backend).collect();
    assert_eq!(order, vec!["b1", "b2", "b1", "b2", "b1"]);
    assert_eq!(dispatcher.status(&MessageId::new("m1")).await, DeliveryOutcome::Failed);
}

#[tokio::test(start_paused = true)]
async fn unbounded_rotation_succeeds_on_later_cycle() {
    let log = CallLog::default();
    let dispatcher = Dispatcher::new(
        DispatcherConfig {
            rotation: RotationPolicy::Unbounded { max_total_attempts: 10 },
            ..config(1)
        },
        vec![
            ScriptedBackend::new("b1", Behavior::Decline, &log),
            ScriptedBackend::new("b2", Behavior::FailFirst(2), &log),
        ],
    )
    .unwrap();

    dispatcher.submit(message("m1")).await.unwrap();
    dispatcher.flush().await;

    assert_eq!(calls(&log).len(), 6);
    assert_eq!(dispatcher.status(&MessageId::new("m1")).await, DeliveryOutcome::Sent);
}

#[tokio::test(start_paused = true)]
async fn dispatches_in_submission_order() {
    let log = CallLog::default();
    let dispatcher =
        Dispatcher::new(config(2), vec![ScriptedBackend::new("b1", Behavior::FailFirst(1), &log)]).unwrap();

    for id in ["a", "b", "c", "d"] {
        dispatcher.submit(message(id)).await.unwrap();
    }
    dispatcher.flush().await;

    let calls = calls(&log);
    let ids: Vec<_> = calls.iter().map(|c| c.id.as_str()).collect();
    // "a" is retried once before "b" starts.
    assert_eq!(ids, vec!["a", "a", "b", "c", "d"]);
    assert!(calls.windows(2).all(|w| w[0].at <= w[1].at));
}

#[tokio::test(start_paused = true)]
async fn backoff_grows_exponentially_between_attempts() {
    let log = CallLog::default();
    let dispatcher = Dispatcher::new(
        DispatcherConfig {
            backoff_unit_ms: 100,
            backoff_factor: 2.0,
            ..config(4)
        },
        vec![ScriptedBackend::new("b1", Behavior::Decline, &log)],
    )
    .unwrap();

    dispatcher.submit(message("m1")).await.unwrap();
    dispatcher.flush().await;

    let stamps: Vec<_> = calls(&log).into_iter().map(|c| c.at).collect();
    let gaps: Vec<_> = stamps.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(
        gaps,
        vec![
            Duration::from_millis(200),
            Duration::from_millis(400),
            Duration::from_millis(800),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn dispatches_are_spaced_by_min_interval() {
    let log = CallLog::default();
    let dispatcher = Dispatcher::new(
        DispatcherConfig {
            rate: RateConfig::MinIntervalMs(100),
            ..config(1)
        },
        vec![ScriptedBackend::new("b1", Behavior::Succeed, &log)],
    )
    .unwrap();

    for i in 0..5 {
        dispatcher.submit(message(&format!("m{i}"))).await.unwrap();
    }
    dispatcher.flush().await;

    let calls = calls(&log);
    assert_eq!(calls.len(), 5);
    for pair in calls.windows(2) {
        assert!(pair[1].at - pair[0].at >= Duration::from_millis(100));
    }
}

#[tokio::test(start_paused = true)]
async fn rate_limit_applies_per_message_not_per_attempt() {
    let log = CallLog::default();
    let dispatcher = Dispatcher::new(
        DispatcherConfig {
            rate: RateConfig::MinIntervalMs(10_000),
            backoff_unit_ms: 10,
            ..config(3)
        },
        vec![ScriptedBackend::new("b1", Behavior::FailFirst(2), &log)],
    )
    .unwrap();

    dispatcher.submit(message("m1")).await.unwrap();
    dispatcher.flush().await;

    let calls = calls(&log);
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[2].at - calls[0].at, Duration::from_millis(20 + 40));
}

#[tokio::test(start_paused = true)]
async fn failover_cursor_persists_across_messages() {
    let log = CallLog::default();
    let dispatcher = Dispatcher::new(
        config(1),
        vec![
            ScriptedBackend::new("b1", Behavior::Decline, &log),
            ScriptedBackend::new("b2", Behavior::Succeed, &log),
        ],
    )
    .unwrap();

    dispatcher.submit(message("m1")).await.unwrap();
    dispatcher.submit(message("m2")).await.unwrap();
    dispatcher.flush().await;

    let order: Vec<_> = calls(&log)
        .into_iter()
        .map(|c| (c.id.0, c.backend))
        .collect();
    assert_eq!(
        order,
        vec![
            ("m1".to_string(), "b1".to_string()),
            ("m1".to_string(), "b2".to_string()),
            ("m2".to_string(), "b2".to_string()),
        ]
    );
    assert_eq!(dispatcher.active_backend(), 1);
}

#[tokio::test(start_paused = true)]
async fn transient_errors_are_retried_and_recorded() {
    let log = CallLog::default();
    let dispatcher = Dispatcher::new(
        config(2),
        vec![
            ScriptedBackend::new("flaky", Behavior::Error, &log),
            ScriptedBackend::new("steady", Behavior::Succeed, &log),
        ],
    )
    .unwrap();

    dispatcher.submit(message("m1")).await.unwrap();
    dispatcher.flush().await;

    let state = dispatcher.delivery_state(&MessageId::new("m1")).await.unwrap();
    assert_eq!(state.outcome, DeliveryOutcome::Sent);
    assert_eq!(state.attempts, 3);
    assert_eq!(state.last_backend.as_deref(), Some("steady"));
    assert_eq!(
        state.last_error.as_deref(),
        Some("transient delivery error: connection reset")
    );
}

#[tokio::test(start_paused = true)]
async fn slow_backend_times_out() {
    let log = CallLog::default();
    let dispatcher = Dispatcher::new(
        DispatcherConfig {
            attempt_timeout_ms: Some(1_000),
            ..config(1)
        },
        vec![
            ScriptedBackend::new("slow", Behavior::Hang, &log),
            ScriptedBackend::new("fast", Behavior::Succeed, &log),
        ],
    )
    .unwrap();

    dispatcher.submit(message("m1")).await.unwrap();
    dispatcher.flush().await;

    let calls = calls(&log);
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].backend, "fast");
    assert_eq!(calls[1].at - calls[0].at, Duration::from_millis(1_000 + 20));
    assert_eq!(dispatcher.status(&MessageId::new("m1")).await, DeliveryOutcome::Sent);
}

#[tokio::test(start_paused = true)]
async fn in_flight_message_stays_pending_and_queued() {
    let log = CallLog::default();
    let gate = Arc::new(Gate::default());
    let dispatcher =
        Dispatcher::new(config(1), vec![ScriptedBackend::gated("b1", &log, gate.clone())]).unwrap();

    dispatcher.submit(message("a")).await.unwrap();
    dispatcher.submit(message("b")).await.unwrap();
    gate.entered.notified().await;

    assert_eq!(dispatcher.pending().await, vec![MessageId::new("a"), MessageId::new("b")]);
    assert_eq!(dispatcher.status(&MessageId::new("a")).await, DeliveryOutcome::Queued);
    assert_eq!(dispatcher.status(&MessageId::new("b")).await, DeliveryOutcome::Queued);

    gate.release.notify_one();
    gate.entered.notified().await;
    assert_eq!(dispatcher.pending().await, vec![MessageId::new("b")]);
    assert_eq!(dispatcher.status(&MessageId::new("a")).await, DeliveryOutcome::Sent);

    gate.release.notify_one();
    dispatcher.flush().await;
    assert_eq!(dispatcher.pending_len().await, 0);
    assert_eq!(dispatcher.status_all().await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn idle_worker_rearms_on_new_submission() {
    let log = CallLog::default();
    let dispatcher =
        Dispatcher::new(config(1), vec![ScriptedBackend::new("b1", Behavior::Succeed, &log)]).unwrap();

    dispatcher.submit(message("a")).await.unwrap();
    dispatcher.flush().await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    dispatcher.submit(message("b")).await.unwrap();
    dispatcher.flush().await;

    assert_eq!(count(&log, "b1"), 2);
    assert_eq!(dispatcher.status(&MessageId::new("b")).await, DeliveryOutcome::Sent);
}

#[tokio::test(start_paused = true)]
async fn shutdown_drains_queue_then_rejects() {
    let log = CallLog::default();
    let mut dispatcher =
        Dispatcher::new(config(1), vec![ScriptedBackend::new("b1", Behavior::Succeed, &log)]).unwrap();

    for id in ["a", "b", "c"] {
        dispatcher.submit(message(id)).await.unwrap();
    }
    dispatcher.shutdown().await;

    assert!(!dispatcher.is_running());
    assert_eq!(count(&log, "b1"), 3);
    assert_eq!(dispatcher.submit(message("d")).await, Err(DispatchError::Shutdown));
    assert_eq!(dispatcher.status(&MessageId::new("d")).await, DeliveryOutcome::Unknown);
}

#[tokio::test(start_paused = true)]
async fn panicking_backend_counts_as_failed_attempt() {
    let log = CallLog::default();
    let dispatcher = Dispatcher::new(
        config(1),
        vec![
            ScriptedBackend::new("broken", Behavior::Panic, &log),
            ScriptedBackend::new("steady", Behavior::Succeed, &log),
        ],
    )
    .unwrap();

    dispatcher.submit(message("bad")).await.unwrap();
    let good = dispatcher.submit(message("good")).await.unwrap();
    assert_eq!(good.outcome, DeliveryOutcome::Queued);

    tokio::time::timeout(Duration::from_secs(3600), dispatcher.flush())
        .await
        .expect("worker stalled after a backend panic");

    let bad = dispatcher.delivery_state(&MessageId::new("bad")).await.unwrap();
    assert_eq!(bad.outcome, DeliveryOutcome::Sent);
    assert_eq!(bad.attempts, 2);
    assert_eq!(
        bad.last_error.as_deref(),
        Some("transient delivery error: backend panicked: backend blew up on bad")
    );
    assert!(dispatcher.status(&MessageId::new("good")).await.is_terminal());
    assert!(dispatcher.is_running());
}

#[tokio::test(start_paused = true)]
async fn panics_on_every_backend_fail_the_message() {
    let log = CallLog::default();
    let dispatcher =
        Dispatcher::new(config(2), vec![ScriptedBackend::new("broken", Behavior::Panic, &log)]).unwrap();

    dispatcher.submit(message("a")).await.unwrap();
    dispatcher.submit(message("b")).await.unwrap();
    dispatcher.flush().await;

    assert_eq!(count(&log, "broken"), 4);
    for id in ["a", "b"] {
        let outcome = dispatcher.status(&MessageId::new(id)).await;
        assert_eq!(outcome, DeliveryOutcome::Failed);
        assert!(outcome.is_terminal());
    }
    assert!(!DeliveryOutcome::Queued.is_terminal());
}

#[tokio::test]
async fn rejects_invalid_configuration() {
    let log = CallLog::default();
    let backend: Arc<dyn DeliveryBackend> = ScriptedBackend::new("b1", Behavior::Succeed, &log);

    assert_eq!(
        Dispatcher::new(DispatcherConfig::default(), Vec::new()).err(),
        Some(ConfigError::NoBackends)
    );
    assert_eq!(
        Dispatcher::new(config(0), vec![backend.clone()]).err(),
        Some(ConfigError::InvalidRetryLimit(0))
    );
    assert_eq!(
        Dispatcher::new(
            DispatcherConfig {
                rate: RateConfig::PerSecond(-1.0),
                ..Default::default()
            },
            vec![backend.clone()],
        )
        .err(),
        Some(ConfigError::InvalidRate(-1.0))
    );
    assert_eq!(
        Dispatcher::new(
            DispatcherConfig {
                rate: RateConfig::PerSecond(1e-20),
                ..Default::default()
            },
            vec![backend.clone()],
        )
        .err(),
        Some(ConfigError::InvalidRate(1e-20))
    );
    assert_eq!(
        Dispatcher::new(
            DispatcherConfig {
                attempt_timeout_ms: Some(0),
                ..Default::default()
            },
            vec![backend.clone()],
        )
        .err(),
        Some(ConfigError::InvalidAttemptTimeout)
    );

    let dispatcher = Dispatcher::new(config(2), vec![backend]).unwrap();
    assert_eq!(dispatcher.config(), &config(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submissions_of_one_id_queue_once() {
    let log = CallLog::default();
    let dispatcher = Arc::new(
        Dispatcher::new(config(1), vec![ScriptedBackend::new("b1", Behavior::Succeed, &log)]).unwrap(),
    );

    let mut handles = Vec::new();
    for i in 0..16 {
        let dispatcher = dispatcher.clone();
        handles.push(tokio::spawn(async move {
            dispatcher
                .submit(Message::new("shared", "ops@example.com", "s", format!("copy {i}")))
                .await
                .unwrap()
                .outcome
        }));
    }

    let mut queued = 0;
    for handle in handles {
        if handle.await.unwrap() == DeliveryOutcome::Queued {
            queued += 1;
        }
    }
    assert_eq!(queued, 1);

    dispatcher.flush().await;
    assert_eq!(count(&log, "b1"), 1);
}
