use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use message_dispatcher::{
    async_trait, BackendError, DeliveryBackend, Dispatcher, DispatcherConfig, Message, RateConfig,
};

/// Fails every other call, to show retries and failover in the logs.
struct Flaky {
    calls: AtomicUsize,
}

#[async_trait]
impl DeliveryBackend for Flaky {
    fn name(&self) -> &str {
        "flaky-smtp"
    }

    async fn attempt(&self, _message: &Message) -> Result<bool, BackendError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
            Err(BackendError::Transient("421 service not available".to_string()))
        } else {
            Ok(true)
        }
    }
}

struct Console;

#[async_trait]
impl DeliveryBackend for Console {
    fn name(&self) -> &str {
        "console"
    }

    async fn attempt(&self, message: &Message) -> Result<bool, BackendError> {
        println!("[console] to={} subject={:?}", message.recipient, message.subject);
        Ok(true)
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter("message_dispatcher=debug")
        .init();

    let config = DispatcherConfig {
        retry_limit: 1,
        backoff_unit_ms: 50,
        rate: RateConfig::PerSecond(20.0),
        ..Default::default()
    };
    let backends: Vec<Arc<dyn DeliveryBackend>> = vec![
        Arc::new(Flaky { calls: AtomicUsize::new(0) }),
        Arc::new(Console),
    ];

    let mut dispatcher = match Dispatcher::new(config, backends) {
        Ok(dispatcher) => dispatcher,
        Err(err) => {
            eprintln!("invalid configuration: {err}");
            return;
        }
    };

    for i in 0..4 {
        let message = Message::new(format!("order-{i}"), "ops@example.com", "order shipped", "...")
            .with_metadata("tenant", "tenant_a");
        if let Ok(receipt) = dispatcher.submit(message).await {
            println!("{} -> {}", receipt.id, receipt.outcome);
        }
    }

    let again = dispatcher
        .submit(Message::new("order-0", "ops@example.com", "order shipped", "resend"))
        .await;
    if let Ok(receipt) = again {
        println!("{} -> {}", receipt.id, receipt.outcome);
    }

    dispatcher.flush().await;
    let mut statuses: Vec<_> = dispatcher.status_all().await.into_iter().collect();
    statuses.sort_by(|a, b| a.0.cmp(&b.0));
    for (id, state) in statuses {
        println!("{id}: {} after {} attempt(s)", state.outcome, state.attempts);
    }

    dispatcher.shutdown().await;
}
