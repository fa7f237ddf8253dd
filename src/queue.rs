use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::types::{Message, MessageId};

/// A queued message with the time it was accepted.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub message: Arc<Message>,
    pub enqueued_at: Instant,
}

/// Strict FIFO holding area for messages awaiting dispatch.
///
/// Producers append with [`enqueue`](Self::enqueue), which never blocks on
/// capacity. The single consumer reads the head with [`head`](Self::head)
/// and removes it with [`complete_head`](Self::complete_head) only once
/// its delivery has resolved, so the in-flight message stays visible in
/// [`list`](Self::list).
#[derive(Debug, Default)]
pub struct DeliveryQueue {
    entries: Mutex<VecDeque<QueueEntry>>,
    ready: Notify,
}

impl DeliveryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the tail and wake the consumer if it is idle.
    pub async fn enqueue(&self, message: Arc<Message>) {
        let entry = QueueEntry {
            message,
            enqueued_at: Instant::now(),
        };
        self.entries.lock().await.push_back(entry);
        self.ready.notify_one();
    }

    /// Current head, without removing it.
    pub async fn head(&self) -> Option<QueueEntry> {
        self.entries.lock().await.front().cloned()
    }

    /// Remove the head once its dispatch has resolved.
    pub async fn complete_head(&self) -> Option<QueueEntry> {
        self.entries.lock().await.pop_front()
    }

    /// Ids currently in the queue, head first.
    pub async fn list(&self) -> Vec<MessageId> {
        self.entries
            .lock()
            .await
            .iter()
            .map(|entry| entry.message.id.clone())
            .collect()
    }

    pub async fn contains(&self, id: &MessageId) -> bool {
        self.entries.lock().await.iter().any(|entry| &entry.message.id == id)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Wait for the next enqueue. A wake-up issued while nobody was
    /// waiting is kept, so an enqueue racing with the consumer going idle
    /// is never lost.
    pub(crate) async fn wait_ready(&self) {
        self.ready.notified().await;
    }

    pub(crate) fn wake(&self) {
        self.ready.notify_one();
    }
}
