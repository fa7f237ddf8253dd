use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::types::{DeliveryOutcome, DeliveryState, MessageId};

/// Last known lifecycle state per message id.
///
/// Entries are never removed. Only the dispatcher writes; callers read
/// through the dispatcher's query methods.
#[derive(Debug, Default)]
pub struct StatusTable {
    entries: RwLock<HashMap<MessageId, DeliveryState>>,
}

impl StatusTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn record_outcome(&self, id: &MessageId, state: DeliveryState) {
        self.entries.write().await.insert(id.clone(), state);
    }

    /// Outcome for `id`, or `Unknown` if it was never submitted.
    pub async fn lookup(&self, id: &MessageId) -> DeliveryOutcome {
        self.entries
            .read()
            .await
            .get(id)
            .map(|state| state.outcome)
            .unwrap_or(DeliveryOutcome::Unknown)
    }

    pub async fn details(&self, id: &MessageId) -> Option<DeliveryState> {
        self.entries.read().await.get(id).cloned()
    }

    pub async fn snapshot(&self) -> HashMap<MessageId, DeliveryState> {
        self.entries.read().await.clone()
    }
}
