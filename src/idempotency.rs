use std::collections::HashSet;

use tokio::sync::{RwLock, RwLockWriteGuard};

use crate::types::MessageId;

/// Remembers every message id ever accepted. First caller wins.
///
/// Ids are never evicted; they live as long as the dispatcher.
#[derive(Debug, Default)]
pub struct IdempotencyGuard {
    seen: RwLock<HashSet<MessageId>>,
}

/// Write access to the seen-set, held by the submission path so that
/// accepting an id and enqueueing its message happen as one step.
pub(crate) struct AcceptGuard<'a> {
    seen: RwLockWriteGuard<'a, HashSet<MessageId>>,
}

impl AcceptGuard<'_> {
    pub(crate) fn accept(&mut self, id: &MessageId) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        self.seen.insert(id.clone())
    }
}

impl IdempotencyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `id` as seen. Returns `true` only for the first call with a
    /// given id. The check and the insert are one indivisible step.
    pub async fn accept(&self, id: &MessageId) -> bool {
        self.lock().await.accept(id)
    }

    pub async fn is_seen(&self, id: &MessageId) -> bool {
        self.seen.read().await.contains(id)
    }

    pub async fn len(&self) -> usize {
        self.seen.read().await.len()
    }

    pub(crate) async fn lock(&self) -> AcceptGuard<'_> {
        AcceptGuard { seen: self.seen.write().await }
    }
}
