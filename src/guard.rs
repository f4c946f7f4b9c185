//! Duplicate detection against the durable store

use crate::{DurableStore, MessageId, ProcessingRecord, StoreError};
use std::sync::Arc;

/// Outcome of a duplicate check
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuardDecision {
    /// A record already exists; skip the work and acknowledge
    Duplicate,
    /// No record yet; process the message
    New,
}

/// Checks whether a message identity has already been durably processed.
///
/// The guard only reads. Records are written by [`DurableSink`](crate::DurableSink),
/// so a `Duplicate` answer always means the effect is already durable.
#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn DurableStore>,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self { store }
    }

    /// Classify `id` as duplicate or new
    pub fn check(&self, id: MessageId) -> Result<GuardDecision, StoreError> {
        if self.store.exists(id)? {
            tracing::debug!(message_id = %id, "Message already processed");
            Ok(GuardDecision::Duplicate)
        } else {
            Ok(GuardDecision::New)
        }
    }

    /// Stored record for `id`, if any
    pub fn record(&self, id: MessageId) -> Result<Option<ProcessingRecord>, StoreError> {
        self.store.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryStore;

    #[test]
    fn test_check_reflects_store() {
        let store = Arc::new(InMemoryStore::new());
        let guard = IdempotencyGuard::new(store.clone());

        assert_eq!(guard.check(MessageId(1)).unwrap(), GuardDecision::New);
        assert!(guard.record(MessageId(1)).unwrap().is_none());

        store
            .put(ProcessingRecord {
                id: MessageId(1),
                result: vec![7],
                producer: "p".into(),
                recorded_at_millis: 0,
            })
            .unwrap();

        assert_eq!(guard.check(MessageId(1)).unwrap(), GuardDecision::Duplicate);
        assert_eq!(guard.record(MessageId(1)).unwrap().unwrap().result, vec![7]);
    }
}
