//! Durable sink: the write side of the processing protocol

use crate::{DurableStore, MessageId, PersistError, ProcessingRecord, PutOutcome};
use std::sync::Arc;

/// Proof that a record for an identity is durably stored.
///
/// Only [`DurableSink::persist`] creates one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PersistAck {
    id: MessageId,
    outcome: PutOutcome,
}

impl PersistAck {
    /// Identity the ack covers
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Whether this call wrote the record or found it already stored
    pub fn outcome(&self) -> PutOutcome {
        self.outcome
    }
}

/// Persists transform results as write-once [`ProcessingRecord`]s
#[derive(Clone)]
pub struct DurableSink {
    store: Arc<dyn DurableStore>,
    producer: Box<str>,
    clock: fn() -> u64,
}

impl DurableSink {
    /// Create a sink stamping records with `producer`
    pub fn new(store: Arc<dyn DurableStore>, producer: impl Into<Box<str>>) -> Self {
        Self {
            store,
            producer: producer.into(),
            clock: system_clock,
        }
    }

    /// Replace the wall clock used for `recorded_at_millis`
    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    pub fn producer(&self) -> &str {
        &self.producer
    }

    /// Store `result` for `id`.
    ///
    /// Persisting an id that is already stored is a no-op and still succeeds.
    pub fn persist(&self, id: MessageId, result: Vec<u8>) -> Result<PersistAck, PersistError> {
        let record = ProcessingRecord {
            id,
            result,
            producer: self.producer.to_string(),
            recorded_at_millis: (self.clock)(),
        };

        let outcome = self.store.put(record)?;
        if outcome == PutOutcome::AlreadyPresent {
            tracing::debug!(message_id = %id, "Record already stored, persist is a no-op");
        }
        Ok(PersistAck { id, outcome })
    }
}

fn system_clock() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryStore, StoreError};

    #[test]
    fn test_persist_stamps_record() {
        let store = Arc::new(InMemoryStore::new());
        let sink = DurableSink::new(store.clone(), "FinancialTradeEngine").with_clock(|| 1234);

        let ack = sink.persist(MessageId(1), vec![1, 2]).unwrap();
        assert_eq!(ack.id(), MessageId(1));
        assert_eq!(ack.outcome(), PutOutcome::Inserted);

        let record = store.get(MessageId(1)).unwrap().unwrap();
        assert_eq!(record.producer, "FinancialTradeEngine");
        assert_eq!(record.recorded_at_millis, 1234);
        assert_eq!(record.result, vec![1, 2]);
    }

    #[test]
    fn test_repeat_persist_is_noop() {
        let store = Arc::new(InMemoryStore::new());
        let sink = DurableSink::new(store.clone(), "p");

        sink.persist(MessageId(1), vec![1]).unwrap();
        let ack = sink.persist(MessageId(1), vec![1]).unwrap();
        assert_eq!(ack.outcome(), PutOutcome::AlreadyPresent);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_store_failure_is_persist_error() {
        let store = Arc::new(InMemoryStore::new());
        store.fail_next_puts(1);
        let sink = DurableSink::new(store, "p");

        let err = sink.persist(MessageId(1), vec![]).unwrap_err();
        assert!(matches!(err, PersistError::Store(StoreError::Storage(_))));
    }
}
