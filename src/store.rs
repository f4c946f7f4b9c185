//! Durable store trait

use crate::{MessageId, ProcessingRecord, StoreError};
use std::sync::atomic::{AtomicU32, Ordering};

/// Storage for processing records.
///
/// `put` must be atomic (readers never observe a partial record) and write-once:
/// a second `put` for an id that already exists leaves the stored record untouched
/// and reports [`PutOutcome::AlreadyPresent`]. A successful return means the record
/// survives a crash.
pub trait DurableStore: Send + Sync + 'static {
    /// Whether a record exists for `id`
    fn exists(&self, id: MessageId) -> Result<bool, StoreError>;
    /// Fetch the record for `id`
    fn get(&self, id: MessageId) -> Result<Option<ProcessingRecord>, StoreError>;
    /// Insert `record` unless a record with the same id is already stored
    fn put(&self, record: ProcessingRecord) -> Result<PutOutcome, StoreError>;
}

/// Result of a write-once insert
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PutOutcome {
    /// The record was written by this call
    Inserted,
    /// A record for the id already existed; nothing was written
    AlreadyPresent,
}

/// In-memory store for testing
pub struct InMemoryStore {
    data: std::sync::RwLock<std::collections::HashMap<MessageId, ProcessingRecord>>,
    failing_puts: AtomicU32,
    failing_reads: AtomicU32,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            data: std::sync::RwLock::new(std::collections::HashMap::new()),
            failing_puts: AtomicU32::new(0),
            failing_reads: AtomicU32::new(0),
        }
    }

    /// Make the next `count` calls to `put` fail with a storage error
    pub fn fail_next_puts(&self, count: u32) {
        self.failing_puts.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` calls to `exists` or `get` fail with a storage error
    pub fn fail_next_reads(&self, count: u32) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.data.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All records ordered by id
    pub fn records(&self) -> Vec<ProcessingRecord> {
        let mut records: Vec<_> = self
            .data
            .read()
            .map(|d| d.values().cloned().collect())
            .unwrap_or_default();
        records.sort_by_key(|r| r.id);
        records
    }

    fn take_injected(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl DurableStore for InMemoryStore {
    fn exists(&self, id: MessageId) -> Result<bool, StoreError> {
        if Self::take_injected(&self.failing_reads) {
            return Err(StoreError::Storage("injected read failure".into()));
        }
        let data = self.data.read().map_err(|e| StoreError::Storage(e.to_string().into()))?;
        Ok(data.contains_key(&id))
    }

    fn get(&self, id: MessageId) -> Result<Option<ProcessingRecord>, StoreError> {
        if Self::take_injected(&self.failing_reads) {
            return Err(StoreError::Storage("injected read failure".into()));
        }
        let data = self.data.read().map_err(|e| StoreError::Storage(e.to_string().into()))?;
        Ok(data.get(&id).cloned())
    }

    fn put(&self, record: ProcessingRecord) -> Result<PutOutcome, StoreError> {
        if Self::take_injected(&self.failing_puts) {
            return Err(StoreError::Storage("injected write failure".into()));
        }

        let mut data = self.data.write().map_err(|e| StoreError::Storage(e.to_string().into()))?;
        match data.entry(record.id) {
            std::collections::hash_map::Entry::Occupied(_) => Ok(PutOutcome::AlreadyPresent),
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(PutOutcome::Inserted)
            }
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u64, result: &[u8]) -> ProcessingRecord {
        ProcessingRecord {
            id: MessageId(id),
            result: result.to_vec(),
            producer: "test".into(),
            recorded_at_millis: 1,
        }
    }

    #[test]
    fn test_put_is_write_once() {
        let store = InMemoryStore::new();
        assert_eq!(store.put(record(1, b"first")).unwrap(), PutOutcome::Inserted);
        assert_eq!(store.put(record(1, b"second")).unwrap(), PutOutcome::AlreadyPresent);

        let stored = store.get(MessageId(1)).unwrap().unwrap();
        assert_eq!(stored.result, b"first".to_vec());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_exists_and_get_missing() {
        let store = InMemoryStore::new();
        assert!(!store.exists(MessageId(9)).unwrap());
        assert!(store.get(MessageId(9)).unwrap().is_none());
        store.put(record(9, b"x")).unwrap();
        assert!(store.exists(MessageId(9)).unwrap());
    }

    #[test]
    fn test_injected_put_failures() {
        let store = InMemoryStore::new();
        store.fail_next_puts(1);
        assert!(store.put(record(1, b"x")).is_err());
        assert!(!store.exists(MessageId(1)).unwrap());
        assert_eq!(store.put(record(1, b"x")).unwrap(), PutOutcome::Inserted);
    }

    #[test]
    fn test_injected_read_failures() {
        let store = InMemoryStore::new();
        store.put(record(2, b"x")).unwrap();
        store.fail_next_reads(2);

        assert!(matches!(store.exists(MessageId(2)), Err(StoreError::Storage(_))));
        assert!(store.get(MessageId(2)).is_err());
        assert!(store.exists(MessageId(2)).unwrap());
    }
}
