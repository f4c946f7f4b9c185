//! Message source trait

use crate::{Message, MessageId, SourceError};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// At-least-once message source.
///
/// `poll` may return a message again after it was delivered, until its id has been
/// acknowledged. `ack` is batched.
pub trait Source: Send + Sync + 'static {
    /// Fetch the next messages
    fn poll(&self) -> Result<Vec<Message>, SourceError>;
    /// Acknowledge a batch of identities
    fn ack(&self, ids: &[MessageId]) -> Result<(), SourceError>;
}

/// In-memory source for testing.
///
/// Every poll redelivers all messages that have not been acknowledged yet, in id
/// order. Successful ack batches are recorded for inspection.
pub struct InMemorySource {
    inner: Mutex<SourceState>,
    failing_acks: AtomicU32,
    failing_polls: AtomicU32,
}

#[derive(Default)]
struct SourceState {
    unacked: BTreeMap<MessageId, Message>,
    ack_batches: Vec<Vec<MessageId>>,
    ack_calls: usize,
    deliveries: usize,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SourceState::default()),
            failing_acks: AtomicU32::new(0),
            failing_polls: AtomicU32::new(0),
        }
    }

    /// Create a source preloaded with `messages`
    pub fn with_messages(messages: impl IntoIterator<Item = Message>) -> Self {
        let source = Self::new();
        for message in messages {
            source.publish(message);
        }
        source
    }

    /// Enqueue a message; publishing an id twice replaces the queued copy
    pub fn publish(&self, message: Message) {
        let mut state = self.state();
        state.unacked.insert(message.id, message);
    }

    /// Make the next `count` ack calls fail
    pub fn fail_next_acks(&self, count: u32) {
        self.failing_acks.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` poll calls fail
    pub fn fail_next_polls(&self, count: u32) {
        self.failing_polls.store(count, Ordering::SeqCst);
    }

    /// Successfully acknowledged batches, in order
    pub fn ack_batches(&self) -> Vec<Vec<MessageId>> {
        self.state().ack_batches.clone()
    }

    /// All acknowledged ids, flattened in order
    pub fn acked_ids(&self) -> Vec<MessageId> {
        self.state().ack_batches.iter().flatten().copied().collect()
    }

    /// Number of `ack` calls, successful or not
    pub fn ack_calls(&self) -> usize {
        self.state().ack_calls
    }

    /// Number of messages handed out by `poll`
    pub fn deliveries(&self) -> usize {
        self.state().deliveries
    }

    /// Ids still awaiting acknowledgment
    pub fn unacked_ids(&self) -> Vec<MessageId> {
        self.state().unacked.keys().copied().collect()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SourceState> {
        // State stays consistent across a panicking holder; keep serving
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_injected(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Source for InMemorySource {
    fn poll(&self) -> Result<Vec<Message>, SourceError> {
        if Self::take_injected(&self.failing_polls) {
            return Err(SourceError::Unavailable("injected poll failure".into()));
        }
        let mut state = self.state();
        let batch: Vec<Message> = state.unacked.values().cloned().collect();
        state.deliveries += batch.len();
        Ok(batch)
    }

    fn ack(&self, ids: &[MessageId]) -> Result<(), SourceError> {
        let mut state = self.state();
        state.ack_calls += 1;
        if Self::take_injected(&self.failing_acks) {
            return Err(SourceError::Unavailable("injected ack failure".into()));
        }
        for id in ids {
            state.unacked.remove(id);
        }
        state.ack_batches.push(ids.to_vec());
        Ok(())
    }
}

impl Default for InMemorySource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redelivers_until_acked() {
        let source = InMemorySource::with_messages([
            Message::new(1, vec![1]),
            Message::new(2, vec![2]),
        ]);

        assert_eq!(source.poll().unwrap().len(), 2);
        assert_eq!(source.poll().unwrap().len(), 2);

        source.ack(&[MessageId(1)]).unwrap();
        let remaining = source.poll().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, MessageId(2));
        assert_eq!(source.deliveries(), 5);
    }

    #[test]
    fn test_failed_ack_keeps_messages() {
        let source = InMemorySource::with_messages([Message::new(1, vec![])]);
        source.fail_next_acks(1);

        assert!(source.ack(&[MessageId(1)]).is_err());
        assert_eq!(source.unacked_ids(), vec![MessageId(1)]);
        assert!(source.ack_batches().is_empty());

        source.ack(&[MessageId(1)]).unwrap();
        assert!(source.unacked_ids().is_empty());
        assert_eq!(source.ack_calls(), 2);
    }
}
