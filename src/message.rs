//! Message identity and durable record types

use serde::{Deserialize, Serialize};

/// Idempotency key of a message, stable across redeliveries
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
pub struct MessageId(pub u64);

impl MessageId {
    /// Create a new message ID
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Debug for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MessageId({})", self.0)
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for MessageId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// A message as delivered by the source. Immutable for the duration of one attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Idempotency key
    pub id: MessageId,
    /// Opaque payload handed to the transform
    pub payload: Vec<u8>,
    /// Unit the source orders by (partition, key). `None` shares one default unit.
    pub ordering_key: Option<Box<str>>,
}

impl Message {
    /// Create a message without an ordering key
    pub fn new(id: impl Into<MessageId>, payload: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            payload,
            ordering_key: None,
        }
    }

    /// Attach the ordering key (partition) this message belongs to
    pub fn with_ordering_key(mut self, key: impl Into<Box<str>>) -> Self {
        self.ordering_key = Some(key.into());
        self
    }
}

/// Durable outcome of processing one message. Written once per id, never updated.
#[derive(
    Clone,
    Debug,
    PartialEq,
    Serialize,
    Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
pub struct ProcessingRecord {
    /// Identity of the processed message
    pub id: MessageId,
    /// Transform output
    pub result: Vec<u8>,
    /// Name of the processor that produced the record
    pub producer: String,
    /// Wall-clock time the record was built
    pub recorded_at_millis: u64,
}
