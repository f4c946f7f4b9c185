//! Typestate states for one delivery attempt of a message
//!
//! ```text
//! Arrived ─┬─ Duplicate ───────────────┬─> ReadyToCommit
//!          ├─ Processing ─ Persisted ──┘
//!          └──────────────┴───────────────> Unresolved
//! ```
//!
//! `ReadyToCommit` can only be reached from `Duplicate` (the guard found a stored
//! record) or `Persisted` (which holds the sink's [`PersistAck`]), and that
//! transition is the only place an identity enters the [`PendingCommitSet`].

use crate::{GuardDecision, Message, MessageId, PendingCommitSet, PersistAck, UnresolvedReason};
use std::sync::Arc;
use std::time::Instant;

pub mod markers {
    pub trait DeliveryState: Send + 'static {}
}

// State types
pub struct Arrived;
pub struct Duplicate;
pub struct Processing;
pub struct Persisted {
    pub ack: PersistAck,
}
pub struct ReadyToCommit {
    pub duplicate: bool,
}
pub struct Unresolved {
    pub reason: UnresolvedReason,
}

impl markers::DeliveryState for Arrived {}
impl markers::DeliveryState for Duplicate {}
impl markers::DeliveryState for Processing {}
impl markers::DeliveryState for Persisted {}
impl markers::DeliveryState for ReadyToCommit {}
impl markers::DeliveryState for Unresolved {}

/// One delivery attempt of a message, in state `S`
pub struct Delivery<S: markers::DeliveryState> {
    message: Arc<Message>,
    arrived_at: Instant,
    state: S,
}

impl<S: markers::DeliveryState> Delivery<S> {
    pub fn id(&self) -> MessageId {
        self.message.id
    }

    pub fn message(&self) -> &Arc<Message> {
        &self.message
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    /// Time since the message arrived, reported to the observer on persist
    pub fn elapsed(&self) -> std::time::Duration {
        self.arrived_at.elapsed()
    }

    fn into_state<T: markers::DeliveryState>(self, state: T) -> Delivery<T> {
        Delivery {
            message: self.message,
            arrived_at: self.arrived_at,
            state,
        }
    }
}

/// Where the guard sent an arrived message
pub enum Routed {
    Duplicate(Delivery<Duplicate>),
    Processing(Delivery<Processing>),
}

impl Delivery<Arrived> {
    pub fn arrive(message: Arc<Message>) -> Self {
        Self {
            message,
            arrived_at: Instant::now(),
            state: Arrived,
        }
    }

    /// Apply the guard's decision
    pub fn route(self, decision: GuardDecision) -> Routed {
        match decision {
            GuardDecision::Duplicate => Routed::Duplicate(self.into_state(Duplicate)),
            GuardDecision::New => Routed::Processing(self.into_state(Processing)),
        }
    }

    /// The duplicate check itself failed
    pub fn fail(self, reason: UnresolvedReason) -> Delivery<Unresolved> {
        self.into_state(Unresolved { reason })
    }
}

impl Delivery<Duplicate> {
    /// Queue the already-durable identity for acknowledgment
    pub fn mark_ready(self, pending: &PendingCommitSet) -> Delivery<ReadyToCommit> {
        pending.add(self.id());
        self.into_state(ReadyToCommit { duplicate: true })
    }
}

impl Delivery<Processing> {
    /// The sink confirmed the record is durable
    pub fn persisted(self, ack: PersistAck) -> Delivery<Persisted> {
        debug_assert_eq!(ack.id(), self.id());
        self.into_state(Persisted { ack })
    }

    /// Transform or persist failed; the attempt ends without acknowledgment
    pub fn fail(self, reason: UnresolvedReason) -> Delivery<Unresolved> {
        self.into_state(Unresolved { reason })
    }
}

impl Delivery<Persisted> {
    /// Queue the persisted identity for acknowledgment
    pub fn mark_ready(self, pending: &PendingCommitSet) -> Delivery<ReadyToCommit> {
        pending.add(self.id());
        self.into_state(ReadyToCommit { duplicate: false })
    }
}

/// Terminal outcome of one delivery attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Durable and queued for acknowledgment
    ReadyToCommit { id: MessageId, duplicate: bool },
    /// Not acknowledged; the source will redeliver it
    Unresolved { id: MessageId, reason: UnresolvedReason },
}

impl MessageOutcome {
    pub fn id(&self) -> MessageId {
        match self {
            Self::ReadyToCommit { id, .. } | Self::Unresolved { id, .. } => *id,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::ReadyToCommit { .. })
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::ReadyToCommit { duplicate: true, .. })
    }
}

impl From<Delivery<ReadyToCommit>> for MessageOutcome {
    fn from(delivery: Delivery<ReadyToCommit>) -> Self {
        Self::ReadyToCommit {
            id: delivery.id(),
            duplicate: delivery.state.duplicate,
        }
    }
}

impl From<Delivery<Unresolved>> for MessageOutcome {
    fn from(delivery: Delivery<Unresolved>) -> Self {
        Self::Unresolved {
            id: delivery.id(),
            reason: delivery.state.reason,
        }
    }
}
