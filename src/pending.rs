//! Identities whose effect is durable but not yet acknowledged

use crate::MessageId;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

/// Ordered, de-duplicated set of identities awaiting acknowledgment.
///
/// Shared by every pipeline worker (`add`) and the committer (`drain_all`).
/// Both go through one lock, so an `add` racing a drain lands either in the
/// drained batch or in the set afterwards, never in between.
#[derive(Default)]
pub struct PendingCommitSet {
    inner: Mutex<PendingInner>,
}

#[derive(Default)]
struct PendingInner {
    order: Vec<MessageId>,
    members: HashSet<MessageId>,
}

impl PendingCommitSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `id`. Returns `false` if it was already pending.
    pub fn add(&self, id: MessageId) -> bool {
        let mut inner = self.lock();
        if !inner.members.insert(id) {
            return false;
        }
        inner.order.push(id);
        true
    }

    /// Take every pending id in insertion order, leaving the set empty
    pub fn drain_all(&self) -> Vec<MessageId> {
        let mut inner = self.lock();
        inner.members.clear();
        std::mem::take(&mut inner.order)
    }

    /// Put previously drained ids back in front of anything added since,
    /// keeping their order and skipping ids that are pending again
    pub fn requeue(&self, ids: Vec<MessageId>) {
        let mut inner = self.lock();
        let mut restored: Vec<MessageId> = ids
            .into_iter()
            .filter(|id| !inner.members.contains(id))
            .collect();
        // Guard against repeats inside `ids` itself
        let mut seen = HashSet::with_capacity(restored.len());
        restored.retain(|id| seen.insert(*id));

        inner.members.extend(restored.iter().copied());
        restored.append(&mut inner.order);
        inner.order = restored;
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.lock().members.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the pending ids in order
    pub fn snapshot(&self) -> Vec<MessageId> {
        self.lock().order.clone()
    }

    fn lock(&self) -> MutexGuard<'_, PendingInner> {
        // Every mutation leaves `order` and `members` in agreement before it can panic
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
