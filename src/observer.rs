//! Pipeline observer trait

use crate::{CommitError, MessageId, PutOutcome, UnresolvedReason};

/// Observer trait for external observability.
///
/// One callback per message state transition plus the committer's outcomes.
/// Callbacks run inline on the pipeline task and should not block.
pub trait PipelineObserver: Send + Sync + 'static {
    fn on_arrived(&self, id: MessageId);
    fn on_duplicate(&self, id: MessageId);
    fn on_persisted(&self, id: MessageId, outcome: PutOutcome, duration_millis: u64);
    fn on_unresolved(&self, id: MessageId, reason: &UnresolvedReason);
    fn on_committed(&self, ids: &[MessageId]);
    fn on_commit_failed(&self, ids: &[MessageId], error: &CommitError, consecutive_failures: u32);
}

/// No-op observer
pub struct NoOpObserver;

impl PipelineObserver for NoOpObserver {
    fn on_arrived(&self, _id: MessageId) {}
    fn on_duplicate(&self, _id: MessageId) {}
    fn on_persisted(&self, _id: MessageId, _outcome: PutOutcome, _duration_millis: u64) {}
    fn on_unresolved(&self, _id: MessageId, _reason: &UnresolvedReason) {}
    fn on_committed(&self, _ids: &[MessageId]) {}
    fn on_commit_failed(&self, _ids: &[MessageId], _error: &CommitError, _consecutive_failures: u32) {}
}

/// Tracing-based observer
pub struct TracingObserver;

impl PipelineObserver for TracingObserver {
    fn on_arrived(&self, id: MessageId) {
        tracing::debug!(message_id = %id, "Message arrived");
    }

    fn on_duplicate(&self, id: MessageId) {
        tracing::debug!(message_id = %id, "Duplicate message, marking for commit");
    }

    fn on_persisted(&self, id: MessageId, outcome: PutOutcome, duration_millis: u64) {
        tracing::info!(message_id = %id, outcome = ?outcome, duration_ms = duration_millis, "Message persisted");
    }

    fn on_unresolved(&self, id: MessageId, reason: &UnresolvedReason) {
        if reason.is_storage_fault() {
            tracing::error!(message_id = %id, stage = %reason.stage(), error = %reason, "Message unresolved, storage failure");
        } else {
            tracing::warn!(message_id = %id, stage = %reason.stage(), error = %reason, "Message unresolved, awaiting redelivery");
        }
    }

    fn on_committed(&self, ids: &[MessageId]) {
        tracing::info!(batch_size = ids.len(), ids = ?ids, "Offsets committed");
    }

    fn on_commit_failed(&self, ids: &[MessageId], error: &CommitError, consecutive_failures: u32) {
        tracing::error!(
            batch_size = ids.len(),
            consecutive_failures,
            error = %error,
            "Offset commit failed, batch requeued"
        );
    }
}
