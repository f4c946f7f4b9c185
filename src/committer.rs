//! Batched acknowledgment of durably processed identities

use crate::{
    CommitError, CommitPolicy, MessageId, NoOpObserver, PendingCommitSet, PipelineObserver,
    PipelineStats, RetryPolicy, Source, SourceError,
};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Successful flush result
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Nothing was pending; the source was not called
    Empty,
    /// These identities were acknowledged in one batch
    Committed(Vec<MessageId>),
}

impl CommitOutcome {
    /// Number of acknowledged identities
    pub fn count(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Committed(ids) => ids.len(),
        }
    }
}

/// Result of [`OffsetCommitter::flush`]
pub type CommitResult = Result<CommitOutcome, CommitError>;

/// Flushes the [`PendingCommitSet`] to the source as batch acknowledgments.
///
/// The committer is the only caller of `drain_all`; concurrent flushes are
/// serialized. A failed acknowledgment puts the drained identities back so the
/// next flush retries them.
pub struct OffsetCommitter {
    source: Arc<dyn Source>,
    pending: Arc<PendingCommitSet>,
    policy: CommitPolicy,
    retry: RetryPolicy,
    observer: Arc<dyn PipelineObserver>,
    stats: Arc<PipelineStats>,
    consecutive_failures: AtomicU32,
    flush_lock: Mutex<()>,
}

impl OffsetCommitter {
    pub fn new(source: Arc<dyn Source>, pending: Arc<PendingCommitSet>) -> Self {
        Self {
            source,
            pending,
            policy: CommitPolicy::default(),
            retry: RetryPolicy::default(),
            observer: Arc::new(NoOpObserver),
            stats: Arc::new(PipelineStats::new()),
            consecutive_failures: AtomicU32::new(0),
            flush_lock: Mutex::new(()),
        }
    }

    pub fn with_policy(mut self, policy: CommitPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_stats(mut self, stats: Arc<PipelineStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn policy(&self) -> &CommitPolicy {
        &self.policy
    }

    pub fn pending(&self) -> &Arc<PendingCommitSet> {
        &self.pending
    }

    /// Failed flushes since the last successful one
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    /// Drain the pending set and acknowledge everything in it with one call
    pub fn flush(&self) -> CommitResult {
        let _flushing = self.flush_lock.lock().unwrap_or_else(|p| p.into_inner());

        let ids = self.pending.drain_all();
        if ids.is_empty() {
            tracing::trace!("No offsets to commit");
            return Ok(CommitOutcome::Empty);
        }

        match self.ack(&ids) {
            Ok(()) => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
                PipelineStats::incr(&self.stats.commits);
                self.stats
                    .acknowledged
                    .fetch_add(ids.len() as u64, Ordering::Relaxed);
                self.observer.on_committed(&ids);
                Ok(CommitOutcome::Committed(ids))
            }
            Err(source) => {
                let error = CommitError::AckFailed {
                    count: ids.len(),
                    source,
                };
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                PipelineStats::incr(&self.stats.commit_failures);
                self.observer.on_commit_failed(&ids, &error, failures);
                self.pending.requeue(ids);
                Err(error)
            }
        }
    }

    /// Call the source, turning a panic into an ordinary ack failure so the
    /// drained ids are requeued
    fn ack(&self, ids: &[MessageId]) -> Result<(), SourceError> {
        panic::catch_unwind(AssertUnwindSafe(|| self.source.ack(ids))).unwrap_or_else(|payload| {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(SourceError::Unavailable(format!("ack panicked: {}", message).into()))
        })
    }

    /// Flush if the size threshold of the policy is reached
    pub fn maybe_flush(&self) -> Option<CommitResult> {
        if self.policy.batch_ready(self.pending.len()) {
            Some(self.flush())
        } else {
            None
        }
    }

    /// [`flush`](Self::flush) on the blocking pool, for callers on the async runtime
    pub async fn flush_async(self: &Arc<Self>) -> CommitResult {
        let committer = Arc::clone(self);
        match tokio::task::spawn_blocking(move || committer.flush()).await {
            Ok(result) => result,
            Err(e) => {
                // Only reachable if the flush was cancelled; ack panics are handled in `flush`
                tracing::error!(error = %e, "Flush task aborted");
                Err(CommitError::Aborted(e.to_string().into()))
            }
        }
    }

    /// Delay before the next interval flush, stretched by consecutive failures
    fn next_delay(&self, interval: Duration) -> Duration {
        let failures = self.consecutive_failures();
        if failures == 0 {
            interval
        } else {
            self.retry.delay_for_attempt(failures).max(interval)
        }
    }

    /// Start the background flush task.
    ///
    /// Flushes every `flush_interval` of the policy; returns `None` when the policy
    /// has no interval. Abort the returned handle to stop it.
    pub fn spawn_interval_flush(self: Arc<Self>) -> Option<tokio::task::JoinHandle<()>> {
        let interval = self.policy.flush_interval()?;

        Some(tokio::spawn(async move {
            tracing::info!(
                flush_interval_ms = interval.as_millis() as u64,
                "Offset committer background task started"
            );

            loop {
                tokio::time::sleep(self.next_delay(interval)).await;

                match self.flush_async().await {
                    Ok(CommitOutcome::Committed(ids)) => {
                        tracing::debug!(batch_size = ids.len(), "Interval flush committed");
                    }
                    Ok(CommitOutcome::Empty) => {}
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            retry_in_ms = self.next_delay(interval).as_millis() as u64,
                            "Interval flush failed"
                        );
                    }
                }
            }
        }))
    }
}
