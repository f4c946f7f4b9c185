//! Pipeline orchestrator
//!
//! Drives each message through guard → transform → sink → pending set and hands
//! acknowledgment to the [`OffsetCommitter`]. Effects are strictly ordered: the
//! sink is not called before the transform has returned, and an identity is not
//! marked for commit before the sink has confirmed the record is durable.

use crate::state::{Delivery, Routed, Unresolved};
use crate::transform::run_isolated;
use crate::{
    DurableSink, DurableStore, IdempotencyGuard, Message, MessageOutcome, NoOpObserver,
    OffsetCommitter, PendingCommitSet, PipelineConfig, PipelineObserver, PipelineStats,
    PipelineStatsSnapshot, Source, SourceError, Stage, Transform, TransformAdapter,
    UnresolvedReason,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Counts for one poll-and-process round
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Messages returned by the poll
    pub polled: usize,
    /// Newly persisted and marked for commit
    pub persisted: usize,
    /// Already stored; marked for commit without reprocessing
    pub duplicates: usize,
    /// Left for redelivery
    pub unresolved: usize,
}

impl RunSummary {
    fn record(&mut self, outcome: &MessageOutcome) {
        match outcome {
            MessageOutcome::ReadyToCommit { duplicate: true, .. } => self.duplicates += 1,
            MessageOutcome::ReadyToCommit { duplicate: false, .. } => self.persisted += 1,
            MessageOutcome::Unresolved { .. } => self.unresolved += 1,
        }
    }

    /// Nothing new became durable in this round
    pub fn is_idle(&self) -> bool {
        self.persisted == 0
    }
}

/// Effectively-once processing pipeline.
///
/// Cloning is cheap; clones share the store, pending set, committer and stats, so
/// one clone per ordering key can run concurrently.
#[derive(Clone)]
pub struct Pipeline {
    source: Arc<dyn Source>,
    guard: IdempotencyGuard,
    transform: TransformAdapter,
    sink: DurableSink,
    pending: Arc<PendingCommitSet>,
    committer: Arc<OffsetCommitter>,
    observer: Arc<dyn PipelineObserver>,
    stats: Arc<PipelineStats>,
    config: PipelineConfig,
}

impl Pipeline {
    /// Start building a pipeline
    pub fn builder(
        source: Arc<dyn Source>,
        store: Arc<dyn DurableStore>,
        transform: Arc<dyn Transform>,
    ) -> PipelineBuilder {
        PipelineBuilder {
            source,
            store,
            transform,
            config: PipelineConfig::default(),
            observer: Arc::new(NoOpObserver),
            stats: None,
            committer: None,
            clock: None,
        }
    }

    pub fn guard(&self) -> &IdempotencyGuard {
        &self.guard
    }

    pub fn pending(&self) -> &Arc<PendingCommitSet> {
        &self.pending
    }

    pub fn committer(&self) -> &Arc<OffsetCommitter> {
        &self.committer
    }

    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one delivery attempt of `message` to a terminal state
    pub async fn process(&self, message: Message) -> MessageOutcome {
        let delivery = Delivery::arrive(Arc::new(message));
        let id = delivery.id();
        PipelineStats::incr(&self.stats.messages_received);
        self.observer.on_arrived(id);

        let guard = self.guard.clone();
        let checked = run_isolated(Stage::Guard, self.config.persist_timeout(), move || {
            guard.check(id).map_err(UnresolvedReason::Guard)
        })
        .await;
        let decision = match checked {
            Ok(decision) => decision,
            Err(reason) => return self.unresolved(delivery.fail(reason)),
        };

        let outcome = match delivery.route(decision) {
            Routed::Duplicate(duplicate) => {
                PipelineStats::incr(&self.stats.duplicates);
                self.observer.on_duplicate(id);
                duplicate.mark_ready(&self.pending).into()
            }
            Routed::Processing(processing) => {
                let result = match self.transform.apply(Arc::clone(processing.message())).await {
                    Ok(result) => result,
                    Err(reason) => return self.unresolved(processing.fail(reason)),
                };

                let sink = self.sink.clone();
                let persisted = run_isolated(Stage::Persist, self.config.persist_timeout(), move || {
                    sink.persist(id, result).map_err(UnresolvedReason::Persist)
                })
                .await;

                match persisted {
                    Ok(ack) => {
                        let outcome = ack.outcome();
                        let persisted = processing.persisted(ack);
                        PipelineStats::incr(&self.stats.persisted);
                        self.observer.on_persisted(id, outcome, persisted.elapsed().as_millis() as u64);
                        persisted.mark_ready(&self.pending).into()
                    }
                    Err(reason) => return self.unresolved(processing.fail(reason)),
                }
            }
        };

        self.maybe_commit().await;
        outcome
    }

    /// Process `messages`, one at a time per ordering key, keys concurrently.
    ///
    /// Outcomes are returned grouped by key in order of each key's first message.
    pub async fn process_batch(&self, messages: Vec<Message>) -> Vec<MessageOutcome> {
        let groups = group_by_ordering_key(messages);
        if groups.len() <= 1 {
            let mut outcomes = Vec::new();
            for message in groups.into_iter().flatten() {
                outcomes.push(self.process(message).await);
            }
            return outcomes;
        }

        let mut tasks = tokio::task::JoinSet::new();
        for (index, group) in groups.into_iter().enumerate() {
            let pipeline = self.clone();
            tasks.spawn(async move {
                let mut outcomes = Vec::with_capacity(group.len());
                for message in group {
                    outcomes.push(pipeline.process(message).await);
                }
                (index, outcomes)
            });
        }

        let mut finished = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(group) => finished.push(group),
                // Messages of a lost group were never marked; they are redelivered
                Err(e) => tracing::error!(error = %e, "Ordering-key worker aborted"),
            }
        }
        finished.sort_by_key(|(index, _)| *index);
        finished.into_iter().flat_map(|(_, outcomes)| outcomes).collect()
    }

    /// Poll the source once and process everything it returned
    pub async fn run_once(&self) -> Result<RunSummary, SourceError> {
        let source = Arc::clone(&self.source);
        let messages = tokio::task::spawn_blocking(move || source.poll())
            .await
            .map_err(|e| SourceError::Unavailable(e.to_string().into()))??;

        let mut summary = RunSummary {
            polled: messages.len(),
            ..RunSummary::default()
        };
        for outcome in self.process_batch(messages).await {
            summary.record(&outcome);
        }

        tracing::debug!(
            polled = summary.polled,
            persisted = summary.persisted,
            duplicates = summary.duplicates,
            unresolved = summary.unresolved,
            "Poll round finished"
        );
        Ok(summary)
    }

    /// Poll and process until `shutdown` resolves.
    ///
    /// Starts the committer's interval task if the commit policy has one. On
    /// shutdown, in-flight messages that are not yet persisted are abandoned
    /// (they will be redelivered) and one final flush is attempted.
    pub async fn run_until<F>(&self, shutdown: F) -> PipelineStatsSnapshot
    where
        F: Future<Output = ()>,
    {
        let interval_flush = Arc::clone(&self.committer).spawn_interval_flush();
        tokio::pin!(shutdown);

        tracing::info!(processor = %self.config.processor_name, "Pipeline started");
        loop {
            let idle = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                round = self.run_once() => match round {
                    Ok(summary) => summary.is_idle(),
                    Err(e) => {
                        tracing::warn!(error = %e, "Poll failed");
                        true
                    }
                },
            };

            if idle {
                tokio::select! {
                    biased;
                    _ = &mut shutdown => break,
                    _ = tokio::time::sleep(self.config.poll_interval()) => {}
                }
            }
        }

        if let Some(handle) = interval_flush {
            handle.abort();
        }
        if let Err(e) = self.committer.flush_async().await {
            tracing::warn!(error = %e, pending = self.pending.len(), "Final flush failed");
        }
        tracing::info!(processor = %self.config.processor_name, "Pipeline stopped");
        self.stats.snapshot()
    }

    async fn maybe_commit(&self) {
        if self.committer.policy().batch_ready(self.pending.len()) {
            // Failures are reported by the committer and retried on the next flush
            let _ = self.committer.flush_async().await;
        }
    }

    fn unresolved(&self, delivery: Delivery<Unresolved>) -> MessageOutcome {
        let reason = &delivery.state().reason;
        let counter = match reason {
            UnresolvedReason::Timeout { .. } => &self.stats.timeouts,
            _ => match reason.stage() {
                Stage::Guard => &self.stats.guard_failures,
                Stage::Transform => &self.stats.transform_failures,
                Stage::Persist => &self.stats.persist_failures,
            },
        };
        PipelineStats::incr(counter);
        self.observer.on_unresolved(delivery.id(), reason);
        delivery.into()
    }
}

fn group_by_ordering_key(messages: Vec<Message>) -> Vec<Vec<Message>> {
    let mut index: HashMap<Option<Box<str>>, usize> = HashMap::new();
    let mut groups: Vec<Vec<Message>> = Vec::new();
    for message in messages {
        let slot = *index.entry(message.ordering_key.clone()).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(message);
    }
    groups
}

/// Builder for [`Pipeline`]
pub struct PipelineBuilder {
    source: Arc<dyn Source>,
    store: Arc<dyn DurableStore>,
    transform: Arc<dyn Transform>,
    config: PipelineConfig,
    observer: Arc<dyn PipelineObserver>,
    stats: Option<Arc<PipelineStats>>,
    committer: Option<Arc<OffsetCommitter>>,
    clock: Option<fn() -> u64>,
}

impl PipelineBuilder {
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn stats(mut self, stats: Arc<PipelineStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Share an existing committer (and its pending set) with other pipelines.
    ///
    /// The committer acknowledges to the source it was built with.
    pub fn committer(mut self, committer: Arc<OffsetCommitter>) -> Self {
        self.committer = Some(committer);
        self
    }

    /// Wall clock for record timestamps
    pub fn clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Pipeline {
        let stats = self.stats.unwrap_or_default();
        let committer = self.committer.unwrap_or_else(|| {
            Arc::new(
                OffsetCommitter::new(Arc::clone(&self.source), Arc::new(PendingCommitSet::new()))
                    .with_policy(self.config.commit.clone())
                    .with_retry(self.config.commit_retry.clone())
                    .with_observer(Arc::clone(&self.observer))
                    .with_stats(Arc::clone(&stats)),
            )
        });

        let mut sink = DurableSink::new(Arc::clone(&self.store), self.config.processor_name.clone());
        if let Some(clock) = self.clock {
            sink = sink.with_clock(clock);
        }

        Pipeline {
            source: self.source,
            guard: IdempotencyGuard::new(self.store),
            transform: TransformAdapter::new(self.transform, self.config.transform_timeout()),
            sink,
            pending: Arc::clone(committer.pending()),
            committer,
            observer: self.observer,
            stats,
            config: self.config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemorySource, InMemoryStore, MessageId, TransformError};

    fn echo(msg: &Message) -> Result<Vec<u8>, TransformError> {
        Ok(msg.payload.clone())
    }

    fn pipeline(store: Arc<InMemoryStore>) -> Pipeline {
        Pipeline::builder(Arc::new(InMemorySource::new()), store, Arc::new(echo)).build()
    }

    #[test]
    fn test_grouping_preserves_order_within_key() {
        let messages = vec![
            Message::new(1, vec![]).with_ordering_key("a"),
            Message::new(2, vec![]).with_ordering_key("b"),
            Message::new(3, vec![]).with_ordering_key("a"),
            Message::new(4, vec![]),
        ];
        let groups = group_by_ordering_key(messages);
        let ids: Vec<Vec<u64>> = groups
            .iter()
            .map(|g| g.iter().map(|m| m.id.get()).collect())
            .collect();
        assert_eq!(ids, vec![vec![1, 3], vec![2], vec![4]]);
    }

    #[tokio::test]
    async fn test_process_new_then_duplicate() {
        let store = Arc::new(InMemoryStore::new());
        let pipeline = pipeline(store.clone());

        let first = pipeline.process(Message::new(1, vec![5])).await;
        assert_eq!(
            first,
            MessageOutcome::ReadyToCommit {
                id: MessageId(1),
                duplicate: false
            }
        );

        let second = pipeline.process(Message::new(1, vec![5])).await;
        assert!(second.is_duplicate());
        assert_eq!(store.len(), 1);
        assert_eq!(pipeline.pending().snapshot(), vec![MessageId(1)]);

        let stats = pipeline.stats();
        assert_eq!(stats.messages_received, 2);
        assert_eq!(stats.persisted, 1);
        assert_eq!(stats.duplicates, 1);
    }

    #[tokio::test]
    async fn test_persist_failure_leaves_unresolved() {
        let store = Arc::new(InMemoryStore::new());
        store.fail_next_puts(1);
        let pipeline = pipeline(store.clone());

        let outcome = pipeline.process(Message::new(4, vec![])).await;
        match outcome {
            MessageOutcome::Unresolved { reason, .. } => assert!(reason.is_storage_fault()),
            other => panic!("expected unresolved, got {:?}", other),
        }
        assert!(pipeline.pending().is_empty());
        assert_eq!(pipeline.stats().persist_failures, 1);
    }

    #[derive(Default)]
    struct PersistTimings(std::sync::Mutex<Vec<(MessageId, u64)>>);

    impl PipelineObserver for PersistTimings {
        fn on_arrived(&self, _id: MessageId) {}
        fn on_duplicate(&self, _id: MessageId) {}
        fn on_persisted(&self, id: MessageId, _outcome: crate::PutOutcome, duration_millis: u64) {
            self.0.lock().unwrap().push((id, duration_millis));
        }
        fn on_unresolved(&self, _id: MessageId, _reason: &UnresolvedReason) {}
        fn on_committed(&self, _ids: &[MessageId]) {}
        fn on_commit_failed(&self, _ids: &[MessageId], _error: &crate::CommitError, _failures: u32) {}
    }

    #[tokio::test]
    async fn test_persist_reports_time_since_arrival() {
        let slow = |msg: &Message| {
            std::thread::sleep(std::time::Duration::from_millis(20));
            echo(msg)
        };
        let timings = Arc::new(PersistTimings::default());
        let pipeline = Pipeline::builder(
            Arc::new(InMemorySource::new()),
            Arc::new(InMemoryStore::new()),
            Arc::new(slow),
        )
        .observer(timings.clone())
        .build();

        assert!(pipeline.process(Message::new(6, vec![1])).await.is_ready());

        let recorded = timings.0.lock().unwrap().clone();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].0, MessageId(6));
        assert!(recorded[0].1 >= 20);
    }
}
