//! Pipeline statistics

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the pipeline workers and the committer
pub struct PipelineStats {
    pub messages_received: AtomicU64,
    pub duplicates: AtomicU64,
    pub persisted: AtomicU64,
    pub transform_failures: AtomicU64,
    pub persist_failures: AtomicU64,
    pub guard_failures: AtomicU64,
    pub timeouts: AtomicU64,
    pub commits: AtomicU64,
    pub commit_failures: AtomicU64,
    pub acknowledged: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            persisted: AtomicU64::new(0),
            transform_failures: AtomicU64::new(0),
            persist_failures: AtomicU64::new(0),
            guard_failures: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            commits: AtomicU64::new(0),
            commit_failures: AtomicU64::new(0),
            acknowledged: AtomicU64::new(0),
        }
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            transform_failures: self.transform_failures.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            guard_failures: self.guard_failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            commit_failures: self.commit_failures.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
        }
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineStatsSnapshot {
    pub messages_received: u64,
    pub duplicates: u64,
    pub persisted: u64,
    pub transform_failures: u64,
    pub persist_failures: u64,
    pub guard_failures: u64,
    pub timeouts: u64,
    pub commits: u64,
    pub commit_failures: u64,
    pub acknowledged: u64,
}
