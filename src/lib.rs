//! Effectively-Once Stream Processing
//!
//! The processing core of a stream consumer that turns at-least-once delivery
//! into exactly-once durable effects. Every message goes through:
//!
//! 1. [`IdempotencyGuard`]: is a record for this id already stored?
//! 2. [`Transform`]: compute the result (skipped for duplicates)
//! 3. [`DurableSink`]: persist a write-once [`ProcessingRecord`]
//! 4. [`PendingCommitSet`]: mark the id ready for acknowledgment
//! 5. [`OffsetCommitter`]: acknowledge pending ids to the [`Source`] in batches
//!
//! A failure anywhere in 2–3 leaves the id out of the pending set, so it is never
//! acknowledged and the source redelivers it. Duplicates are acknowledged without
//! being transformed or persisted again.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! let source = Arc::new(InMemorySource::with_messages(messages));
//! let store = Arc::new(InMemoryStore::new());
//!
//! let pipeline = Pipeline::builder(source, store, Arc::new(my_transform))
//!     .config(PipelineConfig::from_env())
//!     .observer(Arc::new(TracingObserver))
//!     .build();
//!
//! let summary = pipeline.run_once().await?;
//! pipeline.committer().flush()?;
//! ```

#![warn(missing_docs)]

// === Core Types ===
mod errors;
mod message;
mod state;

// === Configuration ===
mod config;

// === External Interfaces ===
mod source;
mod store;
#[cfg(feature = "lmdb")]
mod lmdb;

// === Processing ===
mod fault;
mod guard;
mod sink;
mod transform;

// === Commit ===
mod committer;
mod pending;

// === Orchestration ===
mod pipeline;

// === Observability ===
mod observer;
mod stats;

// === Re-exports ===

// Types
pub use message::{Message, MessageId, ProcessingRecord};

// State (typestate)
pub use state::{
    Arrived, Delivery, Duplicate, MessageOutcome, Persisted, Processing, ReadyToCommit, Routed,
    Unresolved,
};

// Errors
pub use errors::{
    CommitError, PersistError, SourceError, Stage, StoreError, TransformError, UnresolvedReason,
};

// Configuration
pub use config::{CommitPolicy, PipelineConfig, RetryPolicy, ENV_PREFIX};

// External interfaces
pub use source::{InMemorySource, Source};
pub use store::{DurableStore, InMemoryStore, PutOutcome};
#[cfg(feature = "lmdb")]
pub use lmdb::{LmdbStore, DEFAULT_MAP_SIZE};

// Processing
pub use fault::{FaultInjectingTransform, FaultPlan};
pub use guard::{GuardDecision, IdempotencyGuard};
pub use sink::{DurableSink, PersistAck};
pub use transform::{Transform, TransformAdapter};

// Commit
pub use committer::{CommitOutcome, CommitResult, OffsetCommitter};
pub use pending::PendingCommitSet;

// Orchestration
pub use pipeline::{Pipeline, PipelineBuilder, RunSummary};

// Observability
pub use observer::{NoOpObserver, PipelineObserver, TracingObserver};
pub use stats::{PipelineStats, PipelineStatsSnapshot};
