//! Error types for transform, persistence, source and commit failures

use std::time::Duration;

/// Error from the business transform
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    /// Temporary failure - the message stays unacknowledged and is redelivered
    #[error("transient transform failure: {reason}")]
    Transient {
        /// Error description
        reason: Box<str>,
    },
}

impl TransformError {
    /// Build a transient error from any displayable reason
    pub fn transient(reason: impl std::fmt::Display) -> Self {
        Self::Transient {
            reason: reason.to_string().into_boxed_str(),
        }
    }

    /// Transform failures are always retried through redelivery
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Error from a durable store implementation
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The storage engine failed (I/O, lock poisoning, transaction abort)
    #[error("Storage error: {0}")]
    Storage(Box<str>),
    /// A stored record could not be encoded or decoded
    #[error("Encoding error: {0}")]
    Encoding(Box<str>),
}

#[cfg(feature = "lmdb")]
impl From<heed::Error> for StoreError {
    fn from(err: heed::Error) -> Self {
        Self::Storage(err.to_string().into())
    }
}

/// Error from the durable sink
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PersistError {
    /// The underlying store rejected or failed the write
    #[error("persist failed: {0}")]
    Store(#[from] StoreError),
}

/// Error reported by a message source
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// The source could not be reached
    #[error("source unavailable: {0}")]
    Unavailable(Box<str>),
    /// The source refused the request
    #[error("source rejected request: {0}")]
    Rejected(Box<str>),
}

/// Error from flushing acknowledgments
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CommitError {
    /// The batch acknowledgment failed; the identities were requeued
    #[error("acknowledgment of {count} message(s) failed: {source}")]
    AckFailed {
        /// Number of identities in the failed batch
        count: usize,
        /// Source-side failure
        source: SourceError,
    },
    /// The flush task died before reporting; drained identities are redelivered
    #[error("flush aborted: {0}")]
    Aborted(Box<str>),
}

/// Pipeline stage a failure was observed in
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Duplicate check against the store
    Guard,
    /// Business transform
    Transform,
    /// Durable write
    Persist,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Guard => write!(f, "guard"),
            Stage::Transform => write!(f, "transform"),
            Stage::Persist => write!(f, "persist"),
        }
    }
}

/// Why a delivery attempt ended without being marked for commit
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum UnresolvedReason {
    /// The duplicate check could not read the store
    #[error("duplicate check failed: {0}")]
    Guard(StoreError),
    /// The transform failed
    #[error(transparent)]
    Transform(TransformError),
    /// The durable write failed
    #[error(transparent)]
    Persist(PersistError),
    /// A stage exceeded its configured timeout
    #[error("{stage} timed out after {}ms", .after.as_millis())]
    Timeout {
        /// Stage that timed out
        stage: Stage,
        /// Configured bound
        after: Duration,
    },
    /// A stage task panicked or was cancelled
    #[error("{stage} aborted: {reason}")]
    Aborted {
        /// Stage that aborted
        stage: Stage,
        /// Error description
        reason: Box<str>,
    },
}

impl UnresolvedReason {
    /// Failures that point at the storage layer rather than the message
    pub fn is_storage_fault(&self) -> bool {
        matches!(
            self,
            Self::Guard(_)
                | Self::Persist(_)
                | Self::Timeout {
                    stage: Stage::Persist | Stage::Guard,
                    ..
                }
                | Self::Aborted {
                    stage: Stage::Persist | Stage::Guard,
                    ..
                }
        )
    }

    /// Stage the failure belongs to
    pub fn stage(&self) -> Stage {
        match self {
            Self::Guard(_) => Stage::Guard,
            Self::Transform(_) => Stage::Transform,
            Self::Persist(_) => Stage::Persist,
            Self::Timeout { stage, .. } | Self::Aborted { stage, .. } => *stage,
        }
    }
}
