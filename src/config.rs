//! Pipeline configuration

use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

/// Prefix for every environment variable read by [`PipelineConfig::from_env`]
pub const ENV_PREFIX: &str = "STREAM_WEAVER_";

/// Top-level pipeline configuration
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Producer tag stamped on every record
    pub processor_name: Box<str>,
    /// Upper bound on one transform call (none = unbounded)
    pub transform_timeout_millis: Option<u64>,
    /// Upper bound on one persist call (none = unbounded)
    pub persist_timeout_millis: Option<u64>,
    /// Pause between polls when the source returned nothing
    pub poll_interval_millis: u64,
    /// When acknowledgments are flushed
    pub commit: CommitPolicy,
    /// Backoff between interval flushes after consecutive commit failures
    pub commit_retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            processor_name: "stream-weaver".into(),
            transform_timeout_millis: None,
            persist_timeout_millis: None,
            poll_interval_millis: 100,
            commit: CommitPolicy::default(),
            commit_retry: RetryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Build a config from `STREAM_WEAVER_*` environment variables.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `STREAM_WEAVER_PROCESSOR_NAME` | `processor_name` |
    /// | `STREAM_WEAVER_TRANSFORM_TIMEOUT_MS` | `transform_timeout_millis` |
    /// | `STREAM_WEAVER_PERSIST_TIMEOUT_MS` | `persist_timeout_millis` |
    /// | `STREAM_WEAVER_POLL_INTERVAL_MS` | `poll_interval_millis` |
    /// | `STREAM_WEAVER_COMMIT_BATCH_SIZE` | `commit.max_batch_size` |
    /// | `STREAM_WEAVER_COMMIT_INTERVAL_MS` | `commit.flush_interval_millis` |
    ///
    /// Missing or unparsable values keep their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            processor_name: env_optional::<String>("PROCESSOR_NAME")
                .map(String::into_boxed_str)
                .unwrap_or(defaults.processor_name),
            transform_timeout_millis: env_optional("TRANSFORM_TIMEOUT_MS")
                .or(defaults.transform_timeout_millis),
            persist_timeout_millis: env_optional("PERSIST_TIMEOUT_MS")
                .or(defaults.persist_timeout_millis),
            poll_interval_millis: env_with_default(
                "POLL_INTERVAL_MS",
                defaults.poll_interval_millis,
            ),
            commit: CommitPolicy {
                max_batch_size: env_optional("COMMIT_BATCH_SIZE")
                    .filter(|n: &usize| *n > 0)
                    .or(defaults.commit.max_batch_size),
                flush_interval_millis: env_optional("COMMIT_INTERVAL_MS")
                    .filter(|n: &u64| *n > 0)
                    .or(defaults.commit.flush_interval_millis),
            },
            commit_retry: defaults.commit_retry,
        }
    }

    pub fn with_processor_name(mut self, name: impl Into<Box<str>>) -> Self {
        self.processor_name = name.into();
        self
    }

    pub fn with_commit_policy(mut self, commit: CommitPolicy) -> Self {
        self.commit = commit;
        self
    }

    /// Bound each transform call; sub-millisecond bounds round up to 1ms
    pub fn with_transform_timeout(mut self, timeout: Duration) -> Self {
        self.transform_timeout_millis = Some(ceil_millis(timeout));
        self
    }

    /// Bound each guard read and persist call; rounds up like the transform bound
    pub fn with_persist_timeout(mut self, timeout: Duration) -> Self {
        self.persist_timeout_millis = Some(ceil_millis(timeout));
        self
    }

    pub fn transform_timeout(&self) -> Option<Duration> {
        self.transform_timeout_millis.map(Duration::from_millis)
    }

    pub fn persist_timeout(&self) -> Option<Duration> {
        self.persist_timeout_millis.map(Duration::from_millis)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_millis)
    }
}

/// When the committer flushes on its own.
///
/// With both fields unset (the default) acknowledgments are only flushed by an
/// explicit [`OffsetCommitter::flush`](crate::OffsetCommitter::flush).
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CommitPolicy {
    /// Flush as soon as this many identities are pending
    pub max_batch_size: Option<usize>,
    /// Flush on this interval from the background task
    pub flush_interval_millis: Option<u64>,
}

impl CommitPolicy {
    /// Explicit flushes only
    pub fn manual() -> Self {
        Self::default()
    }

    /// Flush whenever `size` identities are pending
    pub fn batch_size(size: usize) -> Self {
        Self {
            max_batch_size: Some(size.max(1)),
            flush_interval_millis: None,
        }
    }

    /// Flush every `interval`
    pub fn interval(interval: Duration) -> Self {
        Self {
            max_batch_size: None,
            flush_interval_millis: Some(interval.as_millis().max(1) as u64),
        }
    }

    /// Add a size threshold to this policy
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = Some(size.max(1));
        self
    }

    pub fn flush_interval(&self) -> Option<Duration> {
        self.flush_interval_millis.map(Duration::from_millis)
    }

    /// Whether `pending` identities reach the size threshold
    pub fn batch_ready(&self, pending: usize) -> bool {
        match self.max_batch_size {
            Some(max) => pending >= max,
            None => false,
        }
    }
}

/// Retry backoff policy
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Number of failures after which the delay stops growing
    pub max_attempts: u32,
    /// Initial delay before first retry (milliseconds)
    pub initial_delay_millis: u64,
    /// Maximum delay cap (milliseconds)
    pub max_delay_millis: u64,
    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            initial_delay_millis: 1000,
            max_delay_millis: 30000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Calculate delay for a given attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(0);
        }

        let exponent = attempt.min(self.max_attempts.max(1)).saturating_sub(1);
        let delay = self.initial_delay_millis as f64 * self.backoff_multiplier.powi(exponent as i32);
        let capped = delay.min(self.max_delay_millis as f64);
        Duration::from_millis(capped as u64)
    }
}

fn ceil_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos().div_ceil(1_000_000)).unwrap_or(u64::MAX)
}

fn env_optional<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(format!("{}{}", ENV_PREFIX, key))
        .ok()
        .and_then(|v| v.trim().parse().ok())
}

fn env_with_default<T: FromStr>(key: &str, default: T) -> T {
    env_optional(key).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(0));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4000));
        // Would be 512000 but capped at max
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(30000));
    }

    #[test]
    fn test_commit_policy_thresholds() {
        assert!(!CommitPolicy::manual().batch_ready(10_000));
        assert!(CommitPolicy::batch_size(3).batch_ready(3));
        assert!(!CommitPolicy::batch_size(3).batch_ready(2));
        // Zero would flush on every empty check
        assert_eq!(CommitPolicy::batch_size(0).max_batch_size, Some(1));

        let policy = CommitPolicy::interval(Duration::from_millis(250)).with_batch_size(50);
        assert_eq!(policy.flush_interval(), Some(Duration::from_millis(250)));
        assert!(policy.batch_ready(50));
    }

    #[test]
    fn test_timeouts_round_up_to_whole_millis() {
        let config = PipelineConfig::default()
            .with_transform_timeout(Duration::from_micros(500))
            .with_persist_timeout(Duration::from_micros(2_100));
        assert_eq!(config.transform_timeout(), Some(Duration::from_millis(1)));
        assert_eq!(config.persist_timeout(), Some(Duration::from_millis(3)));

        let exact = PipelineConfig::default().with_transform_timeout(Duration::from_millis(40));
        assert_eq!(exact.transform_timeout(), Some(Duration::from_millis(40)));
    }

    #[test]
    fn test_from_env() {
        std::env::set_var("STREAM_WEAVER_PROCESSOR_NAME", "FinancialTradeEngine");
        std::env::set_var("STREAM_WEAVER_TRANSFORM_TIMEOUT_MS", "250");
        std::env::set_var("STREAM_WEAVER_COMMIT_BATCH_SIZE", "64");
        std::env::set_var("STREAM_WEAVER_POLL_INTERVAL_MS", "not-a-number");

        let config = PipelineConfig::from_env();
        assert_eq!(&*config.processor_name, "FinancialTradeEngine");
        assert_eq!(config.transform_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.persist_timeout(), None);
        assert_eq!(config.commit.max_batch_size, Some(64));
        assert_eq!(config.poll_interval(), Duration::from_millis(100));

        std::env::remove_var("STREAM_WEAVER_PROCESSOR_NAME");
        std::env::remove_var("STREAM_WEAVER_TRANSFORM_TIMEOUT_MS");
        std::env::remove_var("STREAM_WEAVER_COMMIT_BATCH_SIZE");
        std::env::remove_var("STREAM_WEAVER_POLL_INTERVAL_MS");
    }
}
