//! Business transform trait and the adapter that isolates its failures

use crate::{Message, Stage, TransformError, UnresolvedReason};
use std::sync::Arc;
use std::time::Duration;

/// Pluggable business transform.
///
/// Must be a pure function of the message: it is invoked again on every
/// redelivery until the result has been persisted.
///
/// Any `Fn(&Message) -> Result<Vec<u8>, TransformError>` closure is a transform.
///
/// # Example
///
/// ```rust,ignore
/// let scale = |msg: &Message| {
///     let raw: [u8; 8] = msg.payload.as_slice().try_into()
///         .map_err(|_| TransformError::transient("payload is not an f64"))?;
///     Ok((f64::from_le_bytes(raw) * 1.5).to_le_bytes().to_vec())
/// };
/// ```
pub trait Transform: Send + Sync + 'static {
    /// Compute the result for `message`
    fn apply(&self, message: &Message) -> Result<Vec<u8>, TransformError>;
}

impl<F> Transform for F
where
    F: Fn(&Message) -> Result<Vec<u8>, TransformError> + Send + Sync + 'static,
{
    fn apply(&self, message: &Message) -> Result<Vec<u8>, TransformError> {
        self(message)
    }
}

/// Runs a [`Transform`] on the blocking pool.
///
/// Panics and timeouts are contained and reported as [`UnresolvedReason`], the
/// same as a transient error, so the message is simply left for redelivery.
#[derive(Clone)]
pub struct TransformAdapter {
    transform: Arc<dyn Transform>,
    timeout: Option<Duration>,
}

impl TransformAdapter {
    pub fn new(transform: Arc<dyn Transform>, timeout: Option<Duration>) -> Self {
        Self { transform, timeout }
    }

    /// Apply the transform, bounded by the configured timeout
    pub async fn apply(&self, message: Arc<Message>) -> Result<Vec<u8>, UnresolvedReason> {
        let transform = Arc::clone(&self.transform);
        run_isolated(Stage::Transform, self.timeout, move || {
            transform
                .apply(&message)
                .map_err(UnresolvedReason::Transform)
        })
        .await
    }
}

/// Run `f` on the blocking pool, mapping panics and timeouts to `UnresolvedReason`.
///
/// On timeout the blocking call is detached, not interrupted.
pub(crate) async fn run_isolated<T, F>(
    stage: Stage,
    timeout: Option<Duration>,
    f: F,
) -> Result<T, UnresolvedReason>
where
    F: FnOnce() -> Result<T, UnresolvedReason> + Send + 'static,
    T: Send + 'static,
{
    let task = tokio::task::spawn_blocking(f);
    let joined = match timeout {
        Some(after) => match tokio::time::timeout(after, task).await {
            Ok(joined) => joined,
            Err(_) => return Err(UnresolvedReason::Timeout { stage, after }),
        },
        None => task.await,
    };

    joined.map_err(|e| UnresolvedReason::Aborted {
        stage,
        reason: e.to_string().into(),
    })?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scale(msg: &Message) -> Result<Vec<u8>, TransformError> {
        let raw: [u8; 8] = msg
            .payload
            .as_slice()
            .try_into()
            .map_err(|_| TransformError::transient("bad payload"))?;
        Ok((f64::from_le_bytes(raw) * 1.5).to_le_bytes().to_vec())
    }

    #[tokio::test]
    async fn test_adapter_applies_closure() {
        let adapter = TransformAdapter::new(Arc::new(scale), None);
        let msg = Arc::new(Message::new(1, 10.0f64.to_le_bytes().to_vec()));
        let out = adapter.apply(msg).await.unwrap();
        assert_eq!(out, 15.0f64.to_le_bytes().to_vec());
    }

    #[tokio::test]
    async fn test_adapter_reports_transient_error() {
        let adapter = TransformAdapter::new(Arc::new(scale), None);
        let msg = Arc::new(Message::new(1, vec![1, 2]));
        let err = adapter.apply(msg).await.unwrap_err();
        assert!(matches!(err, UnresolvedReason::Transform(TransformError::Transient { .. })));
    }

    #[tokio::test]
    async fn test_adapter_contains_panics() {
        let panicking = |_: &Message| -> Result<Vec<u8>, TransformError> { panic!("bug in transform") };
        let adapter = TransformAdapter::new(Arc::new(panicking), None);
        let err = adapter.apply(Arc::new(Message::new(1, vec![]))).await.unwrap_err();
        assert!(matches!(err, UnresolvedReason::Aborted { stage: Stage::Transform, .. }));
    }

    #[tokio::test]
    async fn test_adapter_times_out() {
        let slow = |_: &Message| -> Result<Vec<u8>, TransformError> {
            std::thread::sleep(Duration::from_millis(200));
            Ok(vec![])
        };
        let adapter = TransformAdapter::new(Arc::new(slow), Some(Duration::from_millis(20)));
        let err = adapter.apply(Arc::new(Message::new(1, vec![]))).await.unwrap_err();
        assert_eq!(
            err,
            UnresolvedReason::Timeout {
                stage: Stage::Transform,
                after: Duration::from_millis(20),
            }
        );
    }
}
