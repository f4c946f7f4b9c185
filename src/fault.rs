//! Deterministic fault injection for transforms

use crate::{Message, MessageId, Transform, TransformError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Which identities fail, and for how many leading attempts.
///
/// `fail_first(id, n)` makes attempts `1..=n` for `id` fail with a transient error
/// and lets attempt `n + 1` onwards through. `always_fail(id)` never lets it through.
#[derive(Clone, Debug, Default)]
pub struct FaultPlan {
    rules: HashMap<MessageId, FaultRule>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FaultRule {
    FirstAttempts(u32),
    Always,
}

impl FaultPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `attempts` transform attempts for `id`
    pub fn fail_first(mut self, id: impl Into<MessageId>, attempts: u32) -> Self {
        self.rules.insert(id.into(), FaultRule::FirstAttempts(attempts));
        self
    }

    /// Fail every transform attempt for `id`
    pub fn always_fail(mut self, id: impl Into<MessageId>) -> Self {
        self.rules.insert(id.into(), FaultRule::Always);
        self
    }

    /// Whether attempt number `attempt` (1-indexed) for `id` must fail
    pub fn should_fail(&self, id: MessageId, attempt: u32) -> bool {
        match self.rules.get(&id) {
            Some(FaultRule::FirstAttempts(n)) => attempt <= *n,
            Some(FaultRule::Always) => true,
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Wraps a transform and forces transient failures according to a [`FaultPlan`].
///
/// Attempts are counted per identity across redeliveries.
pub struct FaultInjectingTransform {
    inner: Arc<dyn Transform>,
    plan: FaultPlan,
    attempts: Mutex<HashMap<MessageId, u32>>,
}

impl FaultInjectingTransform {
    pub fn new(inner: Arc<dyn Transform>, plan: FaultPlan) -> Self {
        Self {
            inner,
            plan,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Attempts seen so far for `id`
    pub fn attempts(&self, id: MessageId) -> u32 {
        self.attempts
            .lock()
            .map(|a| a.get(&id).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn next_attempt(&self, id: MessageId) -> u32 {
        let mut attempts = self.attempts.lock().unwrap_or_else(|p| p.into_inner());
        let counter = attempts.entry(id).or_insert(0);
        *counter += 1;
        *counter
    }
}

impl Transform for FaultInjectingTransform {
    fn apply(&self, message: &Message) -> Result<Vec<u8>, TransformError> {
        let attempt = self.next_attempt(message.id);
        if self.plan.should_fail(message.id, attempt) {
            tracing::debug!(message_id = %message.id, attempt, "Injecting transient transform failure");
            return Err(TransformError::transient(format!(
                "injected failure for message {} on attempt {}",
                message.id, attempt
            )));
        }
        self.inner.apply(message)
    }
}
