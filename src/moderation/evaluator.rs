//! The external text-evaluator seam.
//!
//! The evaluator is a black box: assumed slow, network-bound, and
//! occasionally failing or malformed. The engine never assumes success.
//! [`BoundedEvaluator`] adds the bounded-timeout hardening the source
//! lacked; callers still degrade failures to "no intervention".

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::error::{EvaluatorError, EvaluatorResult};

/// Upper bound on a single evaluator call.
pub const DEFAULT_EVALUATOR_TIMEOUT: Duration = Duration::from_secs(30);

/// Black-box text evaluation capability.
#[async_trait]
pub trait TextEvaluator: Send + Sync {
    /// Evaluate `context_prompt` under `policy_prompt`, returning raw text.
    async fn evaluate(&self, policy_prompt: &str, context_prompt: &str)
        -> EvaluatorResult<String>;
}

/// Wraps an evaluator with a hard per-call timeout.
pub struct BoundedEvaluator<E> {
    inner: E,
    timeout: Duration,
}

impl<E: TextEvaluator> BoundedEvaluator<E> {
    pub fn new(inner: E) -> Self {
        Self::with_timeout(inner, DEFAULT_EVALUATOR_TIMEOUT)
    }

    pub fn with_timeout(inner: E, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl<E: TextEvaluator> TextEvaluator for BoundedEvaluator<E> {
    async fn evaluate(
        &self,
        policy_prompt: &str,
        context_prompt: &str,
    ) -> EvaluatorResult<String> {
        match tokio::time::timeout(self.timeout, self.inner.evaluate(policy_prompt, context_prompt))
            .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout = ?self.timeout, "evaluator call exceeded its time bound");
                Err(EvaluatorError::Timeout(self.timeout))
            }
        }
    }
}
