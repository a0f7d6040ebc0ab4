//! Execution submission gate: the boundary to the operation-execution engine.
//!
//! `submit` hands the operation to the engine before it returns and gives back
//! a future for the final outcome. Callers await that future once; they never
//! poll the engine.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::operation::{InternalOperation, OperationValue};

/// Errors reported by the execution engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("target unavailable: {0}")]
    TargetUnavailable(String),
    #[error("target not found: {0}")]
    TargetNotFound(String),
    #[error("internal fault: {0}")]
    InternalFault(String),
}

impl ExecutionError {
    /// Whether the gate may transparently resubmit.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TargetUnavailable(_))
    }
}

/// Pending outcome of a submitted operation.
pub type Submission = BoxFuture<'static, Result<OperationValue, ExecutionError>>;

pub trait ExecutionGate: Send + Sync {
    /// Submit `operation` for execution.
    ///
    /// The operation is accepted by the engine before this returns; the
    /// returned future only observes completion.
    fn submit(&self, operation: InternalOperation) -> Submission;
}

impl<G: ExecutionGate + ?Sized> ExecutionGate for Arc<G> {
    fn submit(&self, operation: InternalOperation) -> Submission {
        (**self).submit(operation)
    }
}

/// Retry policy for [`RetryingGate`].
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_base: Duration::from_millis(50),
        }
    }
}

/// Gate decorator that resubmits operations whose target was transiently
/// unavailable, with exponential backoff.
///
/// Callers only ever see the final outcome.
pub struct RetryingGate<G> {
    inner: Arc<G>,
    config: RetryConfig,
}

impl<G: ExecutionGate + 'static> RetryingGate<G> {
    pub fn new(inner: G, config: RetryConfig) -> Self {
        Self {
            inner: Arc::new(inner),
            config,
        }
    }
}

impl<G: ExecutionGate + 'static> ExecutionGate for RetryingGate<G> {
    fn submit(&self, operation: InternalOperation) -> Submission {
        let first = self.inner.submit(operation.clone());
        let inner = Arc::clone(&self.inner);
        let config = self.config.clone();

        Box::pin(async move {
            let mut pending = first;
            let mut attempt = 0;
            loop {
                match pending.await {
                    Err(e) if e.is_retryable() => {
                        attempt += 1;
                        if attempt > config.max_retries {
                            tracing::warn!(
                                cache = %operation.cache(),
                                operation = operation.operation().name(),
                                attempts = attempt,
                                error = %e,
                                "Operation failed after max retries"
                            );
                            return Err(e);
                        }

                        let backoff = config.backoff_base * (1 << attempt.min(10));
                        tracing::debug!(
                            cache = %operation.cache(),
                            operation = operation.operation().name(),
                            attempt = attempt,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "Retrying operation"
                        );
                        tokio::time::sleep(backoff).await;
                        pending = inner.submit(operation.clone());
                    }
                    other => return other,
                }
            }
        })
    }
}
