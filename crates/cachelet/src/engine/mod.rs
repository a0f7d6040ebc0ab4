//! Single-node reference execution engine.
//!
//! Operations run on the tokio pool against the owning cache's record store,
//! bounded by the configured operation timeout.

mod store;

pub use store::CacheStore;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::cache_manager::CacheManager;
use crate::gate::{ExecutionError, ExecutionGate, Submission};
use crate::operation::{CacheOperation, InternalOperation, OperationValue};

pub struct LocalEngine {
    manager: Arc<CacheManager>,
    timeout: Duration,
    shutdown: CancellationToken,
}

impl LocalEngine {
    pub fn new(manager: Arc<CacheManager>, timeout: Duration) -> Self {
        Self {
            manager,
            timeout,
            shutdown: CancellationToken::new(),
        }
    }

    /// Stop accepting operations. Already running operations complete.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn manager(&self) -> &Arc<CacheManager> {
        &self.manager
    }
}

fn execute(
    manager: &CacheManager,
    operation: &InternalOperation,
) -> Result<OperationValue, ExecutionError> {
    if matches!(operation.operation(), CacheOperation::Destroy) {
        return if manager.destroy_cache(operation.cache()) {
            Ok(OperationValue::Unit)
        } else {
            Err(ExecutionError::TargetNotFound(operation.cache().to_string()))
        };
    }

    let store = manager
        .store(operation.cache())
        .ok_or_else(|| ExecutionError::TargetNotFound(operation.cache().to_string()))?;
    store.execute(operation)
}

impl ExecutionGate for LocalEngine {
    fn submit(&self, operation: InternalOperation) -> Submission {
        if self.shutdown.is_cancelled() {
            let cache = operation.cache().to_string();
            return Box::pin(async move {
                Err(ExecutionError::TargetUnavailable(format!(
                    "engine shutting down, cache '{cache}'"
                )))
            });
        }

        let manager = Arc::clone(&self.manager);
        let handle = tokio::spawn(async move {
            tracing::trace!(
                cache = %operation.cache(),
                operation = operation.operation().name(),
                "Executing operation"
            );
            execute(&manager, &operation)
        });

        let timeout = self.timeout;
        Box::pin(async move {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) if e.is_panic() => {
                    Err(ExecutionError::InternalFault("operation panicked".to_string()))
                }
                Ok(Err(_)) => Err(ExecutionError::InternalFault(
                    "operation was cancelled".to_string(),
                )),
                Err(_) => Err(ExecutionError::Timeout(timeout)),
            }
        })
    }
}
