//! Message task: the per-request pipeline.
//!
//! ```text
//! Created ──decode──▶ Decoded ──authorize──▶ Authorized ──submit──▶ Dispatched ──▶ Completed
//!    │                   │                       │                      │
//!    └─ MalformedMessage └─ PermissionDenied     └─ UnknownDistributed  └─ mapped engine error
//!                                                   Object
//! ```
//!
//! Authorization always precedes building the internal operation. Submission
//! to the gate is the only suspension point. Any failure, panics included,
//! becomes a [`TaskOutcome::Failure`] at the task boundary.

mod outcome;

pub use outcome::{INTERNAL_FAULT_MESSAGE, TaskFailure, TaskOutcome, TaskState};

use std::any::Any;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::Instrument;

use crate::bridge::protocol::{FailureKind, RawMessage};
use crate::commands::CacheCommand;
use crate::connection::Connection;
use crate::gate::ExecutionGate;
use crate::provider::ProviderRegistry;
use crate::security::PermissionResolver;

/// Shared collaborators of every task.
pub struct TaskContext {
    pub providers: Arc<ProviderRegistry>,
    pub resolver: Arc<PermissionResolver>,
    pub gate: Arc<dyn ExecutionGate>,
}

pub struct MessageTask<C: CacheCommand> {
    message: RawMessage,
    connection: Arc<Connection>,
    context: Arc<TaskContext>,
    state: TaskState,
    _command: PhantomData<fn() -> C>,
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

impl<C: CacheCommand> MessageTask<C> {
    pub fn new(message: RawMessage, connection: Arc<Connection>, context: Arc<TaskContext>) -> Self {
        Self {
            message,
            connection,
            context,
            state: TaskState::Created,
            _command: PhantomData,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    fn advance(&mut self, next: TaskState) {
        debug_assert!(next > self.state, "task moved from {:?} to {:?}", self.state, next);
        self.state = next;
    }

    /// Run the pipeline and respond on the connection.
    ///
    /// A task runs once; running it again yields an internal fault without
    /// touching the gate or the connection.
    pub async fn run(&mut self) -> TaskOutcome {
        if self.state != TaskState::Created {
            tracing::error!(
                correlation_id = self.message.correlation_id(),
                state = self.state.as_str(),
                "Message task run twice"
            );
            return TaskOutcome::Failure(TaskFailure::internal());
        }

        let span = tracing::debug_span!(
            "message_task",
            correlation_id = self.message.correlation_id(),
            message_type = %self.message.message_type(),
            method = C::METHOD_NAME,
            connection_id = %self.connection.id(),
        );

        async {
            let outcome = match AssertUnwindSafe(self.execute()).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(panic) => {
                    tracing::error!(
                        panic = panic_message(&*panic),
                        state = self.state.as_str(),
                        "Message task panicked"
                    );
                    TaskOutcome::Failure(TaskFailure::internal())
                }
            };
            self.state = TaskState::Completed;
            if let Some(kind) = outcome.failure_kind() {
                tracing::debug!(%kind, retryable = kind.is_retryable(), "Request failed");
            }

            let response = outcome.to_response(self.message.correlation_id());
            self.connection.send(response).await;
            outcome
        }
        .instrument(span)
        .await
    }

    async fn execute(&mut self) -> TaskOutcome {
        let parameters = match C::decode(&self.message) {
            Ok(parameters) => parameters,
            Err(e) => {
                tracing::debug!(error = %e, "Malformed request");
                return TaskOutcome::failure(FailureKind::MalformedMessage, e.to_string());
            }
        };
        self.advance(TaskState::Decoded);

        let name = C::distributed_object_name(&parameters);
        let requirement = match self
            .context
            .resolver
            .required_capability(&C::MESSAGE_TYPE, name)
        {
            Ok(requirement) => requirement,
            Err(e) => {
                tracing::error!(error = %e, "Command missing from permission table");
                return TaskOutcome::Failure(TaskFailure::internal());
            }
        };
        let connection = Arc::clone(&self.connection);
        let caller = connection.caller();
        if !caller.grants(&requirement) {
            tracing::info!(
                principal = caller.principal(),
                requirement = %requirement,
                "Permission denied"
            );
            return TaskOutcome::failure(
                FailureKind::PermissionDenied,
                format!("{requirement} not granted to '{}'", caller.principal()),
            );
        }
        self.advance(TaskState::Authorized);

        tracing::debug!(
            principal = caller.principal(),
            cache = name,
            parameters = %C::parameters(&parameters),
            "Authorized request"
        );

        let Some(provider) = self.context.providers.get(name) else {
            return TaskOutcome::failure(
                FailureKind::UnknownDistributedObject,
                format!("distributed object '{name}' not found"),
            );
        };
        let operation = C::prepare_operation(&parameters, provider.as_ref());

        let submission = self.context.gate.submit(operation);
        self.advance(TaskState::Dispatched);

        match submission.await {
            Ok(value) => match C::encode_response(value) {
                Ok(encoded) => TaskOutcome::Success(encoded),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to encode response");
                    TaskOutcome::Failure(TaskFailure::internal())
                }
            },
            Err(e) => {
                let failure = TaskFailure::from_execution(&e);
                if failure.kind == FailureKind::InternalFault {
                    tracing::error!(error = %e, "Operation failed");
                } else {
                    tracing::debug!(error = %e, kind = %failure.kind, "Operation failed");
                }
                TaskOutcome::Failure(failure)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::cache::{Get, SetExpiryPolicy, Size};
    use crate::connection::{ResponseWriter, WriteError};
    use crate::data::{Data, ExpiryPolicy};
    use crate::gate::{ExecutionError, Submission};
    use crate::operation::{CacheOperation, InternalOperation, OperationValue};
    use crate::provider::CacheOperationProvider;
    use crate::security::{ActionKind, ActionSet, CallerContext, Grant, TargetPattern};
    use crate::bridge::protocol::{MessageType, ResponseMessage};
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingGate {
        submits: AtomicUsize,
        result: Result<OperationValue, ExecutionError>,
    }

    impl CountingGate {
        fn returning(result: Result<OperationValue, ExecutionError>) -> Arc<Self> {
            Arc::new(Self {
                submits: AtomicUsize::new(0),
                result,
            })
        }
    }

    impl ExecutionGate for CountingGate {
        fn submit(&self, _operation: InternalOperation) -> Submission {
            self.submits.fetch_add(1, Ordering::SeqCst);
            let result = self.result.clone();
            Box::pin(async move { result })
        }
    }

    struct PanickingGate;

    impl ExecutionGate for PanickingGate {
        fn submit(&self, _operation: InternalOperation) -> Submission {
            Box::pin(async { panic!("engine exploded") })
        }
    }

    #[derive(Default)]
    struct RecordingWriter {
        responses: Mutex<Vec<ResponseMessage>>,
    }

    #[async_trait::async_trait]
    impl ResponseWriter for RecordingWriter {
        async fn write(&self, response: ResponseMessage) -> Result<(), WriteError> {
            self.responses.lock().unwrap().push(response);
            Ok(())
        }
    }

    fn context(gate: Arc<dyn ExecutionGate>) -> Arc<TaskContext> {
        let providers = Arc::new(ProviderRegistry::new());
        providers.publish(Arc::new(CacheOperationProvider::new("orders", 16)));
        let resolver = PermissionResolver::new()
            .with_action(Get::MESSAGE_TYPE, Get::ACTION)
            .with_action(Size::MESSAGE_TYPE, Size::ACTION)
            .with_action(SetExpiryPolicy::MESSAGE_TYPE, SetExpiryPolicy::ACTION);
        Arc::new(TaskContext {
            providers,
            resolver: Arc::new(resolver),
            gate,
        })
    }

    fn connection(caller: CallerContext) -> (Arc<Connection>, Arc<RecordingWriter>) {
        let writer = Arc::new(RecordingWriter::default());
        let conn = Arc::new(Connection::new(Arc::new(caller), writer.clone()));
        (conn, writer)
    }

    fn reader_of(target: &str) -> CallerContext {
        CallerContext::new(
            "reader",
            [Grant::new(TargetPattern::parse(target), ActionSet::parse(["read"]).unwrap())],
        )
    }

    fn size_message(name: &str) -> RawMessage {
        RawMessage::new(10, Size::MESSAGE_TYPE, json!({ "name": name }))
    }

    #[tokio::test]
    async fn successful_request_completes_and_responds() {
        let gate = CountingGate::returning(Ok(OperationValue::Count(4)));
        let (conn, writer) = connection(reader_of("orders"));
        let mut task = MessageTask::<Size>::new(size_message("orders"), conn, context(gate.clone()));

        let outcome = task.run().await;
        assert_eq!(outcome, TaskOutcome::Success(json!(4)));
        assert_eq!(task.state(), TaskState::Completed);
        assert_eq!(gate.submits.load(Ordering::SeqCst), 1);

        let responses = writer.responses.lock().unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].correlation_id, 10);
        assert!(responses[0].is_ok());
    }

    #[tokio::test]
    async fn malformed_payload_never_submits() {
        let gate = CountingGate::returning(Ok(OperationValue::Count(0)));
        let (conn, writer) = connection(CallerContext::unrestricted("dev"));
        let msg = RawMessage::new(11, Size::MESSAGE_TYPE, json!({ "nam": "orders" }));
        let mut task = MessageTask::<Size>::new(msg, conn, context(gate.clone()));

        let outcome = task.run().await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::MalformedMessage));
        assert_eq!(gate.submits.load(Ordering::SeqCst), 0);
        assert_eq!(writer.responses.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unauthorized_request_never_submits() {
        let gate = CountingGate::returning(Ok(OperationValue::Count(0)));
        let (conn, _writer) = connection(reader_of("users"));
        let mut task = MessageTask::<Size>::new(size_message("orders"), conn, context(gate.clone()));

        let outcome = task.run().await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::PermissionDenied));
        assert_eq!(gate.submits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_object_fails_before_submit() {
        let gate = CountingGate::returning(Ok(OperationValue::Count(0)));
        let (conn, _writer) = connection(CallerContext::unrestricted("dev"));
        let mut task = MessageTask::<Size>::new(size_message("ghost"), conn, context(gate.clone()));

        let outcome = task.run().await;
        assert_eq!(
            outcome.failure_kind(),
            Some(FailureKind::UnknownDistributedObject)
        );
        assert_eq!(gate.submits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn command_missing_from_resolver_is_internal_fault() {
        let gate = CountingGate::returning(Ok(OperationValue::Unit));
        let (conn, _writer) = connection(CallerContext::unrestricted("dev"));
        let mut ctx = Arc::try_unwrap(context(gate.clone())).ok().unwrap();
        ctx.resolver = Arc::new(PermissionResolver::new());
        let mut task = MessageTask::<Size>::new(size_message("orders"), conn, Arc::new(ctx));

        let outcome = task.run().await;
        assert_eq!(
            outcome,
            TaskOutcome::Failure(TaskFailure::internal())
        );
        assert_eq!(gate.submits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn timeout_maps_to_service_unavailable() {
        let gate = CountingGate::returning(Err(ExecutionError::Timeout(
            std::time::Duration::from_secs(120),
        )));
        let (conn, _writer) = connection(CallerContext::unrestricted("dev"));
        let mut task = MessageTask::<Size>::new(size_message("orders"), conn, context(gate));

        let outcome = task.run().await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::ServiceUnavailable));
    }

    #[tokio::test]
    async fn mismatched_result_is_internal_fault() {
        let gate = CountingGate::returning(Ok(OperationValue::Bool(true)));
        let (conn, _writer) = connection(CallerContext::unrestricted("dev"));
        let mut task = MessageTask::<Size>::new(size_message("orders"), conn, context(gate));

        let outcome = task.run().await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::InternalFault));
    }

    #[tokio::test]
    async fn panic_in_engine_becomes_internal_fault() {
        let (conn, writer) = connection(CallerContext::unrestricted("dev"));
        let mut task =
            MessageTask::<Size>::new(size_message("orders"), conn, context(Arc::new(PanickingGate)));

        let outcome = task.run().await;
        assert_eq!(outcome, TaskOutcome::Failure(TaskFailure::internal()));
        assert_eq!(task.state(), TaskState::Completed);
        let responses = writer.responses.lock().unwrap();
        assert_eq!(responses[0].failure_kind(), Some(FailureKind::InternalFault));
    }

    #[tokio::test]
    async fn closed_connection_suppresses_response() {
        let gate = CountingGate::returning(Ok(OperationValue::Count(1)));
        let (conn, writer) = connection(CallerContext::unrestricted("dev"));
        conn.close();
        let mut task = MessageTask::<Size>::new(size_message("orders"), conn, context(gate.clone()));

        let outcome = task.run().await;
        assert!(outcome.is_success());
        assert_eq!(gate.submits.load(Ordering::SeqCst), 1);
        assert!(writer.responses.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_run_is_rejected() {
        let gate = CountingGate::returning(Ok(OperationValue::Count(1)));
        let (conn, writer) = connection(CallerContext::unrestricted("dev"));
        let mut task = MessageTask::<Size>::new(size_message("orders"), conn, context(gate.clone()));

        task.run().await;
        let again = task.run().await;
        assert_eq!(again.failure_kind(), Some(FailureKind::InternalFault));
        assert_eq!(gate.submits.load(Ordering::SeqCst), 1);
        assert_eq!(writer.responses.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn set_expiry_policy_submits_single_operation() {
        struct CapturingGate(Mutex<Vec<InternalOperation>>);
        impl ExecutionGate for CapturingGate {
            fn submit(&self, operation: InternalOperation) -> Submission {
                self.0.lock().unwrap().push(operation);
                Box::pin(async { Ok(OperationValue::Bool(true)) })
            }
        }

        let gate = Arc::new(CapturingGate(Mutex::new(Vec::new())));
        let caller = CallerContext::new(
            "app",
            [Grant::new(
                TargetPattern::parse("orders"),
                [ActionKind::Remove].into_iter().collect(),
            )],
        );
        let (conn, _writer) = connection(caller);
        let msg = RawMessage::new(
            12,
            MessageType::from_static("cache.set_expiry_policy"),
            json!({"name": "orders", "keys": ["azE=", "azI="], "expiry_policy": {"creation_ms": 10}}),
        );
        let mut task = MessageTask::<SetExpiryPolicy>::new(msg, conn, context(gate.clone()));

        assert_eq!(task.run().await, TaskOutcome::Success(json!(true)));
        let ops = gate.0.lock().unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(
            ops[0].operation(),
            &CacheOperation::SetExpiryPolicy {
                keys: vec![Data::from("k1"), Data::from("k2")],
                expiry_policy: ExpiryPolicy {
                    creation_ms: Some(10),
                    ..ExpiryPolicy::eternal()
                },
            }
        );
    }

    #[tokio::test]
    async fn close_while_dispatched_drops_response() {
        use tokio::sync::oneshot;

        struct HeldGate {
            submits: AtomicUsize,
            submitted: Mutex<Option<oneshot::Sender<()>>>,
            release: Mutex<Option<oneshot::Receiver<()>>>,
        }

        impl ExecutionGate for HeldGate {
            fn submit(&self, _operation: InternalOperation) -> Submission {
                self.submits.fetch_add(1, Ordering::SeqCst);
                if let Some(submitted) = self.submitted.lock().unwrap().take() {
                    let _ = submitted.send(());
                }
                let release = self.release.lock().unwrap().take();
                Box::pin(async move {
                    if let Some(release) = release {
                        let _ = release.await;
                    }
                    Ok(OperationValue::Count(3))
                })
            }
        }

        let (submitted_tx, submitted_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        let gate = Arc::new(HeldGate {
            submits: AtomicUsize::new(0),
            submitted: Mutex::new(Some(submitted_tx)),
            release: Mutex::new(Some(release_rx)),
        });
        let (conn, writer) = connection(CallerContext::unrestricted("dev"));
        let mut task =
            MessageTask::<Size>::new(size_message("orders"), Arc::clone(&conn), context(gate.clone()));
        let running = tokio::spawn(async move {
            let outcome = task.run().await;
            (outcome, task.state())
        });

        submitted_rx.await.unwrap();
        assert_eq!(gate.submits.load(Ordering::SeqCst), 1);
        conn.close();
        release_tx.send(()).unwrap();

        let (outcome, state) = running.await.expect("task must not panic");
        assert_eq!(outcome, TaskOutcome::Success(json!(3)));
        assert_eq!(state, TaskState::Completed);
        assert_eq!(gate.submits.load(Ordering::SeqCst), 1);
        assert!(writer.responses.lock().unwrap().is_empty());
    }
}
