//! Dispatch table: message type tag -> message task.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::OwnedSemaphorePermit;
use tokio::task::JoinHandle;

use crate::bridge::protocol::{FailureKind, MessageType, RawMessage};
use crate::commands::CacheCommand;
use crate::commands::cache;
use crate::connection::Connection;
use crate::gate::ExecutionGate;
use crate::provider::ProviderRegistry;
use crate::security::{ActionKind, PermissionResolver};
use crate::task::{MessageTask, TaskContext, TaskOutcome};

type TaskFactory =
    fn(RawMessage, Arc<Connection>, Arc<TaskContext>) -> BoxFuture<'static, TaskOutcome>;

fn run_task<C: CacheCommand>(
    message: RawMessage,
    connection: Arc<Connection>,
    context: Arc<TaskContext>,
) -> BoxFuture<'static, TaskOutcome> {
    Box::pin(async move {
        let mut task = MessageTask::<C>::new(message, connection, context);
        task.run().await
    })
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("message type '{0}' is already registered")]
pub struct DuplicateCommand(pub MessageType);

struct CommandEntry {
    action: ActionKind,
    factory: TaskFactory,
}

/// Commands known to the server, keyed by wire tag.
#[derive(Default)]
pub struct CommandRegistry {
    commands: HashMap<MessageType, CommandEntry>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every cache command.
    pub fn with_cache_commands() -> Self {
        let mut registry = Self::new();
        registry.insert::<cache::Get>();
        registry.insert::<cache::GetAll>();
        registry.insert::<cache::ContainsKey>();
        registry.insert::<cache::Put>();
        registry.insert::<cache::PutIfAbsent>();
        registry.insert::<cache::Remove>();
        registry.insert::<cache::SetExpiryPolicy>();
        registry.insert::<cache::Size>();
        registry.insert::<cache::Clear>();
        registry.insert::<cache::Destroy>();
        registry
    }

    fn insert<C: CacheCommand>(&mut self) -> bool {
        if self.commands.contains_key(&C::MESSAGE_TYPE) {
            return false;
        }
        self.commands.insert(
            C::MESSAGE_TYPE,
            CommandEntry {
                action: C::ACTION,
                factory: run_task::<C>,
            },
        );
        true
    }

    pub fn register<C: CacheCommand>(&mut self) -> Result<(), DuplicateCommand> {
        if self.insert::<C>() {
            Ok(())
        } else {
            Err(DuplicateCommand(C::MESSAGE_TYPE))
        }
    }

    pub fn contains(&self, message_type: &MessageType) -> bool {
        self.commands.contains_key(message_type)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Permission table derived from the registered commands.
    pub fn permission_resolver(&self) -> PermissionResolver {
        self.commands
            .iter()
            .map(|(message_type, entry)| (message_type.clone(), entry.action))
            .collect()
    }
}

/// Routes inbound messages to message tasks.
pub struct Dispatcher {
    commands: HashMap<MessageType, TaskFactory>,
    context: Arc<TaskContext>,
}

impl Dispatcher {
    pub fn new(
        registry: CommandRegistry,
        providers: Arc<ProviderRegistry>,
        gate: Arc<dyn ExecutionGate>,
    ) -> Self {
        let resolver = Arc::new(registry.permission_resolver());
        let commands = registry
            .commands
            .into_iter()
            .map(|(message_type, entry)| (message_type, entry.factory))
            .collect();
        Self {
            commands,
            context: Arc::new(TaskContext {
                providers,
                resolver,
                gate,
            }),
        }
    }

    fn task(&self, message: RawMessage, connection: Arc<Connection>) -> BoxFuture<'static, TaskOutcome> {
        match self.commands.get(message.message_type()) {
            Some(factory) => factory(message, connection, Arc::clone(&self.context)),
            None => Box::pin(async move {
                tracing::warn!(
                    connection_id = %connection.id(),
                    correlation_id = message.correlation_id(),
                    message_type = %message.message_type(),
                    "Unknown message type"
                );
                let outcome = TaskOutcome::failure(
                    FailureKind::MalformedMessage,
                    format!("unknown message type '{}'", message.message_type()),
                );
                connection
                    .send(outcome.to_response(message.correlation_id()))
                    .await;
                outcome
            }),
        }
    }

    /// Run the message's task to completion on the current task.
    pub async fn handle(&self, message: RawMessage, connection: Arc<Connection>) -> TaskOutcome {
        self.task(message, connection).await
    }

    /// Spawn the message's task on the runtime.
    pub fn dispatch(&self, message: RawMessage, connection: Arc<Connection>) -> JoinHandle<TaskOutcome> {
        tokio::spawn(self.task(message, connection))
    }

    /// Spawn the message's task, holding `permit` until it completes.
    pub fn dispatch_with_permit(
        &self,
        message: RawMessage,
        connection: Arc<Connection>,
        permit: OwnedSemaphorePermit,
    ) -> JoinHandle<TaskOutcome> {
        let task = self.task(message, connection);
        tokio::spawn(async move {
            let outcome = task.await;
            drop(permit);
            outcome
        })
    }
}
