//! Task lifecycle states and outcomes.

use crate::bridge::protocol::{CorrelationId, FailureKind, ResponseMessage};
use crate::codec;
use crate::gate::ExecutionError;

/// Message task lifecycle. States only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskState {
    Created,
    Decoded,
    Authorized,
    Dispatched,
    Completed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Decoded => "decoded",
            Self::Authorized => "authorized",
            Self::Dispatched => "dispatched",
            Self::Completed => "completed",
        }
    }
}

/// Client-visible failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// Message sent for every internal fault; details stay in the server log.
pub const INTERNAL_FAULT_MESSAGE: &str = "internal server error";

impl TaskFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn internal() -> Self {
        Self::new(FailureKind::InternalFault, INTERNAL_FAULT_MESSAGE)
    }

    /// Map an engine error to the failure the client sees.
    pub fn from_execution(error: &ExecutionError) -> Self {
        match error {
            ExecutionError::Timeout(_) | ExecutionError::TargetUnavailable(_) => {
                Self::new(FailureKind::ServiceUnavailable, error.to_string())
            }
            ExecutionError::TargetNotFound(name) => Self::new(
                FailureKind::UnknownDistributedObject,
                format!("distributed object '{name}' not found"),
            ),
            ExecutionError::InternalFault(_) => Self::internal(),
        }
    }
}

/// Result of one message task. Exactly one of value or failure.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Success(serde_json::Value),
    Failure(TaskFailure),
}

impl TaskOutcome {
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failure(TaskFailure::new(kind, message))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Success(_) => None,
            Self::Failure(f) => Some(f.kind),
        }
    }

    pub fn to_response(&self, correlation_id: CorrelationId) -> ResponseMessage {
        match self {
            Self::Success(value) => codec::encode_response(correlation_id, value.clone()),
            Self::Failure(f) => codec::encode_failure(correlation_id, f.kind, f.message.clone()),
        }
    }
}
