//! Wire protocol types for client connections.
//!
//! Every frame on a client connection is one of:
//! - **RawMessage** (client → server): correlation id, message type tag, protocol version, payload
//! - **ResponseMessage** (server → client): correlation id plus either a value or a failure
//!
//! Responses for one connection may arrive in any order; clients match them by
//! correlation id.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::version::PROTOCOL_VERSION;

/// Client-chosen identifier pairing a response with its request.
pub type CorrelationId = u64;

/// Unique identifier for a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Operation-type tag carried by every request frame.
///
/// The tag is an open string on the wire; commands the server knows about are
/// registered in the dispatcher's command table under their tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageType(Cow<'static, str>);

impl MessageType {
    /// First frame on every connection.
    pub const AUTHENTICATE: MessageType = MessageType::from_static("client.authenticate");

    pub const fn from_static(tag: &'static str) -> Self {
        Self(Cow::Borrowed(tag))
    }

    pub fn new(tag: impl Into<String>) -> Self {
        Self(Cow::Owned(tag.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn default_version() -> u8 {
    PROTOCOL_VERSION
}

/// Inbound request frame. Immutable once received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    correlation_id: CorrelationId,
    message_type: MessageType,
    #[serde(default = "default_version")]
    version: u8,
    #[serde(default)]
    payload: serde_json::Value,
}

impl RawMessage {
    pub fn new(
        correlation_id: CorrelationId,
        message_type: MessageType,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            correlation_id,
            message_type,
            version: PROTOCOL_VERSION,
            payload,
        }
    }

    pub fn with_version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn message_type(&self) -> &MessageType {
        &self.message_type
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }
}

/// Failure kinds surfaced to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Request did not match the expected shape. Not retried.
    MalformedMessage,
    /// Caller lacks the required capability. Terminal.
    PermissionDenied,
    /// Target distributed object does not exist (may be transient).
    UnknownDistributedObject,
    /// Engine timed out or the target was unavailable. Retry with backoff.
    ServiceUnavailable,
    /// Unexpected server-side failure. Details are only logged.
    InternalFault,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MalformedMessage => "malformed_message",
            Self::PermissionDenied => "permission_denied",
            Self::UnknownDistributedObject => "unknown_distributed_object",
            Self::ServiceUnavailable => "service_unavailable",
            Self::InternalFault => "internal_fault",
        }
    }

    /// Whether a client may reasonably retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UnknownDistributedObject | Self::ServiceUnavailable
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a response frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResponseBody {
    Ok { value: serde_json::Value },
    Error { kind: FailureKind, message: String },
}

/// Outbound response frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub correlation_id: CorrelationId,
    #[serde(flatten)]
    pub body: ResponseBody,
}

impl ResponseMessage {
    pub fn ok(correlation_id: CorrelationId, value: serde_json::Value) -> Self {
        Self {
            correlation_id,
            body: ResponseBody::Ok { value },
        }
    }

    pub fn error(correlation_id: CorrelationId, kind: FailureKind, message: String) -> Self {
        Self {
            correlation_id,
            body: ResponseBody::Error { kind, message },
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.body, ResponseBody::Ok { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match &self.body {
            ResponseBody::Ok { .. } => None,
            ResponseBody::Error { kind, .. } => Some(*kind),
        }
    }
}

/// Payload of the `client.authenticate` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthenticateRequest {
    pub username: String,
    #[serde(default)]
    pub password: String,
}
