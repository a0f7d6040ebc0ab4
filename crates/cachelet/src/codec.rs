//! Message codec contract: raw request payloads to typed parameters, typed
//! results back to response frames.
//!
//! Decoding fails for payloads that do not match the command's parameter shape
//! or carry an incompatible protocol version. Encoding is total over the
//! values a command can produce; a mismatched value is a wiring bug.

use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::bridge::protocol::{CorrelationId, FailureKind, RawMessage, ResponseMessage};
use crate::operation::OperationValue;
use crate::version::PROTOCOL_VERSION;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("unsupported protocol version {found} (supported: 1..={supported})")]
    UnsupportedVersion { found: u8, supported: u8 },
    #[error("invalid payload for '{message_type}': {source}")]
    Payload {
        message_type: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("expected {expected} result, got {found}")]
    UnexpectedResponse {
        expected: &'static str,
        found: &'static str,
    },
}

/// Decode the payload of `message` into `P`.
pub fn decode_payload<P: DeserializeOwned>(message: &RawMessage) -> Result<P, CodecError> {
    let version = message.version();
    if version == 0 || version > PROTOCOL_VERSION {
        return Err(CodecError::UnsupportedVersion {
            found: version,
            supported: PROTOCOL_VERSION,
        });
    }
    P::deserialize(message.payload()).map_err(|source| CodecError::Payload {
        message_type: message.message_type().to_string(),
        source,
    })
}

/// Distributed-object names must be non-empty.
pub fn require_name(name: &str) -> Result<(), CodecError> {
    if name.is_empty() {
        return Err(CodecError::InvalidField {
            field: "name",
            reason: "must not be empty".to_string(),
        });
    }
    Ok(())
}

pub fn encode_response(correlation_id: CorrelationId, value: Value) -> ResponseMessage {
    ResponseMessage::ok(correlation_id, value)
}

pub fn encode_failure(
    correlation_id: CorrelationId,
    kind: FailureKind,
    message: impl Into<String>,
) -> ResponseMessage {
    ResponseMessage::error(correlation_id, kind, message.into())
}

fn unexpected(expected: &'static str, found: &OperationValue) -> CodecError {
    CodecError::UnexpectedResponse {
        expected,
        found: found.type_name(),
    }
}

pub fn encode_bool(value: OperationValue) -> Result<Value, CodecError> {
    match value {
        OperationValue::Bool(b) => Ok(Value::Bool(b)),
        other => Err(unexpected("bool", &other)),
    }
}

/// `Data` as a base64 string, or null.
pub fn encode_data(value: OperationValue) -> Result<Value, CodecError> {
    match value {
        OperationValue::Value(Some(data)) => Ok(Value::String(data.to_base64())),
        OperationValue::Value(None) => Ok(Value::Null),
        other => Err(unexpected("value", &other)),
    }
}

/// List of `{key, value}` objects.
pub fn encode_entries(value: OperationValue) -> Result<Value, CodecError> {
    match value {
        OperationValue::Entries(entries) => Ok(Value::Array(
            entries
                .into_iter()
                .map(|(key, value)| json!({ "key": key.to_base64(), "value": value.to_base64() }))
                .collect(),
        )),
        other => Err(unexpected("entries", &other)),
    }
}

pub fn encode_count(value: OperationValue) -> Result<Value, CodecError> {
    match value {
        OperationValue::Count(n) => Ok(json!(n)),
        other => Err(unexpected("count", &other)),
    }
}

pub fn encode_unit(value: OperationValue) -> Result<Value, CodecError> {
    match value {
        OperationValue::Unit => Ok(Value::Null),
        other => Err(unexpected("unit", &other)),
    }
}
