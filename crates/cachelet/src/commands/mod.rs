//! Per-command extension points of the message task pipeline.
//!
//! A command supplies four things: how to decode its parameters, which
//! distributed object and action it needs, how to build its internal
//! operation, and how to encode the result. Everything else is shared.

pub mod cache;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::bridge::protocol::{MessageType, RawMessage};
use crate::codec::{self, CodecError};
use crate::operation::{InternalOperation, OperationValue};
use crate::provider::OperationProvider;
use crate::security::ActionKind;

pub trait CacheCommand: Send + Sync + 'static {
    type Parameters: DeserializeOwned + Serialize + Send + Sync + 'static;

    /// Wire tag the command is registered under.
    const MESSAGE_TYPE: MessageType;
    /// Client API method name, used in audit logs.
    const METHOD_NAME: &'static str;
    /// Action checked against the caller's grants on the target object.
    const ACTION: ActionKind;

    fn decode(message: &RawMessage) -> Result<Self::Parameters, CodecError> {
        let parameters: Self::Parameters = codec::decode_payload(message)?;
        codec::require_name(Self::distributed_object_name(&parameters))?;
        Ok(parameters)
    }

    fn distributed_object_name(parameters: &Self::Parameters) -> &str;

    fn prepare_operation(
        parameters: &Self::Parameters,
        provider: &dyn OperationProvider,
    ) -> InternalOperation;

    fn encode_response(value: OperationValue) -> Result<serde_json::Value, CodecError>;

    /// Parameters as JSON for audit logging.
    fn parameters(parameters: &Self::Parameters) -> serde_json::Value {
        serde_json::to_value(parameters).unwrap_or(serde_json::Value::Null)
    }
}
