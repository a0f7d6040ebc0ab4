//! Cache commands.

use serde::{Deserialize, Serialize};

use super::CacheCommand;
use crate::bridge::protocol::MessageType;
use crate::codec::{self, CodecError};
use crate::data::{Data, ExpiryPolicy};
use crate::operation::{InternalOperation, OperationValue};
use crate::provider::OperationProvider;
use crate::security::ActionKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NameParameters {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GetParameters {
    pub name: String,
    pub key: Data,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_policy: Option<ExpiryPolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GetAllParameters {
    pub name: String,
    pub keys: Vec<Data>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_policy: Option<ExpiryPolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContainsKeyParameters {
    pub name: String,
    pub key: Data,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PutParameters {
    pub name: String,
    pub key: Data,
    pub value: Data,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_policy: Option<ExpiryPolicy>,
    /// Return the previous value.
    #[serde(default)]
    pub get: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PutIfAbsentParameters {
    pub name: String,
    pub key: Data,
    pub value: Data,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_policy: Option<ExpiryPolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoveParameters {
    pub name: String,
    pub key: Data,
    /// Only remove if the current value equals this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Data>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetExpiryPolicyParameters {
    pub name: String,
    pub keys: Vec<Data>,
    pub expiry_policy: ExpiryPolicy,
}

pub struct Get;

impl CacheCommand for Get {
    type Parameters = GetParameters;

    const MESSAGE_TYPE: MessageType = MessageType::from_static("cache.get");
    const METHOD_NAME: &'static str = "get";
    const ACTION: ActionKind = ActionKind::Read;

    fn distributed_object_name(parameters: &GetParameters) -> &str {
        &parameters.name
    }

    fn prepare_operation(
        parameters: &GetParameters,
        provider: &dyn OperationProvider,
    ) -> InternalOperation {
        provider.create_get_operation(parameters.key.clone(), parameters.expiry_policy)
    }

    fn encode_response(value: OperationValue) -> Result<serde_json::Value, CodecError> {
        codec::encode_data(value)
    }
}

pub struct GetAll;

impl CacheCommand for GetAll {
    type Parameters = GetAllParameters;

    const MESSAGE_TYPE: MessageType = MessageType::from_static("cache.get_all");
    const METHOD_NAME: &'static str = "getAll";
    const ACTION: ActionKind = ActionKind::Read;

    fn distributed_object_name(parameters: &GetAllParameters) -> &str {
        &parameters.name
    }

    fn prepare_operation(
        parameters: &GetAllParameters,
        provider: &dyn OperationProvider,
    ) -> InternalOperation {
        provider.create_get_all_operation(parameters.keys.clone(), parameters.expiry_policy)
    }

    fn encode_response(value: OperationValue) -> Result<serde_json::Value, CodecError> {
        codec::encode_entries(value)
    }
}

pub struct ContainsKey;

impl CacheCommand for ContainsKey {
    type Parameters = ContainsKeyParameters;

    const MESSAGE_TYPE: MessageType = MessageType::from_static("cache.contains_key");
    const METHOD_NAME: &'static str = "containsKey";
    const ACTION: ActionKind = ActionKind::Read;

    fn distributed_object_name(parameters: &ContainsKeyParameters) -> &str {
        &parameters.name
    }

    fn prepare_operation(
        parameters: &ContainsKeyParameters,
        provider: &dyn OperationProvider,
    ) -> InternalOperation {
        provider.create_contains_key_operation(parameters.key.clone())
    }

    fn encode_response(value: OperationValue) -> Result<serde_json::Value, CodecError> {
        codec::encode_bool(value)
    }
}

pub struct Put;

impl CacheCommand for Put {
    type Parameters = PutParameters;

    const MESSAGE_TYPE: MessageType = MessageType::from_static("cache.put");
    const METHOD_NAME: &'static str = "put";
    const ACTION: ActionKind = ActionKind::Put;

    fn distributed_object_name(parameters: &PutParameters) -> &str {
        &parameters.name
    }

    fn prepare_operation(
        parameters: &PutParameters,
        provider: &dyn OperationProvider,
    ) -> InternalOperation {
        provider.create_put_operation(
            parameters.key.clone(),
            parameters.value.clone(),
            parameters.expiry_policy,
            parameters.get,
        )
    }

    fn encode_response(value: OperationValue) -> Result<serde_json::Value, CodecError> {
        codec::encode_data(value)
    }
}

pub struct PutIfAbsent;

impl CacheCommand for PutIfAbsent {
    type Parameters = PutIfAbsentParameters;

    const MESSAGE_TYPE: MessageType = MessageType::from_static("cache.put_if_absent");
    const METHOD_NAME: &'static str = "putIfAbsent";
    const ACTION: ActionKind = ActionKind::Put;

    fn distributed_object_name(parameters: &PutIfAbsentParameters) -> &str {
        &parameters.name
    }

    fn prepare_operation(
        parameters: &PutIfAbsentParameters,
        provider: &dyn OperationProvider,
    ) -> InternalOperation {
        provider.create_put_if_absent_operation(
            parameters.key.clone(),
            parameters.value.clone(),
            parameters.expiry_policy,
        )
    }

    fn encode_response(value: OperationValue) -> Result<serde_json::Value, CodecError> {
        codec::encode_bool(value)
    }
}

pub struct Remove;

impl CacheCommand for Remove {
    type Parameters = RemoveParameters;

    const MESSAGE_TYPE: MessageType = MessageType::from_static("cache.remove");
    const METHOD_NAME: &'static str = "remove";
    const ACTION: ActionKind = ActionKind::Remove;

    fn distributed_object_name(parameters: &RemoveParameters) -> &str {
        &parameters.name
    }

    fn prepare_operation(
        parameters: &RemoveParameters,
        provider: &dyn OperationProvider,
    ) -> InternalOperation {
        provider.create_remove_operation(parameters.key.clone(), parameters.expected.clone())
    }

    fn encode_response(value: OperationValue) -> Result<serde_json::Value, CodecError> {
        codec::encode_bool(value)
    }
}

/// Attach an expiry policy to a set of keys.
///
/// Guarded by the remove action: a zero-duration policy evicts the entries.
pub struct SetExpiryPolicy;

impl CacheCommand for SetExpiryPolicy {
    type Parameters = SetExpiryPolicyParameters;

    const MESSAGE_TYPE: MessageType = MessageType::from_static("cache.set_expiry_policy");
    const METHOD_NAME: &'static str = "setExpiryPolicy";
    const ACTION: ActionKind = ActionKind::Remove;

    fn distributed_object_name(parameters: &SetExpiryPolicyParameters) -> &str {
        &parameters.name
    }

    fn prepare_operation(
        parameters: &SetExpiryPolicyParameters,
        provider: &dyn OperationProvider,
    ) -> InternalOperation {
        provider.create_set_expiry_policy_operation(parameters.keys.clone(), parameters.expiry_policy)
    }

    fn encode_response(value: OperationValue) -> Result<serde_json::Value, CodecError> {
        codec::encode_bool(value)
    }

    fn parameters(parameters: &SetExpiryPolicyParameters) -> serde_json::Value {
        serde_json::json!({
            "keys": parameters.keys,
            "expiry_policy": parameters.expiry_policy,
        })
    }
}

pub struct Size;

impl CacheCommand for Size {
    type Parameters = NameParameters;

    const MESSAGE_TYPE: MessageType = MessageType::from_static("cache.size");
    const METHOD_NAME: &'static str = "size";
    const ACTION: ActionKind = ActionKind::Read;

    fn distributed_object_name(parameters: &NameParameters) -> &str {
        &parameters.name
    }

    fn prepare_operation(
        _parameters: &NameParameters,
        provider: &dyn OperationProvider,
    ) -> InternalOperation {
        provider.create_size_operation()
    }

    fn encode_response(value: OperationValue) -> Result<serde_json::Value, CodecError> {
        codec::encode_count(value)
    }
}

pub struct Clear;

impl CacheCommand for Clear {
    type Parameters = NameParameters;

    const MESSAGE_TYPE: MessageType = MessageType::from_static("cache.clear");
    const METHOD_NAME: &'static str = "clear";
    const ACTION: ActionKind = ActionKind::Remove;

    fn distributed_object_name(parameters: &NameParameters) -> &str {
        &parameters.name
    }

    fn prepare_operation(
        _parameters: &NameParameters,
        provider: &dyn OperationProvider,
    ) -> InternalOperation {
        provider.create_clear_operation()
    }

    fn encode_response(value: OperationValue) -> Result<serde_json::Value, CodecError> {
        codec::encode_unit(value)
    }
}

pub struct Destroy;

impl CacheCommand for Destroy {
    type Parameters = NameParameters;

    const MESSAGE_TYPE: MessageType = MessageType::from_static("cache.destroy");
    const METHOD_NAME: &'static str = "destroy";
    const ACTION: ActionKind = ActionKind::Destroy;

    fn distributed_object_name(parameters: &NameParameters) -> &str {
        &parameters.name
    }

    fn prepare_operation(
        _parameters: &NameParameters,
        provider: &dyn OperationProvider,
    ) -> InternalOperation {
        provider.create_destroy_operation()
    }

    fn encode_response(value: OperationValue) -> Result<serde_json::Value, CodecError> {
        codec::encode_unit(value)
    }
}
