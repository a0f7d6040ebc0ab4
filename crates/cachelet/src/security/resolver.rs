//! Permission resolver: command tag + target name -> capability requirement.

use std::collections::HashMap;

use super::action::ActionKind;
use super::context::CapabilityRequirement;
use crate::bridge::protocol::MessageType;

/// Resolver was asked about a tag missing from the command table.
///
/// The table is derived from the registered commands, so this indicates a
/// wiring bug rather than bad client input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no permission mapping for message type '{0}'")]
pub struct UnknownCommand(pub MessageType);

/// Maps each known command to the action it requires.
#[derive(Debug, Clone, Default)]
pub struct PermissionResolver {
    actions: HashMap<MessageType, ActionKind>,
}

impl PermissionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_action(mut self, message_type: MessageType, action: ActionKind) -> Self {
        self.actions.insert(message_type, action);
        self
    }

    pub fn required_capability(
        &self,
        message_type: &MessageType,
        target: &str,
    ) -> Result<CapabilityRequirement, UnknownCommand> {
        self.actions
            .get(message_type)
            .map(|action| CapabilityRequirement::new(target, *action))
            .ok_or_else(|| UnknownCommand(message_type.clone()))
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl FromIterator<(MessageType, ActionKind)> for PermissionResolver {
    fn from_iter<T: IntoIterator<Item = (MessageType, ActionKind)>>(iter: T) -> Self {
        Self {
            actions: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SET_EXPIRY: MessageType = MessageType::from_static("cache.set_expiry_policy");

    #[test]
    fn resolves_known_command() {
        let resolver = PermissionResolver::new().with_action(SET_EXPIRY, ActionKind::Remove);
        let req = resolver.required_capability(&SET_EXPIRY, "orders").unwrap();
        assert_eq!(req, CapabilityRequirement::new("orders", ActionKind::Remove));
    }

    #[test]
    fn resolution_is_deterministic() {
        let resolver = PermissionResolver::new().with_action(SET_EXPIRY, ActionKind::Remove);
        let a = resolver.required_capability(&SET_EXPIRY, "orders").unwrap();
        let b = resolver.required_capability(&SET_EXPIRY, "orders").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn unknown_command_is_an_error() {
        let resolver = PermissionResolver::new();
        let err = resolver
            .required_capability(&MessageType::from_static("cache.fly"), "orders")
            .unwrap_err();
        assert_eq!(err.to_string(), "no permission mapping for message type 'cache.fly'");
    }
}
