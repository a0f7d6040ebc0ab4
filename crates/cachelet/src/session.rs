//! Connection handshake.
//!
//! The first frame on a connection must be `client.authenticate`. Anything
//! else, or failed credentials, is answered with an error and the connection
//! is closed.

use std::sync::Arc;

use serde::Serialize;

use crate::bridge::protocol::{
    AuthenticateRequest, FailureKind, MessageType, RawMessage, ResponseMessage,
};
use crate::codec;
use crate::security::{CallerContext, SecurityRealm};
use crate::version::VersionInfo;

/// Value of a successful `client.authenticate` response.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub principal: String,
    pub server: VersionInfo,
}

/// Result of a successful handshake.
pub struct Handshake {
    pub caller: Arc<CallerContext>,
    pub response: ResponseMessage,
}

/// Authenticate the first frame of a connection.
///
/// On failure returns the response to send before closing.
pub fn authenticate(
    realm: &SecurityRealm,
    message: &RawMessage,
    version: &VersionInfo,
) -> Result<Handshake, ResponseMessage> {
    let correlation_id = message.correlation_id();
    if *message.message_type() != MessageType::AUTHENTICATE {
        tracing::info!(
            message_type = %message.message_type(),
            "Request before authentication"
        );
        return Err(codec::encode_failure(
            correlation_id,
            FailureKind::PermissionDenied,
            "authentication required",
        ));
    }

    let request: AuthenticateRequest = codec::decode_payload(message).map_err(|e| {
        codec::encode_failure(correlation_id, FailureKind::MalformedMessage, e.to_string())
    })?;

    let caller = realm
        .authenticate(&request.username, &request.password)
        .map_err(|e| {
            tracing::info!(error = %e, "Authentication failed");
            codec::encode_failure(
                correlation_id,
                FailureKind::PermissionDenied,
                "authentication failed",
            )
        })?;

    tracing::debug!(
        principal = caller.principal(),
        unrestricted = caller.is_unrestricted(),
        "Client authenticated"
    );
    let info = SessionInfo {
        principal: caller.principal().to_string(),
        server: version.clone(),
    };
    let value = serde_json::to_value(&info).unwrap_or(serde_json::Value::Null);
    Ok(Handshake {
        caller,
        response: codec::encode_response(correlation_id, value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GrantConfig, PrincipalConfig, SecurityConfig};
    use serde_json::json;

    fn secured_realm() -> SecurityRealm {
        SecurityRealm::from_config(&SecurityConfig {
            enabled: true,
            principals: vec![PrincipalConfig {
                username: "app".to_string(),
                password: "pw".to_string(),
                grants: vec![GrantConfig {
                    target: "*".to_string(),
                    actions: vec!["read".to_string()],
                }],
            }],
        })
        .unwrap()
    }

    fn auth(username: &str, password: &str) -> RawMessage {
        RawMessage::new(
            1,
            MessageType::AUTHENTICATE,
            json!({"username": username, "password": password}),
        )
    }

    fn version() -> VersionInfo {
        VersionInfo {
            cachelet: "0.4.0",
            protocol: 1,
            cluster: Some("dev".to_string()),
        }
    }

    #[test]
    fn valid_credentials_yield_context() {
        let handshake = authenticate(&secured_realm(), &auth("app", "pw"), &version())
            .ok()
            .unwrap();
        assert_eq!(handshake.caller.principal(), "app");
        insta::assert_json_snapshot!(handshake.response, @r#"
        {
          "correlation_id": 1,
          "status": "ok",
          "value": {
            "principal": "app",
            "server": {
              "cachelet": "0.4.0",
              "cluster": "dev",
              "protocol": 1
            }
          }
        }
        "#);
    }

    #[test]
    fn wrong_password_is_permission_denied() {
        let response = authenticate(&secured_realm(), &auth("app", "nope"), &version())
            .err()
            .unwrap();
        assert_eq!(response.failure_kind(), Some(FailureKind::PermissionDenied));
    }

    #[test]
    fn other_first_frame_is_permission_denied() {
        let msg = RawMessage::new(
            3,
            MessageType::from_static("cache.size"),
            json!({"name": "orders"}),
        );
        let response = authenticate(&SecurityRealm::disabled(), &msg, &version())
            .err()
            .unwrap();
        assert_eq!(response.correlation_id, 3);
        assert_eq!(response.failure_kind(), Some(FailureKind::PermissionDenied));
    }

    #[test]
    fn malformed_authenticate_payload() {
        let msg = RawMessage::new(4, MessageType::AUTHENTICATE, json!({"user": "app"}));
        let response = authenticate(&SecurityRealm::disabled(), &msg, &version())
            .err()
            .unwrap();
        assert_eq!(response.failure_kind(), Some(FailureKind::MalformedMessage));
    }

    #[test]
    fn disabled_security_accepts_anyone() {
        let handshake = authenticate(&SecurityRealm::disabled(), &auth("guest", ""), &version())
            .ok()
            .unwrap();
        assert!(handshake.caller.is_unrestricted());
        assert!(handshake.response.is_ok());
    }
}
