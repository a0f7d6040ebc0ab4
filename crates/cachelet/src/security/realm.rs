//! Authentication of client sessions against configured principals.

use std::collections::HashMap;
use std::sync::Arc;

use super::action::ActionSet;
use super::context::{CallerContext, Grant, TargetPattern};
use crate::config::{ConfigError, SecurityConfig};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthenticationError {
    #[error("unknown principal '{0}'")]
    UnknownPrincipal(String),
    #[error("invalid credentials for principal '{0}'")]
    InvalidCredentials(String),
}

struct PrincipalEntry {
    /// Only the digest is kept; comparing digests is constant-time.
    password_digest: blake3::Hash,
    context: Arc<CallerContext>,
}

/// Resolves credentials to a [`CallerContext`].
///
/// With security disabled every caller gets an unrestricted context.
pub struct SecurityRealm {
    enabled: bool,
    principals: HashMap<String, PrincipalEntry>,
}

impl SecurityRealm {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            principals: HashMap::new(),
        }
    }

    pub fn from_config(config: &SecurityConfig) -> Result<Self, ConfigError> {
        let mut principals = HashMap::new();
        for principal in &config.principals {
            let mut grants = Vec::with_capacity(principal.grants.len());
            for grant in &principal.grants {
                let actions = ActionSet::parse(&grant.actions).map_err(|e| {
                    ConfigError::Invalid(format!(
                        "principal '{}', target '{}': {e}",
                        principal.username, grant.target
                    ))
                })?;
                grants.push(Grant::new(TargetPattern::parse(&grant.target), actions));
            }
            let entry = PrincipalEntry {
                password_digest: blake3::hash(principal.password.as_bytes()),
                context: Arc::new(CallerContext::new(principal.username.clone(), grants)),
            };
            if principals
                .insert(principal.username.clone(), entry)
                .is_some()
            {
                return Err(ConfigError::Invalid(format!(
                    "duplicate principal '{}'",
                    principal.username
                )));
            }
        }
        Ok(Self {
            enabled: config.enabled,
            principals,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Arc<CallerContext>, AuthenticationError> {
        if !self.enabled {
            return Ok(Arc::new(CallerContext::unrestricted(username)));
        }
        let entry = self
            .principals
            .get(username)
            .ok_or_else(|| AuthenticationError::UnknownPrincipal(username.to_string()))?;
        if blake3::hash(password.as_bytes()) != entry.password_digest {
            return Err(AuthenticationError::InvalidCredentials(username.to_string()));
        }
        Ok(Arc::clone(&entry.context))
    }
}
