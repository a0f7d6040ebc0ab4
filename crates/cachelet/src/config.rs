//! Server configuration.
//!
//! Loaded from an optional JSON file; every section has defaults so an empty
//! file (or no file) yields a working single-node setup with security disabled.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::bridge::codec::DEFAULT_MAX_FRAME_LENGTH;
use crate::data::ExpiryPolicy;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheletConfig {
    /// Name of the cache manager; part of every management object name.
    pub cache_manager_name: String,
    /// Reported to clients after authentication.
    pub cluster_name: Option<String>,
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub security: SecurityConfig,
    pub caches: Vec<CacheConfig>,
}

impl Default for CacheletConfig {
    fn default() -> Self {
        Self {
            cache_manager_name: "cachelet".to_string(),
            cluster_name: None,
            server: ServerConfig::default(),
            engine: EngineConfig::default(),
            security: SecurityConfig::default(),
            caches: Vec::new(),
        }
    }
}

impl CacheletConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.partition_count == 0 {
            return Err(ConfigError::Invalid(
                "engine.partition_count must be at least 1".to_string(),
            ));
        }
        if self.engine.operation_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "engine.operation_timeout_ms must be positive".to_string(),
            ));
        }
        if self.server.max_frame_length < 64 {
            return Err(ConfigError::Invalid(
                "server.max_frame_length must be at least 64 bytes".to_string(),
            ));
        }
        if self.server.response_queue_depth == 0 {
            return Err(ConfigError::Invalid(
                "server.response_queue_depth must be at least 1".to_string(),
            ));
        }
        if self.server.max_in_flight_requests == 0 {
            return Err(ConfigError::Invalid(
                "server.max_in_flight_requests must be at least 1".to_string(),
            ));
        }
        let mut names = HashSet::new();
        for cache in &self.caches {
            if cache.name.is_empty() {
                return Err(ConfigError::Invalid("cache name must not be empty".to_string()));
            }
            if !names.insert(cache.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "cache '{}' is configured twice",
                    cache.name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_frame_length: usize,
    /// Responses buffered per connection before tasks wait on the writer.
    pub response_queue_depth: usize,
    /// Requests of one connection running at once; further frames are not
    /// read until one completes.
    pub max_in_flight_requests: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5701,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            response_queue_depth: 1024,
            max_in_flight_requests: 256,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub partition_count: u32,
    pub operation_timeout_ms: u64,
    /// Retries for transiently unavailable targets (0 disables retrying).
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            partition_count: 271,
            operation_timeout_ms: 120_000,
            max_retries: 5,
            retry_backoff_ms: 50,
        }
    }
}

impl EngineConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecurityConfig {
    pub enabled: bool,
    pub principals: Vec<PrincipalConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrincipalConfig {
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub grants: Vec<GrantConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GrantConfig {
    /// Exact name, `*`, or a prefix ending in `*`.
    pub target: String,
    /// Action names; `all` expands to every action.
    pub actions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    pub name: String,
    #[serde(default)]
    pub statistics_enabled: bool,
    #[serde(default)]
    pub management_enabled: bool,
    #[serde(default)]
    pub expiry_policy: ExpiryPolicy,
}

impl CacheConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            statistics_enabled: false,
            management_enabled: false,
            expiry_policy: ExpiryPolicy::eternal(),
        }
    }

    pub fn with_statistics(mut self) -> Self {
        self.statistics_enabled = true;
        self
    }

    pub fn with_management(mut self) -> Self {
        self.management_enabled = true;
        self
    }

    pub fn with_expiry_policy(mut self, policy: ExpiryPolicy) -> Self {
        self.expiry_policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = CacheletConfig::default();
        config.validate().unwrap();
        assert_eq!(config.server.port, 5701);
        assert!(!config.security.enabled);
        assert!(config.caches.is_empty());
    }

    #[test]
    fn loads_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "cache_manager_name": "prod",
                "server": {{ "port": 6000 }},
                "caches": [
                    {{ "name": "orders", "statistics_enabled": true,
                       "expiry_policy": {{ "creation_ms": 60000 }} }}
                ],
                "security": {{
                    "enabled": true,
                    "principals": [
                        {{ "username": "app", "password": "pw",
                           "grants": [{{ "target": "orders", "actions": ["read", "put"] }}] }}
                    ]
                }}
            }}"#
        )
        .unwrap();

        let config = CacheletConfig::from_file(file.path()).unwrap();
        assert_eq!(config.cache_manager_name, "prod");
        assert_eq!(config.server.port, 6000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.caches.len(), 1);
        assert!(config.caches[0].statistics_enabled);
        assert!(!config.caches[0].management_enabled);
        assert_eq!(config.caches[0].expiry_policy.creation_ms, Some(60_000));
        assert!(config.security.enabled);
        assert_eq!(config.security.principals[0].grants[0].actions.len(), 2);
    }

    #[test]
    fn rejects_unknown_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "server": {{ "prot": 1 }} }}"#).unwrap();
        let err = CacheletConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = CacheletConfig::from_file(Path::new("/nonexistent/cachelet.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn rejects_duplicate_cache_names() {
        let config = CacheletConfig {
            caches: vec![CacheConfig::new("orders"), CacheConfig::new("orders")],
            ..CacheletConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("configured twice"));
    }

    #[test]
    fn rejects_zero_in_flight_limit() {
        let mut config = CacheletConfig::default();
        config.server.max_in_flight_requests = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_in_flight_requests"));
    }

    #[test]
    fn rejects_zero_partitions() {
        let mut config = CacheletConfig::default();
        config.engine.partition_count = 0;
        assert!(config.validate().is_err());
    }
}
