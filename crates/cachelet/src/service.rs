//! Cache service: wires the cache manager, engine, dispatcher and security
//! realm from configuration.

use std::sync::Arc;

use tokio::sync::watch;

use crate::cache_manager::{CacheManager, CacheManagerError};
use crate::config::{CacheletConfig, ConfigError};
use crate::dispatcher::{CommandRegistry, Dispatcher};
use crate::engine::LocalEngine;
use crate::gate::{ExecutionGate, RetryConfig, RetryingGate};
use crate::management::ManagementRegistry;
use crate::provider::ProviderRegistry;
use crate::security::SecurityRealm;
use crate::version::VersionInfo;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to create cache '{cache}': {source}")]
    Cache {
        cache: String,
        #[source]
        source: CacheManagerError,
    },
}

pub struct CacheService {
    config: CacheletConfig,
    manager: Arc<CacheManager>,
    engine: Arc<LocalEngine>,
    dispatcher: Arc<Dispatcher>,
    realm: Arc<SecurityRealm>,
    version: VersionInfo,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl CacheService {
    pub fn from_config(config: CacheletConfig) -> Result<Self, StartupError> {
        config.validate()?;

        let realm = if config.security.enabled {
            SecurityRealm::from_config(&config.security)?
        } else {
            if !config.security.principals.is_empty() {
                tracing::warn!("Security disabled, configured principals are ignored");
            }
            SecurityRealm::disabled()
        };

        let providers = Arc::new(ProviderRegistry::new());
        let manager = Arc::new(CacheManager::new(
            config.cache_manager_name.clone(),
            config.engine.partition_count,
            Arc::clone(&providers),
            Arc::new(ManagementRegistry::new()),
        ));
        for cache in &config.caches {
            manager
                .create_cache(cache)
                .map_err(|source| StartupError::Cache {
                    cache: cache.name.clone(),
                    source,
                })?;
        }

        let engine = Arc::new(LocalEngine::new(
            Arc::clone(&manager),
            config.engine.operation_timeout(),
        ));
        let gate: Arc<dyn ExecutionGate> = if config.engine.max_retries > 0 {
            Arc::new(RetryingGate::new(
                Arc::clone(&engine),
                RetryConfig {
                    max_retries: config.engine.max_retries,
                    backoff_base: config.engine.retry_backoff(),
                },
            ))
        } else {
            engine.clone()
        };
        let caches = providers.names();
        let dispatcher = Arc::new(Dispatcher::new(
            CommandRegistry::with_cache_commands(),
            providers,
            gate,
        ));

        let mut version = VersionInfo::new();
        if let Some(cluster) = &config.cluster_name {
            version = version.with_cluster(cluster.clone());
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tracing::info!(
            cache_manager = %config.cache_manager_name,
            caches = ?caches,
            partitions = config.engine.partition_count,
            security = realm.is_enabled(),
            "Cache service configured"
        );

        Ok(Self {
            config,
            manager,
            engine,
            dispatcher,
            realm: Arc::new(realm),
            version,
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub fn config(&self) -> &CacheletConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<CacheManager> {
        &self.manager
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn realm(&self) -> &SecurityRealm {
        &self.realm
    }

    pub fn version(&self) -> &VersionInfo {
        &self.version
    }

    /// Request a graceful shutdown of the server.
    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Stop accepting new operations and log the final management state.
    pub fn shutdown(&self) {
        self.engine.shutdown();
        for (object_name, attributes) in self.management_snapshot() {
            tracing::info!(%object_name, %attributes, "Management object at shutdown");
        }
    }

    /// Attributes of every registered management object.
    pub fn management_snapshot(&self) -> serde_json::Map<String, serde_json::Value> {
        self.manager.management().snapshot()
    }

    pub fn is_shut_down(&self) -> bool {
        self.engine.is_shutting_down()
    }
}
