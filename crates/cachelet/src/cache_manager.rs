//! Cache lifecycle: creating and destroying caches.
//!
//! Creating a cache installs its record store, registers its management
//! objects (when enabled) and publishes its operation provider, in that order,
//! so a request that can resolve a provider always finds a store. Destroying
//! retires the provider first, then drops the store and unregisters the
//! management objects.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::config::CacheConfig;
use crate::engine::CacheStore;
use crate::management::{
    CacheConfigurationView, CacheStatistics, ManagedObjectKind, ManagementError,
    ManagementRegistry, ObjectName,
};
use crate::provider::{CacheOperationProvider, ProviderRegistry};

#[derive(Debug, thiserror::Error)]
pub enum CacheManagerError {
    #[error("cache name must not be empty")]
    EmptyName,
    #[error(transparent)]
    Management(#[from] ManagementError),
}

pub struct CacheManager {
    name: String,
    partition_count: u32,
    stores: DashMap<String, Arc<CacheStore>>,
    providers: Arc<ProviderRegistry>,
    management: Arc<ManagementRegistry>,
}

impl CacheManager {
    pub fn new(
        name: impl Into<String>,
        partition_count: u32,
        providers: Arc<ProviderRegistry>,
        management: Arc<ManagementRegistry>,
    ) -> Self {
        Self {
            name: name.into(),
            partition_count: partition_count.max(1),
            stores: DashMap::new(),
            providers,
            management,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn partition_count(&self) -> u32 {
        self.partition_count
    }

    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }

    pub fn management(&self) -> &Arc<ManagementRegistry> {
        &self.management
    }

    /// Create a cache. Returns `Ok(false)` if it already exists.
    pub fn create_cache(&self, config: &CacheConfig) -> Result<bool, CacheManagerError> {
        if config.name.is_empty() {
            return Err(CacheManagerError::EmptyName);
        }
        // Reject names that cannot be registered before touching any state.
        if config.management_enabled || config.statistics_enabled {
            ObjectName::for_cache(&self.name, &config.name, ManagedObjectKind::Configuration)?;
        }

        let statistics = config
            .statistics_enabled
            .then(|| Arc::new(CacheStatistics::new()));
        let store = match self.stores.entry(config.name.clone()) {
            Entry::Occupied(_) => return Ok(false),
            Entry::Vacant(slot) => {
                let store = Arc::new(CacheStore::new(
                    &config.name,
                    self.partition_count,
                    config.expiry_policy,
                    statistics.clone(),
                ));
                slot.insert(Arc::clone(&store));
                store
            }
        };

        if let Err(e) = self.register_management(config, statistics) {
            self.stores.remove(store.name());
            return Err(e.into());
        }

        self.providers.publish(Arc::new(CacheOperationProvider::new(
            &config.name,
            self.partition_count,
        )));

        tracing::info!(
            cache_manager = %self.name,
            cache = %config.name,
            statistics = config.statistics_enabled,
            management = config.management_enabled,
            "Created cache"
        );
        Ok(true)
    }

    fn register_management(
        &self,
        config: &CacheConfig,
        statistics: Option<Arc<CacheStatistics>>,
    ) -> Result<(), ManagementError> {
        if config.management_enabled {
            let view = CacheConfigurationView {
                cache_manager: self.name.clone(),
                cache: config.name.clone(),
                statistics_enabled: config.statistics_enabled,
                management_enabled: config.management_enabled,
                expiry_policy: config.expiry_policy,
            };
            self.management
                .register(&self.name, &config.name, Arc::new(view))?;
        }
        if let Some(statistics) = statistics {
            self.management.register(&self.name, &config.name, statistics)?;
        }
        Ok(())
    }

    /// Destroy a cache. Returns whether anything was removed.
    pub fn destroy_cache(&self, name: &str) -> bool {
        let retired = self.providers.retire(name).is_some();
        let removed = self.stores.remove(name).is_some();
        self.management
            .unregister(&self.name, name, ManagedObjectKind::Configuration);
        self.management
            .unregister(&self.name, name, ManagedObjectKind::Statistics);

        if retired || removed {
            tracing::info!(cache_manager = %self.name, cache = %name, "Destroyed cache");
        }
        retired || removed
    }

    pub fn store(&self, name: &str) -> Option<Arc<CacheStore>> {
        self.stores.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn cache_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stores.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> CacheManager {
        CacheManager::new(
            "mgr",
            8,
            Arc::new(ProviderRegistry::new()),
            Arc::new(ManagementRegistry::new()),
        )
    }

    #[test]
    fn create_installs_store_provider_and_management() {
        let manager = manager();
        let config = CacheConfig::new("orders").with_statistics().with_management();
        assert!(manager.create_cache(&config).unwrap());

        assert!(manager.store("orders").is_some());
        assert!(manager.providers().get("orders").is_some());
        assert!(
            manager
                .management()
                .is_registered("mgr", "orders", ManagedObjectKind::Statistics)
        );
        assert!(
            manager
                .management()
                .is_registered("mgr", "orders", ManagedObjectKind::Configuration)
        );
    }

    #[test]
    fn create_without_management_registers_nothing() {
        let manager = manager();
        manager.create_cache(&CacheConfig::new("orders")).unwrap();
        assert!(manager.management().is_empty());
        assert!(manager.store("orders").unwrap().statistics().is_none());
    }

    #[test]
    fn create_is_idempotent() {
        let manager = manager();
        let config = CacheConfig::new("orders").with_statistics();
        assert!(manager.create_cache(&config).unwrap());
        assert!(!manager.create_cache(&config).unwrap());
        assert_eq!(manager.cache_names(), vec!["orders".to_string()]);
        assert_eq!(manager.management().len(), 1);
    }

    #[test]
    fn destroy_reverses_create() {
        let manager = manager();
        let config = CacheConfig::new("orders").with_statistics().with_management();
        manager.create_cache(&config).unwrap();

        assert!(manager.destroy_cache("orders"));
        assert!(manager.store("orders").is_none());
        assert!(manager.providers().get("orders").is_none());
        assert!(manager.management().is_empty());

        assert!(!manager.destroy_cache("orders"));
    }

    #[test]
    fn illegal_name_leaves_no_state() {
        let manager = manager();
        let err = manager
            .create_cache(&CacheConfig::new("orders*").with_management())
            .unwrap_err();
        assert!(matches!(err, CacheManagerError::Management(_)));
        assert!(manager.store("orders*").is_none());
        assert!(manager.providers().is_empty());
    }

    #[test]
    fn empty_name_is_rejected() {
        let manager = manager();
        assert!(matches!(
            manager.create_cache(&CacheConfig::new("")),
            Err(CacheManagerError::EmptyName)
        ));
    }
}
