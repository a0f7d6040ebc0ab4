//! Management object registry.
//!
//! Caches with management or statistics enabled expose a configuration view
//! and a statistics object under JCache-style object names:
//!
//! ```text
//! javax.cache:type=CacheStatistics,CacheManager=<manager>,Cache=<cache>
//! javax.cache:type=CacheConfiguration,CacheManager=<manager>,Cache=<cache>
//! ```
//!
//! Registration is idempotent and unregistering an absent object is a no-op.

mod statistics;

pub use statistics::{CacheStatistics, StatisticsSnapshot};

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;

use crate::data::ExpiryPolicy;

const DOMAIN: &str = "javax.cache";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManagementError {
    #[error("illegal object name for CacheManager=[{manager}], Cache=[{cache}]")]
    IllegalObjectName { manager: String, cache: String },
}

/// Which management object of a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagedObjectKind {
    Configuration,
    Statistics,
}

impl ManagedObjectKind {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Configuration => "CacheConfiguration",
            Self::Statistics => "CacheStatistics",
        }
    }
}

/// Replace the characters that would split an object-name component.
fn mbean_safe(component: &str) -> String {
    component.replace([',', ':', '=', '\n'], ".")
}

/// Pattern characters would turn the name into a query.
fn is_legal_component(component: &str) -> bool {
    !component.contains(['*', '?', '"'])
}

/// Key of a registered management object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectName(String);

impl ObjectName {
    pub fn for_cache(
        manager: &str,
        cache: &str,
        kind: ManagedObjectKind,
    ) -> Result<Self, ManagementError> {
        let manager = mbean_safe(manager);
        let cache = mbean_safe(cache);
        if !is_legal_component(&manager) || !is_legal_component(&cache) {
            return Err(ManagementError::IllegalObjectName { manager, cache });
        }
        Ok(Self(format!(
            "{DOMAIN}:type={},CacheManager={manager},Cache={cache}",
            kind.type_name()
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Object exposed through the management registry.
pub trait ManagedObject: Send + Sync {
    fn kind(&self) -> ManagedObjectKind;

    /// Current attribute values.
    fn attributes(&self) -> serde_json::Value;
}

/// Read-only view of a cache's configuration.
#[derive(Debug, Clone, Serialize)]
pub struct CacheConfigurationView {
    pub cache_manager: String,
    pub cache: String,
    pub statistics_enabled: bool,
    pub management_enabled: bool,
    pub expiry_policy: ExpiryPolicy,
}

impl ManagedObject for CacheConfigurationView {
    fn kind(&self) -> ManagedObjectKind {
        ManagedObjectKind::Configuration
    }

    fn attributes(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Name-keyed registry of management objects, sharded for concurrent access.
#[derive(Default)]
pub struct ManagementRegistry {
    objects: DashMap<ObjectName, Arc<dyn ManagedObject>>,
}

impl ManagementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `object` for the given cache unless one is already registered.
    ///
    /// Returns `Ok(false)` if the name was taken; the existing object is kept.
    pub fn register(
        &self,
        manager: &str,
        cache: &str,
        object: Arc<dyn ManagedObject>,
    ) -> Result<bool, ManagementError> {
        let name = ObjectName::for_cache(manager, cache, object.kind())?;
        match self.objects.entry(name) {
            Entry::Occupied(existing) => {
                tracing::debug!(object_name = %existing.key(), "Management object already registered");
                Ok(false)
            }
            Entry::Vacant(slot) => {
                tracing::debug!(object_name = %slot.key(), "Registered management object");
                slot.insert(object);
                Ok(true)
            }
        }
    }

    /// Unregister the object for the given cache if present.
    ///
    /// Returns whether anything was removed; a missing object is not an error.
    pub fn unregister(&self, manager: &str, cache: &str, kind: ManagedObjectKind) -> bool {
        let Ok(name) = ObjectName::for_cache(manager, cache, kind) else {
            return false;
        };
        let removed = self.objects.remove(&name).is_some();
        if removed {
            tracing::debug!(object_name = %name, "Unregistered management object");
        }
        removed
    }

    pub fn is_registered(&self, manager: &str, cache: &str, kind: ManagedObjectKind) -> bool {
        ObjectName::for_cache(manager, cache, kind)
            .map(|name| self.objects.contains_key(&name))
            .unwrap_or(false)
    }

    pub fn get(&self, name: &ObjectName) -> Option<Arc<dyn ManagedObject>> {
        self.objects.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn names(&self) -> Vec<ObjectName> {
        let mut names: Vec<ObjectName> = self.objects.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Attributes of every registered object, keyed by object name.
    pub fn snapshot(&self) -> serde_json::Map<String, serde_json::Value> {
        self.names()
            .into_iter()
            .filter_map(|name| {
                let object = self.get(&name)?;
                Some((name.to_string(), object.attributes()))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
