//! Operation providers and the shared provider registry.
//!
//! A provider is published per distributed object when it is created and
//! retired when it is destroyed. Message tasks look providers up on every
//! request, so lookups read an immutable snapshot (arc-swap) and never wait on
//! a concurrent create/destroy.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::data::{Data, ExpiryPolicy};
use crate::operation::{CacheOperation, InternalOperation, OperationTarget, PartitionId};

/// Per-cache factory for internal operations.
pub trait OperationProvider: Send + Sync {
    fn name(&self) -> &str;

    fn create_get_operation(&self, key: Data, expiry_policy: Option<ExpiryPolicy>)
    -> InternalOperation;

    fn create_get_all_operation(
        &self,
        keys: Vec<Data>,
        expiry_policy: Option<ExpiryPolicy>,
    ) -> InternalOperation;

    fn create_contains_key_operation(&self, key: Data) -> InternalOperation;

    fn create_put_operation(
        &self,
        key: Data,
        value: Data,
        expiry_policy: Option<ExpiryPolicy>,
        return_previous: bool,
    ) -> InternalOperation;

    fn create_put_if_absent_operation(
        &self,
        key: Data,
        value: Data,
        expiry_policy: Option<ExpiryPolicy>,
    ) -> InternalOperation;

    fn create_remove_operation(&self, key: Data, expected: Option<Data>) -> InternalOperation;

    fn create_set_expiry_policy_operation(
        &self,
        keys: Vec<Data>,
        expiry_policy: ExpiryPolicy,
    ) -> InternalOperation;

    fn create_size_operation(&self) -> InternalOperation;

    fn create_clear_operation(&self) -> InternalOperation;

    fn create_destroy_operation(&self) -> InternalOperation;
}

/// Provider for caches served by the partitioned engine.
pub struct CacheOperationProvider {
    name: String,
    partition_count: u32,
}

impl CacheOperationProvider {
    pub fn new(name: impl Into<String>, partition_count: u32) -> Self {
        Self {
            name: name.into(),
            partition_count,
        }
    }

    fn keyed(&self, key: &Data, operation: CacheOperation) -> InternalOperation {
        let partition = PartitionId::for_key(key, self.partition_count);
        InternalOperation::new(&self.name, OperationTarget::Partition(partition), operation)
    }

    fn cache_wide(&self, operation: CacheOperation) -> InternalOperation {
        InternalOperation::new(&self.name, OperationTarget::Cache, operation)
    }
}

impl OperationProvider for CacheOperationProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_get_operation(
        &self,
        key: Data,
        expiry_policy: Option<ExpiryPolicy>,
    ) -> InternalOperation {
        self.keyed(&key.clone(), CacheOperation::Get { key, expiry_policy })
    }

    fn create_get_all_operation(
        &self,
        keys: Vec<Data>,
        expiry_policy: Option<ExpiryPolicy>,
    ) -> InternalOperation {
        self.cache_wide(CacheOperation::GetAll {
            keys,
            expiry_policy,
        })
    }

    fn create_contains_key_operation(&self, key: Data) -> InternalOperation {
        self.keyed(&key.clone(), CacheOperation::ContainsKey { key })
    }

    fn create_put_operation(
        &self,
        key: Data,
        value: Data,
        expiry_policy: Option<ExpiryPolicy>,
        return_previous: bool,
    ) -> InternalOperation {
        self.keyed(
            &key.clone(),
            CacheOperation::Put {
                key,
                value,
                expiry_policy,
                return_previous,
            },
        )
    }

    fn create_put_if_absent_operation(
        &self,
        key: Data,
        value: Data,
        expiry_policy: Option<ExpiryPolicy>,
    ) -> InternalOperation {
        self.keyed(
            &key.clone(),
            CacheOperation::PutIfAbsent {
                key,
                value,
                expiry_policy,
            },
        )
    }

    fn create_remove_operation(&self, key: Data, expected: Option<Data>) -> InternalOperation {
        self.keyed(&key.clone(), CacheOperation::Remove { key, expected })
    }

    fn create_set_expiry_policy_operation(
        &self,
        keys: Vec<Data>,
        expiry_policy: ExpiryPolicy,
    ) -> InternalOperation {
        self.cache_wide(CacheOperation::SetExpiryPolicy {
            keys,
            expiry_policy,
        })
    }

    fn create_size_operation(&self) -> InternalOperation {
        self.cache_wide(CacheOperation::Size)
    }

    fn create_clear_operation(&self) -> InternalOperation {
        self.cache_wide(CacheOperation::Clear)
    }

    fn create_destroy_operation(&self) -> InternalOperation {
        self.cache_wide(CacheOperation::Destroy)
    }
}

type ProviderMap = HashMap<String, Arc<dyn OperationProvider>>;

/// Name -> provider registry with snapshot reads.
pub struct ProviderRegistry {
    providers: ArcSwap<ProviderMap>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Look up the provider for `name` in the current snapshot.
    pub fn get(&self, name: &str) -> Option<Arc<dyn OperationProvider>> {
        self.providers.load().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.load().contains_key(name)
    }

    /// Publish a provider under its name. Returns false (and keeps the existing
    /// provider) if the name is already taken.
    pub fn publish(&self, provider: Arc<dyn OperationProvider>) -> bool {
        let name = provider.name().to_string();
        let mut published = false;
        self.providers.rcu(|current| {
            published = false;
            if current.contains_key(&name) {
                return Arc::clone(current);
            }
            let mut next = ProviderMap::clone(current);
            next.insert(name.clone(), Arc::clone(&provider));
            published = true;
            Arc::new(next)
        });
        published
    }

    /// Remove the provider for `name`, returning it if it was present.
    pub fn retire(&self, name: &str) -> Option<Arc<dyn OperationProvider>> {
        let mut retired = None;
        self.providers.rcu(|current| {
            retired = current.get(name).cloned();
            if retired.is_none() {
                return Arc::clone(current);
            }
            let mut next = ProviderMap::clone(current);
            next.remove(name);
            Arc::new(next)
        });
        retired
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.load().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.providers.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.load().is_empty()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(name: &str) -> Arc<dyn OperationProvider> {
        Arc::new(CacheOperationProvider::new(name, 16))
    }

    #[test]
    fn publish_then_get() {
        let registry = ProviderRegistry::new();
        assert!(registry.publish(provider("orders")));

        let found = registry.get("orders").unwrap();
        assert_eq!(found.name(), "orders");
        assert!(registry.get("users").is_none());
    }

    #[test]
    fn publish_twice_keeps_first() {
        let registry = ProviderRegistry::new();
        let first = provider("orders");
        assert!(registry.publish(Arc::clone(&first)));
        assert!(!registry.publish(provider("orders")));

        let found = registry.get("orders").unwrap();
        assert!(Arc::ptr_eq(&found, &first));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn retire_removes_and_is_idempotent() {
        let registry = ProviderRegistry::new();
        registry.publish(provider("orders"));

        assert!(registry.retire("orders").is_some());
        assert!(registry.retire("orders").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn snapshot_survives_concurrent_retire() {
        let registry = ProviderRegistry::new();
        registry.publish(provider("orders"));

        let held = registry.get("orders").unwrap();
        registry.retire("orders");

        // The task that already resolved the provider can still build operations.
        let op = held.create_size_operation();
        assert_eq!(op.cache(), "orders");
        assert!(!registry.contains("orders"));
    }

    #[test]
    fn concurrent_publish_and_lookup() {
        let registry = Arc::new(ProviderRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let name = format!("cache-{i}");
                    assert!(registry.publish(provider(&name)));
                    assert!(registry.get(&name).is_some());
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.len(), 8);
        assert_eq!(registry.names()[0], "cache-0");
    }

    #[test]
    fn keyed_operations_target_a_partition() {
        let provider = CacheOperationProvider::new("orders", 16);
        let op = provider.create_get_operation(Data::from("k1"), None);
        assert!(matches!(op.target(), OperationTarget::Partition(p) if p.get() < 16));

        let op = provider.create_set_expiry_policy_operation(
            vec![Data::from("k1"), Data::from("k2")],
            ExpiryPolicy::eternal(),
        );
        assert_eq!(op.target(), OperationTarget::Cache);
    }
}
