//! Partitioned in-memory record store for one cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::data::{Data, ExpiryPolicy};
use crate::gate::ExecutionError;
use crate::management::CacheStatistics;
use crate::operation::{CacheOperation, InternalOperation, OperationTarget, OperationValue, PartitionId};

#[derive(Debug, Clone)]
struct Record {
    value: Data,
    expires_at: Option<Instant>,
    /// Policy attached with `set_expiry_policy`; overrides the cache default.
    policy: Option<ExpiryPolicy>,
}

impl Record {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

type Partition = HashMap<Data, Record>;

/// What an expiry duration means for a record.
enum Expiry {
    Never,
    Immediately,
    At(Instant),
}

fn expiry_from(duration: Duration, now: Instant) -> Expiry {
    if duration.is_zero() {
        Expiry::Immediately
    } else {
        now.checked_add(duration).map_or(Expiry::Never, Expiry::At)
    }
}

pub struct CacheStore {
    name: String,
    default_policy: ExpiryPolicy,
    partitions: Vec<Mutex<Partition>>,
    statistics: Option<Arc<CacheStatistics>>,
}

impl CacheStore {
    pub fn new(
        name: impl Into<String>,
        partition_count: u32,
        default_policy: ExpiryPolicy,
        statistics: Option<Arc<CacheStatistics>>,
    ) -> Self {
        let partitions = (0..partition_count.max(1))
            .map(|_| Mutex::new(Partition::new()))
            .collect();
        Self {
            name: name.into(),
            default_policy,
            partitions,
            statistics,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn statistics(&self) -> Option<&Arc<CacheStatistics>> {
        self.statistics.as_ref()
    }

    fn partition_count(&self) -> u32 {
        self.partitions.len() as u32
    }

    fn lock(&self, id: PartitionId) -> Result<MutexGuard<'_, Partition>, ExecutionError> {
        let partition = self.partitions.get(id.get() as usize).ok_or_else(|| {
            ExecutionError::InternalFault(format!(
                "partition {id} out of range for cache '{}'",
                self.name
            ))
        })?;
        partition.lock().map_err(|_| {
            tracing::error!(cache = %self.name, partition = %id, "Partition mutex poisoned");
            ExecutionError::InternalFault(format!("partition {id} of cache '{}' poisoned", self.name))
        })
    }

    fn lock_key(&self, key: &Data) -> Result<MutexGuard<'_, Partition>, ExecutionError> {
        self.lock(PartitionId::for_key(key, self.partition_count()))
    }

    fn with_stats(&self, f: impl FnOnce(&CacheStatistics)) {
        if let Some(stats) = &self.statistics {
            f(stats);
        }
    }

    fn effective_policy(&self, requested: Option<ExpiryPolicy>, record: Option<&Record>) -> ExpiryPolicy {
        requested
            .or_else(|| record.and_then(|r| r.policy))
            .unwrap_or(self.default_policy)
    }

    /// Drop `key` if it has expired, then return the live record.
    fn live<'a>(&self, partition: &'a mut Partition, key: &Data, now: Instant) -> Option<&'a mut Record> {
        if partition.get(key).is_some_and(|r| r.is_expired(now)) {
            partition.remove(key);
            self.with_stats(CacheStatistics::record_expiration);
        }
        partition.get_mut(key)
    }

    /// Execute an operation routed to this cache.
    pub fn execute(&self, operation: &InternalOperation) -> Result<OperationValue, ExecutionError> {
        if let OperationTarget::Partition(id) = operation.target()
            && id.get() >= self.partition_count()
        {
            return Err(ExecutionError::InternalFault(format!(
                "partition {id} out of range for cache '{}'",
                self.name
            )));
        }

        let now = Instant::now();
        match operation.operation() {
            CacheOperation::Get { key, expiry_policy } => {
                let mut partition = self.lock_key(key)?;
                Ok(OperationValue::Value(self.get(&mut partition, key, *expiry_policy, now)))
            }
            CacheOperation::GetAll { keys, expiry_policy } => {
                let mut entries = Vec::with_capacity(keys.len());
                for key in keys {
                    let mut partition = self.lock_key(key)?;
                    if let Some(value) = self.get(&mut partition, key, *expiry_policy, now) {
                        entries.push((key.clone(), value));
                    }
                }
                Ok(OperationValue::Entries(entries))
            }
            CacheOperation::ContainsKey { key } => {
                let mut partition = self.lock_key(key)?;
                Ok(OperationValue::Bool(self.live(&mut partition, key, now).is_some()))
            }
            CacheOperation::Put {
                key,
                value,
                expiry_policy,
                return_previous,
            } => {
                let mut partition = self.lock_key(key)?;
                let previous = self.put(&mut partition, key, value, *expiry_policy, now);
                Ok(OperationValue::Value(previous.filter(|_| *return_previous)))
            }
            CacheOperation::PutIfAbsent {
                key,
                value,
                expiry_policy,
            } => {
                let mut partition = self.lock_key(key)?;
                if self.live(&mut partition, key, now).is_some() {
                    return Ok(OperationValue::Bool(false));
                }
                self.put(&mut partition, key, value, *expiry_policy, now);
                Ok(OperationValue::Bool(true))
            }
            CacheOperation::Remove { key, expected } => {
                let mut partition = self.lock_key(key)?;
                let matches = match self.live(&mut partition, key, now) {
                    Some(record) => expected.as_ref().is_none_or(|e| *e == record.value),
                    None => false,
                };
                if matches {
                    partition.remove(key);
                    self.with_stats(|s| s.record_removals(1));
                }
                Ok(OperationValue::Bool(matches))
            }
            CacheOperation::SetExpiryPolicy {
                keys,
                expiry_policy,
            } => {
                let mut updated = false;
                for key in keys {
                    let mut partition = self.lock_key(key)?;
                    updated |= self.set_expiry_policy(&mut partition, key, *expiry_policy, now);
                }
                Ok(OperationValue::Bool(updated))
            }
            CacheOperation::Size => {
                let mut count = 0u64;
                for id in 0..self.partition_count() {
                    let mut partition = self.lock(PartitionId::new(id))?;
                    let before = partition.len();
                    partition.retain(|_, record| !record.is_expired(now));
                    let expired = (before - partition.len()) as u64;
                    if expired > 0 {
                        self.with_stats(|s| s.record_expirations(expired));
                    }
                    count += partition.len() as u64;
                }
                Ok(OperationValue::Count(count))
            }
            CacheOperation::Clear | CacheOperation::Destroy => {
                for id in 0..self.partition_count() {
                    self.lock(PartitionId::new(id))?.clear();
                }
                Ok(OperationValue::Unit)
            }
        }
    }

    fn get(
        &self,
        partition: &mut Partition,
        key: &Data,
        requested: Option<ExpiryPolicy>,
        now: Instant,
    ) -> Option<Data> {
        let policy = self.effective_policy(requested, partition.get(key));
        let Some(record) = self.live(partition, key, now) else {
            self.with_stats(CacheStatistics::record_miss);
            return None;
        };
        self.with_stats(CacheStatistics::record_hit);
        let value = record.value.clone();

        match policy.expiry_for_access().map(|d| expiry_from(d, now)) {
            None => {}
            Some(Expiry::Immediately) => {
                partition.remove(key);
                self.with_stats(CacheStatistics::record_expiration);
            }
            Some(Expiry::Never) => record.expires_at = None,
            Some(Expiry::At(at)) => record.expires_at = Some(at),
        }
        Some(value)
    }

    /// Store `value`, returning the previous live value.
    fn put(
        &self,
        partition: &mut Partition,
        key: &Data,
        value: &Data,
        requested: Option<ExpiryPolicy>,
        now: Instant,
    ) -> Option<Data> {
        let existing = self.live(partition, key, now).cloned();
        let policy = self.effective_policy(requested, existing.as_ref());

        let (expiry, previous) = match existing {
            Some(record) => {
                let expiry = match policy.expiry_for_update() {
                    Some(d) => expiry_from(d, now),
                    None => record.expires_at.map_or(Expiry::Never, Expiry::At),
                };
                (expiry, Some(record))
            }
            None => {
                let expiry = match policy.expiry_for_creation() {
                    Some(d) => expiry_from(d, now),
                    None => Expiry::Never,
                };
                (expiry, None)
            }
        };

        let expires_at = match expiry {
            Expiry::Immediately => {
                if previous.is_some() {
                    partition.remove(key);
                    self.with_stats(CacheStatistics::record_expiration);
                }
                return previous.map(|r| r.value);
            }
            Expiry::Never => None,
            Expiry::At(at) => Some(at),
        };

        partition.insert(
            key.clone(),
            Record {
                value: value.clone(),
                expires_at,
                policy: previous.as_ref().and_then(|r| r.policy),
            },
        );
        self.with_stats(CacheStatistics::record_put);
        previous.map(|r| r.value)
    }

    fn set_expiry_policy(
        &self,
        partition: &mut Partition,
        key: &Data,
        policy: ExpiryPolicy,
        now: Instant,
    ) -> bool {
        let Some(record) = self.live(partition, key, now) else {
            return false;
        };
        record.policy = Some(policy);
        match policy.expiry_for_update().map(|d| expiry_from(d, now)) {
            None => {}
            Some(Expiry::Immediately) => {
                partition.remove(key);
                self.with_stats(CacheStatistics::record_expiration);
            }
            Some(Expiry::Never) => record.expires_at = None,
            Some(Expiry::At(at)) => record.expires_at = Some(at),
        }
        true
    }
}
