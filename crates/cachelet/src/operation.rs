//! Internal operations handed to the execution engine and the values they produce.

use std::fmt;

use crate::data::{Data, ExpiryPolicy};

/// Partition a single-key operation is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionId(u32);

impl PartitionId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Partition owning `key` out of `partition_count` partitions.
    pub fn for_key(key: &Data, partition_count: u32) -> Self {
        let count = u64::from(partition_count.max(1));
        Self((key.partition_hash() % count) as u32)
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where the engine runs an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationTarget {
    Partition(PartitionId),
    /// Multi-key or whole-cache operations.
    Cache,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheOperation {
    Get {
        key: Data,
        expiry_policy: Option<ExpiryPolicy>,
    },
    GetAll {
        keys: Vec<Data>,
        expiry_policy: Option<ExpiryPolicy>,
    },
    ContainsKey {
        key: Data,
    },
    Put {
        key: Data,
        value: Data,
        expiry_policy: Option<ExpiryPolicy>,
        return_previous: bool,
    },
    PutIfAbsent {
        key: Data,
        value: Data,
        expiry_policy: Option<ExpiryPolicy>,
    },
    Remove {
        key: Data,
        expected: Option<Data>,
    },
    SetExpiryPolicy {
        keys: Vec<Data>,
        expiry_policy: ExpiryPolicy,
    },
    Size,
    Clear,
    Destroy,
}

impl CacheOperation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Get { .. } => "get",
            Self::GetAll { .. } => "get_all",
            Self::ContainsKey { .. } => "contains_key",
            Self::Put { .. } => "put",
            Self::PutIfAbsent { .. } => "put_if_absent",
            Self::Remove { .. } => "remove",
            Self::SetExpiryPolicy { .. } => "set_expiry_policy",
            Self::Size => "size",
            Self::Clear => "clear",
            Self::Destroy => "destroy",
        }
    }
}

/// Unit of work built by an operation provider and executed by the gate.
///
/// The message task treats this as opaque once built.
#[derive(Debug, Clone, PartialEq)]
pub struct InternalOperation {
    cache: String,
    target: OperationTarget,
    operation: CacheOperation,
}

impl InternalOperation {
    pub fn new(cache: impl Into<String>, target: OperationTarget, operation: CacheOperation) -> Self {
        Self {
            cache: cache.into(),
            target,
            operation,
        }
    }

    pub fn cache(&self) -> &str {
        &self.cache
    }

    pub fn target(&self) -> OperationTarget {
        self.target
    }

    pub fn operation(&self) -> &CacheOperation {
        &self.operation
    }
}

/// Result value of an executed operation.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationValue {
    Unit,
    Bool(bool),
    Value(Option<Data>),
    Entries(Vec<(Data, Data)>),
    Count(u64),
}

impl OperationValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Unit => "unit",
            Self::Bool(_) => "bool",
            Self::Value(_) => "value",
            Self::Entries(_) => "entries",
            Self::Count(_) => "count",
        }
    }
}
