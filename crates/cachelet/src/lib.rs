//! cachelet: client request pipeline for a clustered key-value cache.

mod version;

pub mod bridge;
pub mod cache_manager;
pub mod codec;
pub mod commands;
pub mod config;
pub mod connection;
pub mod data;
pub mod dispatcher;
pub mod engine;
pub mod gate;
pub mod management;
pub mod operation;
pub mod provider;
pub mod security;
pub mod service;
pub mod session;
pub mod task;
pub mod transport;

pub use cache_manager::{CacheManager, CacheManagerError};
pub use config::{CacheConfig, CacheletConfig, ConfigError};
pub use connection::{Connection, ResponseWriter};
pub use data::{Data, ExpiryPolicy};
pub use dispatcher::{CommandRegistry, Dispatcher};
pub use gate::{ExecutionError, ExecutionGate};
pub use provider::{OperationProvider, ProviderRegistry};
pub use service::{CacheService, StartupError};
pub use task::{MessageTask, TaskContext, TaskOutcome};
pub use version::{CACHELET_VERSION, PROTOCOL_VERSION, VersionInfo};
