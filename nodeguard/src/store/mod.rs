//! Persistent stores: strategy repository and per-attempt locks.

mod lock;
mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use lock::{InMemoryLockStore, LockStore};
pub use memory::InMemoryStrategyRepository;
#[cfg(feature = "redis")]
pub use self::redis::RedisLockStore;

use async_trait::async_trait;

use crate::errors::Result;
use crate::models::{NodeRetryStrategy, NodeTimeoutConfig, TimeoutBatchRecord};

/// Storage of retry strategies, timeout configs and timeout batches.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StrategyRepository: Send + Sync {
    /// Loads the retry strategy of a node.
    async fn get_retry_strategy(
        &self,
        root_pipeline_id: &str,
        node_id: &str,
    ) -> Result<Option<NodeRetryStrategy>>;

    /// Inserts strategies in bulk. Fails without inserting anything if a node already has one.
    async fn insert_retry_strategies(&self, strategies: Vec<NodeRetryStrategy>) -> Result<()>;

    /// Overwrites the attempt counter of a node.
    async fn update_retry_times(
        &self,
        root_pipeline_id: &str,
        node_id: &str,
        retry_times: u32,
    ) -> Result<()>;

    /// Loads the timeout config of a node.
    async fn get_timeout_config(&self, node_id: &str) -> Result<Option<NodeTimeoutConfig>>;

    /// Inserts timeout configs in bulk. Fails without inserting anything if a node already has one.
    async fn insert_timeout_configs(&self, configs: Vec<NodeTimeoutConfig>) -> Result<()>;

    /// Persists one tick's expired keys and returns the record id.
    async fn create_timeout_batch(&self, node_keys: Vec<String>) -> Result<u64>;

    /// Loads a timeout batch.
    async fn get_timeout_batch(&self, id: u64) -> Result<Option<TimeoutBatchRecord>>;

    /// Deletes every strategy and timeout config of a task.
    async fn purge_task(&self, root_pipeline_id: &str) -> Result<()>;
}
