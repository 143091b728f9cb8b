//! In-memory strategy repository.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::StrategyRepository;
use crate::errors::{NodeGuardError, Result};
use crate::models::{NodeRetryStrategy, NodeTimeoutConfig, TimeoutBatchRecord};

/// Repository keeping every record in process memory.
#[derive(Debug, Default)]
pub struct InMemoryStrategyRepository {
    strategies: DashMap<String, NodeRetryStrategy>,
    timeouts: DashMap<String, NodeTimeoutConfig>,
    batches: DashMap<u64, TimeoutBatchRecord>,
    next_batch_id: AtomicU64,
}

impl InMemoryStrategyRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored retry strategies.
    #[must_use]
    pub fn strategy_count(&self) -> usize {
        self.strategies.len()
    }

    /// Number of stored timeout configs.
    #[must_use]
    pub fn timeout_config_count(&self) -> usize {
        self.timeouts.len()
    }

    /// Every persisted timeout batch, by ascending id.
    #[must_use]
    pub fn batches(&self) -> Vec<TimeoutBatchRecord> {
        let mut batches: Vec<_> = self.batches.iter().map(|e| e.value().clone()).collect();
        batches.sort_by_key(|b| b.id);
        batches
    }
}

#[async_trait]
impl StrategyRepository for InMemoryStrategyRepository {
    async fn get_retry_strategy(
        &self,
        root_pipeline_id: &str,
        node_id: &str,
    ) -> Result<Option<NodeRetryStrategy>> {
        Ok(self
            .strategies
            .get(node_id)
            .filter(|s| s.root_pipeline_id == root_pipeline_id)
            .map(|s| s.value().clone()))
    }

    async fn insert_retry_strategies(&self, strategies: Vec<NodeRetryStrategy>) -> Result<()> {
        if let Some(dup) = strategies.iter().find(|s| self.strategies.contains_key(&s.node_id)) {
            return Err(NodeGuardError::store(format!(
                "retry strategy for node {} already exists",
                dup.node_id
            )));
        }
        for strategy in strategies {
            self.strategies.insert(strategy.node_id.clone(), strategy);
        }
        Ok(())
    }

    async fn update_retry_times(
        &self,
        root_pipeline_id: &str,
        node_id: &str,
        retry_times: u32,
    ) -> Result<()> {
        match self.strategies.get_mut(node_id) {
            Some(mut s) if s.root_pipeline_id == root_pipeline_id => {
                s.retry_times = retry_times;
                Ok(())
            }
            _ => Err(NodeGuardError::store(format!(
                "retry strategy for node {node_id} of {root_pipeline_id} not found"
            ))),
        }
    }

    async fn get_timeout_config(&self, node_id: &str) -> Result<Option<NodeTimeoutConfig>> {
        Ok(self.timeouts.get(node_id).map(|c| c.value().clone()))
    }

    async fn insert_timeout_configs(&self, configs: Vec<NodeTimeoutConfig>) -> Result<()> {
        if let Some(dup) = configs.iter().find(|c| self.timeouts.contains_key(&c.node_id)) {
            return Err(NodeGuardError::store(format!(
                "timeout config for node {} already exists",
                dup.node_id
            )));
        }
        for config in configs {
            self.timeouts.insert(config.node_id.clone(), config);
        }
        Ok(())
    }

    async fn create_timeout_batch(&self, node_keys: Vec<String>) -> Result<u64> {
        let id = self.next_batch_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.batches.insert(id, TimeoutBatchRecord { id, node_keys });
        Ok(id)
    }

    async fn get_timeout_batch(&self, id: u64) -> Result<Option<TimeoutBatchRecord>> {
        Ok(self.batches.get(&id).map(|b| b.value().clone()))
    }

    async fn purge_task(&self, root_pipeline_id: &str) -> Result<()> {
        self.strategies.retain(|_, s| s.root_pipeline_id != root_pipeline_id);
        self.timeouts.retain(|_, c| c.root_pipeline_id != root_pipeline_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TimeoutAction;
    use pretty_assertions::assert_eq;

    fn timeout(root: &str, node: &str) -> NodeTimeoutConfig {
        NodeTimeoutConfig {
            task_id: 1,
            root_pipeline_id: root.into(),
            node_id: node.into(),
            action: TimeoutAction::ForceFail,
            timeout_seconds: 30,
        }
    }

    #[tokio::test]
    async fn test_strategy_lookup_is_scoped_to_root() {
        let repo = InMemoryStrategyRepository::new();
        repo.insert_retry_strategies(vec![NodeRetryStrategy::new(1, "r1", "n1", 3, 0)])
            .await
            .unwrap();

        assert!(repo.get_retry_strategy("r1", "n1").await.unwrap().is_some());
        assert!(repo.get_retry_strategy("r2", "n1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_rejected_atomically() {
        let repo = InMemoryStrategyRepository::new();
        repo.insert_retry_strategies(vec![NodeRetryStrategy::new(1, "r", "n1", 3, 0)])
            .await
            .unwrap();

        let result = repo
            .insert_retry_strategies(vec![
                NodeRetryStrategy::new(1, "r", "n2", 3, 0),
                NodeRetryStrategy::new(1, "r", "n1", 3, 0),
            ])
            .await;

        assert!(result.is_err());
        assert_eq!(repo.strategy_count(), 1);
    }

    #[tokio::test]
    async fn test_update_retry_times() {
        let repo = InMemoryStrategyRepository::new();
        repo.insert_retry_strategies(vec![NodeRetryStrategy::new(1, "r", "n1", 3, 0)])
            .await
            .unwrap();

        repo.update_retry_times("r", "n1", 2).await.unwrap();
        let s = repo.get_retry_strategy("r", "n1").await.unwrap().unwrap();
        assert_eq!(s.retry_times, 2);

        assert!(repo.update_retry_times("r", "missing", 1).await.is_err());
    }

    #[tokio::test]
    async fn test_batches_get_increasing_ids() {
        let repo = InMemoryStrategyRepository::new();
        let a = repo.create_timeout_batch(vec!["n1_v1".into()]).await.unwrap();
        let b = repo.create_timeout_batch(vec!["n2_v1".into()]).await.unwrap();
        assert!(b > a);

        let record = repo.get_timeout_batch(a).await.unwrap().unwrap();
        assert_eq!(record.node_keys, vec!["n1_v1".to_string()]);
        assert!(repo.get_timeout_batch(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purge_task_removes_only_that_task() {
        let repo = InMemoryStrategyRepository::new();
        repo.insert_retry_strategies(vec![
            NodeRetryStrategy::new(1, "r1", "a", 3, 0),
            NodeRetryStrategy::new(2, "r2", "b", 3, 0),
        ])
        .await
        .unwrap();
        repo.insert_timeout_configs(vec![timeout("r1", "a"), timeout("r2", "b")])
            .await
            .unwrap();

        repo.purge_task("r1").await.unwrap();

        assert_eq!(repo.strategy_count(), 1);
        assert_eq!(repo.timeout_config_count(), 1);
        assert!(repo.get_timeout_config("a").await.unwrap().is_none());
        assert!(repo.get_timeout_config("b").await.unwrap().is_some());
    }
}
