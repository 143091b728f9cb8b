//! Applies the configured timeout action to one expired attempt.

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::core::TaskRef;
use crate::envelope::ResultEnvelope;
use crate::operations::OperationFacade;
use crate::store::StrategyRepository;

/// Executes timeout strategies for attempts popped from the deadline pool.
///
/// An attempt is acted on only while it is still live: the root pipeline's
/// process must still point at the node and the node's state row must still
/// carry the popped version. Anything else is reported as stale and left
/// untouched.
#[derive(Clone)]
pub struct TimeoutStrategyExecutor {
    facade: OperationFacade,
    repository: Arc<dyn StrategyRepository>,
    operator: String,
}

impl TimeoutStrategyExecutor {
    /// Creates an executor issuing commands as `operator`.
    #[must_use]
    pub fn new(
        facade: OperationFacade,
        repository: Arc<dyn StrategyRepository>,
        operator: impl Into<String>,
    ) -> Self {
        Self {
            facade,
            repository,
            operator: operator.into(),
        }
    }

    /// Runs the strategy of `node_id` if attempt `version` is still live.
    pub async fn execute(&self, node_id: &str, version: &str) -> ResultEnvelope {
        let config = match self.repository.get_timeout_config(node_id).await {
            Ok(Some(config)) => config,
            Ok(None) => {
                info!(node_id, version, "no timeout config, nothing to do");
                return ResultEnvelope::config_not_found(format!(
                    "timeout config of node {node_id} not found"
                ));
            }
            Err(e) => {
                error!(node_id, error = %e, "loading timeout config failed");
                return ResultEnvelope::unexpected("loading timeout config failed", e.to_string());
            }
        };

        let engine = self.facade.engine();
        let root = config.root_pipeline_id.as_str();

        match engine.is_current_node(root, node_id).await {
            Ok(true) => {}
            Ok(false) => {
                info!(node_id, version, root, "node is no longer current, timeout ignored");
                return ResultEnvelope::stale(format!("node {node_id} is no longer current"));
            }
            Err(e) => {
                error!(node_id, error = %e, "current node query failed");
                return ResultEnvelope::unexpected("current node query failed", e.message);
            }
        }

        match engine.node_state(node_id).await {
            Ok(Some(state)) if state.version == version => {}
            Ok(state) => {
                info!(
                    node_id,
                    version,
                    current = ?state.as_ref().map(|s| s.version.as_str()),
                    "node version moved on, timeout ignored"
                );
                return ResultEnvelope::stale(format!(
                    "attempt {version} of node {node_id} is no longer running"
                ));
            }
            Err(e) => {
                error!(node_id, error = %e, "node state query failed");
                return ResultEnvelope::unexpected("node state query failed", e.message);
            }
        }

        let node = self
            .facade
            .node(TaskRef::new(config.task_id, root), node_id);
        let envelope = config
            .action
            .strategy()
            .deal_with_timeout(&node, &self.operator)
            .await;

        if envelope.ok {
            info!(node_id, version, action = %config.action, "timeout strategy applied");
        } else {
            warn!(
                node_id,
                version,
                action = %config.action,
                message = %envelope.message,
                "timeout strategy failed"
            );
        }
        envelope
    }
}

impl std::fmt::Debug for TimeoutStrategyExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutStrategyExecutor")
            .field("operator", &self.operator)
            .finish_non_exhaustive()
    }
}
