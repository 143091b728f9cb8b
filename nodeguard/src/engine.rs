//! The command/query surface consumed from the external DAG engine.
//!
//! The engine owns pipeline execution and its state tables. This crate
//! reaches it only through [`EngineRuntime`]; commands answer with an
//! [`EngineReply`], which the operation facade normalizes into a
//! [`ResultEnvelope`](crate::envelope::ResultEnvelope).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::NodeState;

/// Error raised by an engine call.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct EngineError {
    /// The error message.
    pub message: String,
}

impl EngineError {
    /// Creates a new engine error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}

/// The engine's own answer to a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineReply {
    /// Whether the engine accepted the command.
    pub result: bool,
    /// Optional payload.
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
    /// Exception text, when the engine caught one itself.
    #[serde(default)]
    pub exc: Option<String>,
}

impl EngineReply {
    /// An accepted command without payload.
    #[must_use]
    pub fn accepted() -> Self {
        Self {
            result: true,
            data: None,
            message: "success".to_string(),
            exc: None,
        }
    }

    /// A rejected command.
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            result: false,
            data: None,
            message: message.into(),
            exc: None,
        }
    }

    /// Attaches a payload.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Result alias for engine commands.
pub type EngineResult<T = EngineReply> = Result<T, EngineError>;

/// State row of a node as persisted by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStateInfo {
    /// Node identifier.
    pub node_id: String,
    /// Current state.
    pub state: NodeState,
    /// Version of the current attempt.
    pub version: String,
}

/// Commands and queries offered by the DAG engine.
#[async_trait]
pub trait EngineRuntime: Send + Sync {
    /// Starts a pipeline instance.
    async fn run_pipeline(&self, root_pipeline_id: &str, operator: &str) -> EngineResult;

    /// Pauses a running pipeline.
    async fn pause_pipeline(&self, root_pipeline_id: &str) -> EngineResult;

    /// Resumes a paused pipeline.
    async fn resume_pipeline(&self, root_pipeline_id: &str) -> EngineResult;

    /// Revokes a pipeline.
    async fn revoke_pipeline(&self, root_pipeline_id: &str) -> EngineResult;

    /// Retries a failed node, optionally with replacement inputs.
    async fn retry_node(&self, node_id: &str, inputs: Option<serde_json::Value>) -> EngineResult;

    /// Skips a failed node.
    async fn skip_node(&self, node_id: &str) -> EngineResult;

    /// Forces a running node into the failed state.
    async fn forced_fail_node(&self, node_id: &str, ex_data: &str) -> EngineResult;

    /// Delivers an external callback to a node waiting on one.
    async fn callback(&self, node_id: &str, version: &str, data: serde_json::Value) -> EngineResult;

    /// Skips an exclusive gateway by selecting one outgoing flow.
    async fn skip_exclusive_gateway(&self, node_id: &str, flow_id: &str) -> EngineResult;

    /// Skips a conditional parallel gateway.
    async fn skip_conditional_parallel_gateway(
        &self,
        node_id: &str,
        flow_ids: &[String],
        converge_gateway_id: &str,
    ) -> EngineResult;

    /// Reads the persisted state row of a node.
    async fn node_state(&self, node_id: &str) -> EngineResult<Option<NodeStateInfo>>;

    /// Returns true if some process of `root_pipeline_id` currently points at `node_id`.
    async fn is_current_node(&self, root_pipeline_id: &str, node_id: &str) -> EngineResult<bool>;

    /// Returns true if a process is asleep on `node_id`, i.e. the node awaits a retry.
    async fn is_awaiting_retry(&self, node_id: &str) -> EngineResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_builders() {
        let ok = EngineReply::accepted().with_data(serde_json::json!({"id": 1}));
        assert!(ok.result);
        assert_eq!(ok.data, Some(serde_json::json!({"id": 1})));

        let rejected = EngineReply::rejected("node is not running");
        assert!(!rejected.result);
        assert_eq!(rejected.message, "node is not running");
    }

    #[test]
    fn test_reply_deserializes_sparse_mapping() {
        let reply: EngineReply = serde_json::from_str(r#"{"result": false}"#).unwrap();
        assert!(!reply.result);
        assert!(reply.message.is_empty());
        assert!(reply.exc.is_none());
    }

    #[test]
    fn test_engine_error_from_anyhow() {
        let err: EngineError = anyhow::anyhow!("db down").context("query state").into();
        assert_eq!(err.message, "query state: db down");
    }
}
