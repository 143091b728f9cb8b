//! Node-level commands.

use super::{uniform_result, OperationFacade};
use crate::audit::{AuditRecord, OperationSource, OperationType};
use crate::core::TaskRef;
use crate::engine::EngineError;
use crate::envelope::ResultEnvelope;

/// Retry, skip, force-fail, callback and gateway skips of one node.
pub struct NodeOperation<'a> {
    facade: &'a OperationFacade,
    task: TaskRef,
    node_id: String,
    in_loop: bool,
}

impl<'a> NodeOperation<'a> {
    pub(super) fn new(facade: &'a OperationFacade, task: TaskRef, node_id: String) -> Self {
        Self {
            facade,
            task,
            node_id,
            in_loop: false,
        }
    }

    /// Marks the command as issued inside a loop; retry and skip are then
    /// audited as `loop_retry` and `loop_skip`.
    #[must_use]
    pub fn in_loop(mut self, in_loop: bool) -> Self {
        self.in_loop = in_loop;
        self
    }

    /// The targeted node.
    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Retries the node, optionally with replacement inputs.
    pub async fn retry(&self, operator: &str, inputs: Option<serde_json::Value>) -> ResultEnvelope {
        let engine = self.facade.engine();
        let envelope = uniform_result("retry", engine.retry_node(&self.node_id, inputs)).await;
        self.finish(OperationType::Retry, OperationSource::App, operator, envelope)
            .await
    }

    /// Skips the node.
    pub async fn skip(&self, operator: &str) -> ResultEnvelope {
        let engine = self.facade.engine();
        let envelope = uniform_result("skip", engine.skip_node(&self.node_id)).await;
        self.finish(OperationType::Skip, OperationSource::App, operator, envelope)
            .await
    }

    /// Forces the node into the failed state.
    pub async fn force_fail(&self, operator: &str) -> ResultEnvelope {
        let ex_data = format!("forced fail by {operator}");
        self.force_fail_with(operator, &ex_data).await
    }

    /// Forces the node into the failed state with explicit error data.
    pub async fn force_fail_with(&self, operator: &str, ex_data: &str) -> ResultEnvelope {
        let engine = self.facade.engine();
        let envelope =
            uniform_result("forced_fail", engine.forced_fail_node(&self.node_id, ex_data)).await;
        self.finish(OperationType::ForcedFail, OperationSource::App, operator, envelope)
            .await
    }

    /// Delivers callback data. Without an explicit version the node's
    /// current state version is used.
    pub async fn callback(
        &self,
        operator: &str,
        data: serde_json::Value,
        version: Option<&str>,
    ) -> ResultEnvelope {
        let engine = self.facade.engine();
        let node_id = self.node_id.as_str();
        let command = async move {
            let version = match version {
                Some(v) => v.to_string(),
                None => engine
                    .node_state(node_id)
                    .await?
                    .map(|s| s.version)
                    .ok_or_else(|| EngineError::new(format!("state of node {node_id} not found")))?,
            };
            engine.callback(node_id, &version, data).await
        };
        let envelope = uniform_result("callback", command).await;
        self.finish(OperationType::Callback, OperationSource::Api, operator, envelope)
            .await
    }

    /// Skips an exclusive gateway through `flow_id`.
    pub async fn skip_exclusive_gateway(&self, operator: &str, flow_id: &str) -> ResultEnvelope {
        let engine = self.facade.engine();
        let envelope =
            uniform_result("skip_exg", engine.skip_exclusive_gateway(&self.node_id, flow_id)).await;
        self.finish(OperationType::SkipExg, OperationSource::App, operator, envelope)
            .await
    }

    /// Skips a conditional parallel gateway through `flow_ids`, converging at
    /// `converge_gateway_id`.
    pub async fn skip_conditional_parallel_gateway(
        &self,
        operator: &str,
        flow_ids: &[String],
        converge_gateway_id: &str,
    ) -> ResultEnvelope {
        let engine = self.facade.engine();
        let envelope = uniform_result(
            "skip_cpg",
            engine.skip_conditional_parallel_gateway(&self.node_id, flow_ids, converge_gateway_id),
        )
        .await;
        self.finish(OperationType::SkipCpg, OperationSource::App, operator, envelope)
            .await
    }

    async fn finish(
        &self,
        operation: OperationType,
        source: OperationSource,
        operator: &str,
        envelope: ResultEnvelope,
    ) -> ResultEnvelope {
        let operation = if self.in_loop {
            operation.in_loop()
        } else {
            operation
        };
        let record = AuditRecord::node(operation, source, self.task.id, operator, &self.node_id);
        self.facade.audited(record, envelope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditLog;
    use crate::core::NodeState;
    use crate::envelope::ErrorKind;
    use crate::testing::{EngineCall, FakeEngine};
    use std::sync::Arc;

    fn setup() -> (Arc<FakeEngine>, Arc<InMemoryAuditLog>, OperationFacade) {
        let engine = Arc::new(FakeEngine::new());
        let audit = Arc::new(InMemoryAuditLog::new());
        let facade = OperationFacade::new(engine.clone(), audit.clone());
        (engine, audit, facade)
    }

    #[tokio::test]
    async fn test_force_fail_uses_operator_in_ex_data() {
        let (engine, audit, facade) = setup();
        let env = facade.node(TaskRef::new(1, "r"), "n1").force_fail("system").await;

        assert!(env.ok);
        assert_eq!(
            engine.calls(),
            vec![EngineCall::ForcedFail {
                node_id: "n1".into(),
                ex_data: "forced fail by system".into()
            }]
        );
        assert_eq!(audit.records()[0].operation_type, OperationType::ForcedFail);
    }

    #[tokio::test]
    async fn test_loop_skip_and_retry_audit_types() {
        let (_engine, audit, facade) = setup();
        let node = facade.node(TaskRef::new(1, "r"), "n1").in_loop(true);
        node.skip("u").await;
        node.retry("u", None).await;
        node.force_fail("u").await;

        let ops: Vec<_> = audit.records().iter().map(|r| r.operation_type).collect();
        assert_eq!(
            ops,
            vec![OperationType::LoopSkip, OperationType::LoopRetry, OperationType::ForcedFail]
        );
    }

    #[tokio::test]
    async fn test_callback_resolves_current_version() {
        let (engine, audit, facade) = setup();
        engine.set_node_state("n1", NodeState::Running, "v42");

        let env = facade
            .node(TaskRef::new(1, "r"), "n1")
            .callback("api-user", serde_json::json!({"ok": 1}), None)
            .await;

        assert!(env.ok);
        assert_eq!(
            engine.calls(),
            vec![EngineCall::Callback {
                node_id: "n1".into(),
                version: "v42".into()
            }]
        );
        assert_eq!(audit.records()[0].source, OperationSource::Api);
    }

    #[tokio::test]
    async fn test_callback_with_explicit_version() {
        let (engine, _audit, facade) = setup();
        facade
            .node(TaskRef::new(1, "r"), "n1")
            .callback("u", serde_json::json!({}), Some("v7"))
            .await;
        assert_eq!(
            engine.calls(),
            vec![EngineCall::Callback {
                node_id: "n1".into(),
                version: "v7".into()
            }]
        );
    }

    #[tokio::test]
    async fn test_callback_without_state_is_unexpected() {
        let (engine, _audit, facade) = setup();
        let env = facade
            .node(TaskRef::new(1, "r"), "ghost")
            .callback("u", serde_json::json!({}), None)
            .await;

        assert!(!env.ok);
        assert_eq!(env.error_kind, Some(ErrorKind::Unexpected));
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_gateway_skips() {
        let (engine, audit, facade) = setup();
        let node = facade.node(TaskRef::new(1, "r"), "gw1");
        assert!(node.skip_exclusive_gateway("u", "f1").await.ok);
        assert!(node
            .skip_conditional_parallel_gateway("u", &["f2".to_string(), "f3".to_string()], "cg1")
            .await
            .ok);

        assert_eq!(engine.calls().len(), 2);
        let ops: Vec<_> = audit.records().iter().map(|r| r.operation_type).collect();
        assert_eq!(ops, vec![OperationType::SkipExg, OperationType::SkipCpg]);
    }
}
