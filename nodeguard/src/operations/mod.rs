//! The uniform command facade over the engine.
//!
//! Every mutating call made by this crate, and by API handlers built on it,
//! goes through [`OperationFacade`]: the engine command runs inside
//! [`uniform_result`], an audit entry is written best effort, and the caller
//! receives a [`ResultEnvelope`].

mod node;
mod task;
mod uniform;

pub use node::NodeOperation;
pub use task::TaskOperation;
pub use uniform::uniform_result;

use std::sync::Arc;
use tracing::warn;

use crate::audit::{AuditRecord, AuditSink};
use crate::core::TaskRef;
use crate::engine::EngineRuntime;
use crate::envelope::ResultEnvelope;

/// Entry point for task and node commands.
#[derive(Clone)]
pub struct OperationFacade {
    engine: Arc<dyn EngineRuntime>,
    audit: Arc<dyn AuditSink>,
}

impl OperationFacade {
    /// Creates a facade over an engine and an audit sink.
    #[must_use]
    pub fn new(engine: Arc<dyn EngineRuntime>, audit: Arc<dyn AuditSink>) -> Self {
        Self { engine, audit }
    }

    /// Commands addressing a whole task.
    #[must_use]
    pub fn task(&self, task: TaskRef) -> TaskOperation<'_> {
        TaskOperation::new(self, task)
    }

    /// Commands addressing one node of a task.
    #[must_use]
    pub fn node(&self, task: TaskRef, node_id: impl Into<String>) -> NodeOperation<'_> {
        NodeOperation::new(self, task, node_id.into())
    }

    /// The underlying engine, for read-only queries.
    #[must_use]
    pub fn engine(&self) -> &Arc<dyn EngineRuntime> {
        &self.engine
    }

    /// Writes the audit entry and hands the envelope back unchanged.
    async fn audited(&self, record: AuditRecord, envelope: ResultEnvelope) -> ResultEnvelope {
        let operation = record.operation_type;
        if let Err(e) = self.audit.record(record).await {
            warn!(%operation, error = %e, "record operate failed");
        }
        envelope
    }
}

impl std::fmt::Debug for OperationFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationFacade").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{InMemoryAuditLog, MockAuditSink, OperationType};
    use crate::errors::NodeGuardError;
    use crate::testing::FakeEngine;

    #[tokio::test]
    async fn test_audit_failure_does_not_fail_operation() {
        let engine = Arc::new(FakeEngine::new());
        let mut audit = MockAuditSink::new();
        audit
            .expect_record()
            .times(1)
            .returning(|_| Err(NodeGuardError::Audit("table locked".into())));

        let facade = OperationFacade::new(engine.clone(), Arc::new(audit));
        let env = facade.node(TaskRef::new(1, "root"), "n1").skip("admin").await;

        assert!(env.ok);
        assert_eq!(engine.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_audit_written_even_when_engine_rejects() {
        let engine = Arc::new(FakeEngine::new());
        engine.reject_next("skip_node", "node is running");
        let audit = Arc::new(InMemoryAuditLog::new());

        let facade = OperationFacade::new(engine, audit.clone());
        let env = facade.node(TaskRef::new(9, "root"), "n1").skip("admin").await;

        assert!(!env.ok);
        let records = audit.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].operation_type, OperationType::Skip);
        assert_eq!(records[0].instance_id, 9);
        assert_eq!(records[0].node_id.as_deref(), Some("n1"));
    }
}
