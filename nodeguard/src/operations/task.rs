//! Task-level commands.

use super::{uniform_result, OperationFacade};
use crate::audit::{AuditRecord, OperationSource, OperationType};
use crate::core::TaskRef;
use crate::envelope::ResultEnvelope;

/// Start, pause, resume and revoke of one task instance.
pub struct TaskOperation<'a> {
    facade: &'a OperationFacade,
    task: TaskRef,
}

impl<'a> TaskOperation<'a> {
    pub(super) fn new(facade: &'a OperationFacade, task: TaskRef) -> Self {
        Self { facade, task }
    }

    /// Starts the pipeline.
    pub async fn start(&self, operator: &str) -> ResultEnvelope {
        let engine = self.facade.engine();
        let envelope =
            uniform_result("start", engine.run_pipeline(&self.task.root_pipeline_id, operator)).await;
        self.finish(OperationType::Start, operator, envelope).await
    }

    /// Pauses the pipeline.
    pub async fn pause(&self, operator: &str) -> ResultEnvelope {
        let engine = self.facade.engine();
        let envelope =
            uniform_result("pause", engine.pause_pipeline(&self.task.root_pipeline_id)).await;
        self.finish(OperationType::Pause, operator, envelope).await
    }

    /// Resumes the pipeline.
    pub async fn resume(&self, operator: &str) -> ResultEnvelope {
        let engine = self.facade.engine();
        let envelope =
            uniform_result("resume", engine.resume_pipeline(&self.task.root_pipeline_id)).await;
        self.finish(OperationType::Resume, operator, envelope).await
    }

    /// Revokes the pipeline.
    pub async fn revoke(&self, operator: &str) -> ResultEnvelope {
        let engine = self.facade.engine();
        let envelope =
            uniform_result("revoke", engine.revoke_pipeline(&self.task.root_pipeline_id)).await;
        self.finish(OperationType::Revoke, operator, envelope).await
    }

    async fn finish(
        &self,
        operation: OperationType,
        operator: &str,
        envelope: ResultEnvelope,
    ) -> ResultEnvelope {
        let record = AuditRecord::task(operation, OperationSource::App, self.task.id, operator);
        self.facade.audited(record, envelope).await
    }
}
