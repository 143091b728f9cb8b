//! Actions applied to nodes that overran their deadline.

use async_trait::async_trait;

use crate::envelope::ResultEnvelope;
use crate::models::TimeoutAction;
use crate::operations::NodeOperation;

/// Handles one timed-out node.
#[async_trait]
pub trait TimeoutStrategy: Send + Sync {
    /// The action this strategy implements.
    fn action(&self) -> TimeoutAction;

    /// Applies the action through `node`, issuing commands as `operator`.
    async fn deal_with_timeout(&self, node: &NodeOperation<'_>, operator: &str) -> ResultEnvelope;
}

/// Forces the node into failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForceFailStrategy;

#[async_trait]
impl TimeoutStrategy for ForceFailStrategy {
    fn action(&self) -> TimeoutAction {
        TimeoutAction::ForceFail
    }

    async fn deal_with_timeout(&self, node: &NodeOperation<'_>, operator: &str) -> ResultEnvelope {
        node.force_fail(operator).await
    }
}

/// Forces the node into failure, then skips it. The skip is only attempted
/// when the force-fail succeeded; otherwise the force-fail result is returned.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForceFailAndSkipStrategy;

#[async_trait]
impl TimeoutStrategy for ForceFailAndSkipStrategy {
    fn action(&self) -> TimeoutAction {
        TimeoutAction::ForceFailAndSkip
    }

    async fn deal_with_timeout(&self, node: &NodeOperation<'_>, operator: &str) -> ResultEnvelope {
        let failed = node.force_fail(operator).await;
        if !failed.ok {
            return failed;
        }
        node.skip(operator).await
    }
}

static FORCE_FAIL: ForceFailStrategy = ForceFailStrategy;
static FORCE_FAIL_AND_SKIP: ForceFailAndSkipStrategy = ForceFailAndSkipStrategy;

impl TimeoutAction {
    /// The strategy implementing this action.
    #[must_use]
    pub fn strategy(self) -> &'static dyn TimeoutStrategy {
        match self {
            Self::ForceFail => &FORCE_FAIL,
            Self::ForceFailAndSkip => &FORCE_FAIL_AND_SKIP,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::NoOpAuditSink;
    use crate::core::TaskRef;
    use crate::envelope::ErrorKind;
    use crate::operations::OperationFacade;
    use crate::testing::{EngineCall, FakeEngine};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn facade(engine: &Arc<FakeEngine>) -> OperationFacade {
        OperationFacade::new(engine.clone(), Arc::new(NoOpAuditSink))
    }

    #[test]
    fn test_action_maps_to_strategy() {
        assert_eq!(TimeoutAction::ForceFail.strategy().action(), TimeoutAction::ForceFail);
        assert_eq!(
            TimeoutAction::ForceFailAndSkip.strategy().action(),
            TimeoutAction::ForceFailAndSkip
        );
    }

    #[tokio::test]
    async fn test_force_fail_and_skip_runs_both() {
        let engine = Arc::new(FakeEngine::new());
        let facade = facade(&engine);
        let node = facade.node(TaskRef::new(1, "r"), "n1");

        let env = ForceFailAndSkipStrategy.deal_with_timeout(&node, "system").await;

        assert!(env.ok);
        assert_eq!(
            engine.calls(),
            vec![
                EngineCall::ForcedFail {
                    node_id: "n1".into(),
                    ex_data: "forced fail by system".into()
                },
                EngineCall::Skip("n1".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_skip_not_attempted_when_force_fail_rejected() {
        let engine = Arc::new(FakeEngine::new());
        engine.reject_next("forced_fail_node", "node is not running");
        let facade = facade(&engine);
        let node = facade.node(TaskRef::new(1, "r"), "n1");

        let env = ForceFailAndSkipStrategy.deal_with_timeout(&node, "system").await;

        assert!(!env.ok);
        assert_eq!(env.message, "node is not running");
        assert_eq!(env.error_kind, Some(ErrorKind::EngineCallFailure));
        assert_eq!(engine.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_force_fail_only() {
        let engine = Arc::new(FakeEngine::new());
        let facade = facade(&engine);
        let node = facade.node(TaskRef::new(1, "r"), "n1");

        let env = ForceFailStrategy.deal_with_timeout(&node, "system").await;

        assert!(env.ok);
        assert_eq!(engine.calls().len(), 1);
    }
}
