//! Automatic retry of failed nodes.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::settle::{wait_until, SettleConfig};
use crate::core::TaskRef;
use crate::envelope::ResultEnvelope;
use crate::errors::NodeGuardError;
use crate::operations::OperationFacade;
use crate::queue::{Job, JobQueue, QueueRoutes, RetryJob};
use crate::store::{LockStore, StrategyRepository};

/// Locking, settling and operator settings of retry jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySettings {
    /// Lifetime of the per-attempt lock.
    pub lock_ttl: Duration,
    /// Wait for the failed node's process to park before retrying.
    pub settle: SettleConfig,
    /// Operator recorded on the retry command.
    pub operator: String,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(5),
            settle: SettleConfig::default(),
            operator: "system".to_string(),
        }
    }
}

/// Result of reacting to a node failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDispatch {
    /// A retry job was submitted.
    Scheduled {
        /// Attempts made before this one.
        retry_times: u32,
        /// Delay before the job runs.
        delay: Duration,
    },
    /// The node has no retry strategy.
    NotConfigured,
    /// The attempt budget is used up.
    Exhausted {
        /// Attempts made.
        retry_times: u32,
        /// Attempt budget.
        max_retry_times: u32,
    },
    /// The strategy could not be read.
    LookupFailed(String),
    /// The job could not be submitted.
    SubmitFailed(String),
}

impl RetryDispatch {
    /// Returns true if a retry job is on its way.
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        matches!(self, Self::Scheduled { .. })
    }
}

/// Result of running one retry job.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryJobOutcome {
    /// The retry command was issued; the envelope is the engine's answer.
    Retried(ResultEnvelope),
    /// A previous delivery of this job already made the attempt.
    AlreadyHandled,
    /// Another delivery holds the attempt lock.
    LockContended,
    /// The node never became retryable within the settle budget.
    NotSettled,
    /// The job could not proceed.
    Aborted(String),
}

/// Schedules and runs retry attempts for failed nodes.
///
/// Scheduling reads the node's strategy and submits a delayed job. Running
/// a job takes the attempt lock `"{root}-{node}-{retry_times}"`, waits for
/// the node to settle, issues the retry and records the attempt.
#[derive(Clone)]
pub struct AutoRetryDispatcher {
    facade: OperationFacade,
    repository: Arc<dyn StrategyRepository>,
    locks: Arc<dyn LockStore>,
    queue: Arc<dyn JobQueue>,
    routes: QueueRoutes,
    settings: RetrySettings,
}

impl AutoRetryDispatcher {
    /// Creates a dispatcher with default settings.
    #[must_use]
    pub fn new(
        facade: OperationFacade,
        repository: Arc<dyn StrategyRepository>,
        locks: Arc<dyn LockStore>,
        queue: Arc<dyn JobQueue>,
        routes: QueueRoutes,
    ) -> Self {
        Self {
            facade,
            repository,
            locks,
            queue,
            routes,
            settings: RetrySettings::default(),
        }
    }

    /// Replaces the settings.
    #[must_use]
    pub fn with_settings(mut self, settings: RetrySettings) -> Self {
        self.settings = settings;
        self
    }

    /// Schedules a retry of `node_id` if its strategy allows another attempt.
    pub async fn dispatch(&self, root_pipeline_id: &str, node_id: &str) -> RetryDispatch {
        let strategy = match self
            .repository
            .get_retry_strategy(root_pipeline_id, node_id)
            .await
        {
            Ok(Some(strategy)) => strategy,
            Ok(None) => return RetryDispatch::NotConfigured,
            Err(e) => {
                error!(root_pipeline_id, node_id, error = %e, "loading retry strategy failed");
                return RetryDispatch::LookupFailed(e.to_string());
            }
        };

        if !strategy.can_dispatch() {
            info!(
                root_pipeline_id,
                node_id,
                retry_times = strategy.retry_times,
                max_retry_times = strategy.max_retry_times,
                "retry budget exhausted"
            );
            return RetryDispatch::Exhausted {
                retry_times: strategy.retry_times,
                max_retry_times: strategy.max_retry_times,
            };
        }

        let delay = Duration::from_secs(strategy.interval_seconds);
        let job = RetryJob {
            taskflow_id: strategy.taskflow_id,
            root_pipeline_id: root_pipeline_id.to_string(),
            node_id: node_id.to_string(),
            retry_times: strategy.retry_times,
        };

        match self
            .queue
            .submit(&self.routes.auto_retry(), Job::AutoRetryNode(job), delay)
            .await
        {
            Ok(()) => {
                info!(
                    root_pipeline_id,
                    node_id,
                    retry_times = strategy.retry_times,
                    delay_secs = strategy.interval_seconds,
                    "auto retry scheduled"
                );
                RetryDispatch::Scheduled {
                    retry_times: strategy.retry_times,
                    delay,
                }
            }
            Err(e) => {
                error!(root_pipeline_id, node_id, error = %e, "auto retry submit failed");
                RetryDispatch::SubmitFailed(e.to_string())
            }
        }
    }

    /// Runs one delivered retry job.
    pub async fn run_job(&self, job: &RetryJob) -> RetryJobOutcome {
        let lock_key = job.lock_key();
        match self.locks.try_acquire(&lock_key, self.settings.lock_ttl).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(lock = %lock_key, "lock acquire failed, operation give up");
                return RetryJobOutcome::LockContended;
            }
            Err(e) => {
                error!(lock = %lock_key, error = %e, "lock store unavailable");
                return RetryJobOutcome::Aborted(e.to_string());
            }
        }

        let outcome = self.run_locked(job).await;

        if let Err(e) = self.locks.release(&lock_key).await {
            warn!(lock = %lock_key, error = %e, "lock release failed, it will expire");
        }
        outcome
    }

    async fn run_locked(&self, job: &RetryJob) -> RetryJobOutcome {
        let root = job.root_pipeline_id.as_str();
        let node_id = job.node_id.as_str();

        match self.repository.get_retry_strategy(root, node_id).await {
            Ok(Some(current)) if current.retry_times > job.retry_times => {
                info!(
                    root,
                    node_id,
                    job_retry_times = job.retry_times,
                    retry_times = current.retry_times,
                    "attempt already made by an earlier delivery"
                );
                return RetryJobOutcome::AlreadyHandled;
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                warn!(root, node_id, "retry strategy removed before the attempt ran");
                return RetryJobOutcome::Aborted("retry strategy not found".to_string());
            }
            Err(e) => {
                error!(root, node_id, error = %e, "loading retry strategy failed");
                return RetryJobOutcome::Aborted(e.to_string());
            }
        }

        let engine = self.facade.engine().clone();
        let settled = wait_until(&self.settings.settle, node_id, || {
            let engine = engine.clone();
            let node_id = node_id.to_string();
            async move {
                engine
                    .is_awaiting_retry(&node_id)
                    .await
                    .map_err(NodeGuardError::from)
            }
        })
        .await;
        if !settled.is_settled() {
            warn!(
                task = job.taskflow_id,
                node_id, "node never became retryable, attempt abandoned"
            );
            return RetryJobOutcome::NotSettled;
        }

        let envelope = self
            .facade
            .node(TaskRef::new(job.taskflow_id, root), node_id)
            .retry(&self.settings.operator, None)
            .await;
        if !envelope.ok {
            error!(
                task = job.taskflow_id,
                node_id,
                message = %envelope.message,
                "auto retry failed"
            );
        }

        let next = job.retry_times.saturating_add(1);
        if let Err(e) = self.repository.update_retry_times(root, node_id, next).await {
            error!(root, node_id, retry_times = next, error = %e, "recording retry attempt failed");
        }

        RetryJobOutcome::Retried(envelope)
    }
}

impl std::fmt::Debug for AutoRetryDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoRetryDispatcher")
            .field("routes", &self.routes)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::NoOpAuditSink;
    use crate::core::NodeState;
    use crate::models::NodeRetryStrategy;
    use crate::store::{InMemoryLockStore, InMemoryStrategyRepository};
    use crate::testing::{FakeEngine, RecordingJobQueue};
    use pretty_assertions::assert_eq;

    struct Fixture {
        engine: Arc<FakeEngine>,
        repo: Arc<InMemoryStrategyRepository>,
        locks: Arc<InMemoryLockStore>,
        queue: Arc<RecordingJobQueue>,
        dispatcher: AutoRetryDispatcher,
    }

    async fn fixture(max_retry_times: u32, interval: u64) -> Fixture {
        let engine = Arc::new(FakeEngine::new());
        let repo = Arc::new(InMemoryStrategyRepository::new());
        let locks = Arc::new(InMemoryLockStore::new());
        let queue = Arc::new(RecordingJobQueue::new());
        repo.insert_retry_strategies(vec![NodeRetryStrategy::new(
            5,
            "root",
            "n1",
            max_retry_times,
            interval,
        )])
        .await
        .unwrap();
        engine.set_node_state("n1", NodeState::Failed, "v1");
        engine.set_awaiting_retry("n1", true);

        let facade = OperationFacade::new(engine.clone(), Arc::new(NoOpAuditSink));
        let dispatcher = AutoRetryDispatcher::new(
            facade,
            repo.clone(),
            locks.clone(),
            queue.clone(),
            QueueRoutes::new("default"),
        );
        Fixture {
            engine,
            repo,
            locks,
            queue,
            dispatcher,
        }
    }

    fn job(retry_times: u32) -> RetryJob {
        RetryJob {
            taskflow_id: 5,
            root_pipeline_id: "root".into(),
            node_id: "n1".into(),
            retry_times,
        }
    }

    #[tokio::test]
    async fn test_dispatch_schedules_delayed_job() {
        let f = fixture(3, 7).await;
        let result = f.dispatcher.dispatch("root", "n1").await;

        assert_eq!(
            result,
            RetryDispatch::Scheduled {
                retry_times: 0,
                delay: Duration::from_secs(7)
            }
        );
        let subs = f.queue.submissions();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].queue.as_str(), "node_auto_retry_default");
        assert_eq!(subs[0].delay, Duration::from_secs(7));
        assert_eq!(subs[0].job, Job::AutoRetryNode(job(0)));
    }

    #[tokio::test]
    async fn test_dispatch_without_strategy_is_noop() {
        let f = fixture(3, 0).await;
        assert_eq!(f.dispatcher.dispatch("root", "other").await, RetryDispatch::NotConfigured);
        assert!(f.queue.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_exhausted_budget_is_noop() {
        let f = fixture(2, 0).await;
        f.repo.update_retry_times("root", "n1", 2).await.unwrap();

        let result = f.dispatcher.dispatch("root", "n1").await;
        assert_eq!(
            result,
            RetryDispatch::Exhausted {
                retry_times: 2,
                max_retry_times: 2
            }
        );
        assert!(f.queue.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_submit_failure_reported() {
        let f = fixture(3, 0).await;
        f.queue.fail_next(1);
        assert!(matches!(
            f.dispatcher.dispatch("root", "n1").await,
            RetryDispatch::SubmitFailed(_)
        ));
    }

    #[tokio::test]
    async fn test_run_job_retries_and_counts() {
        let f = fixture(3, 0).await;
        let outcome = f.dispatcher.run_job(&job(0)).await;

        let RetryJobOutcome::Retried(env) = outcome else {
            panic!("expected a retry, got {outcome:?}");
        };
        assert!(env.ok);
        assert_eq!(f.engine.retry_count(), 1);
        let strategy = f.repo.get_retry_strategy("root", "n1").await.unwrap().unwrap();
        assert_eq!(strategy.retry_times, 1);
        assert!(!f.locks.is_held(&job(0).lock_key()));
    }

    #[tokio::test]
    async fn test_run_job_counts_even_when_retry_rejected() {
        let f = fixture(3, 0).await;
        f.engine.reject_next("retry_node", "invalid state");

        let outcome = f.dispatcher.run_job(&job(0)).await;

        assert!(matches!(outcome, RetryJobOutcome::Retried(ref env) if !env.ok));
        let strategy = f.repo.get_retry_strategy("root", "n1").await.unwrap().unwrap();
        assert_eq!(strategy.retry_times, 1);
    }

    #[tokio::test]
    async fn test_run_job_gives_up_on_held_lock() {
        let f = fixture(3, 0).await;
        f.locks
            .try_acquire(&job(0).lock_key(), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(f.dispatcher.run_job(&job(0)).await, RetryJobOutcome::LockContended);
        assert_eq!(f.engine.retry_count(), 0);
    }

    #[tokio::test]
    async fn test_redelivered_job_is_already_handled() {
        let f = fixture(3, 0).await;
        f.dispatcher.run_job(&job(0)).await;
        f.engine.set_awaiting_retry("n1", true);

        assert_eq!(f.dispatcher.run_job(&job(0)).await, RetryJobOutcome::AlreadyHandled);
        assert_eq!(f.engine.retry_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsettled_node_is_not_retried_nor_counted() {
        let f = fixture(3, 0).await;
        f.engine.set_awaiting_retry("n1", false);

        assert_eq!(f.dispatcher.run_job(&job(0)).await, RetryJobOutcome::NotSettled);
        assert_eq!(f.engine.retry_count(), 0);
        let strategy = f.repo.get_retry_strategy("root", "n1").await.unwrap().unwrap();
        assert_eq!(strategy.retry_times, 0);
        assert!(!f.locks.is_held(&job(0).lock_key()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_settling_node_is_retried() {
        let f = fixture(3, 0).await;
        f.engine.settle_after("n1", 2);

        assert!(matches!(
            f.dispatcher.run_job(&job(0)).await,
            RetryJobOutcome::Retried(_)
        ));
    }
}
