//! Wiring of one controller deployment.
//!
//! [`Controller`] owns the stores, the in-process job queue and the workers
//! bound to its three queues. It is itself the state-change observer the
//! engine registers at startup; events are handed to a single ordered
//! consumer.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::audit::{AuditSink, LoggingAuditSink};
use crate::config::ControllerConfig;
use crate::core::{Clock, SystemClock};
use crate::engine::EngineRuntime;
use crate::errors::Result;
use crate::hook::{
    StateChangeEvent, StateChangeHook, StateChangeListener, StateChangeObserver, TerminalNotifier,
};
use crate::operations::OperationFacade;
use crate::pool::{DeadlinePool, InMemoryDeadlinePool};
use crate::queue::{Job, JobHandler, JobQueue, TokioJobQueue};
use crate::retry::{AutoRetryDispatcher, RetryJobOutcome, RetrySettings};
use crate::shutdown::ShutdownSignal;
use crate::store::{InMemoryLockStore, InMemoryStrategyRepository, LockStore, StrategyRepository};
use crate::timeout::{ScanSettings, TimeoutBatchDispatcher, TimeoutScanner, TimeoutStrategyExecutor};
use crate::tree::{build_retry_strategies, build_timeout_configs};

/// Runs delivered jobs against the component they belong to.
struct JobWorker {
    retry: AutoRetryDispatcher,
    fanout: TimeoutBatchDispatcher,
    executor: TimeoutStrategyExecutor,
}

#[async_trait]
impl JobHandler for JobWorker {
    async fn handle(&self, job: Job) {
        let name = job.name();
        match job {
            Job::AutoRetryNode(retry) => match self.retry.run_job(&retry).await {
                RetryJobOutcome::Aborted(reason) => {
                    warn!(job = name, node_id = %retry.node_id, %reason, "retry job aborted");
                }
                outcome => info!(job = name, node_id = %retry.node_id, ?outcome, "retry job done"),
            },
            Job::DispatchTimeoutBatch { record_id } => {
                if let Err(e) = self.fanout.dispatch(record_id).await {
                    error!(job = name, record_id, error = %e, "timeout batch fan-out failed");
                }
            }
            Job::ExecuteTimeoutStrategy { node_id, version } => {
                let envelope = self.executor.execute(&node_id, &version).await;
                if envelope.ok || envelope.error_kind.is_some_and(|k| k.is_soft()) {
                    info!(job = name, %node_id, %version, message = %envelope.message, "timeout strategy done");
                } else {
                    error!(
                        job = name,
                        %node_id,
                        %version,
                        message = %envelope.message,
                        detail = ?envelope.error_detail,
                        "timeout strategy failed"
                    );
                }
            }
        }
    }
}

/// Builder for [`Controller`].
///
/// Every store defaults to its in-memory implementation.
pub struct ControllerBuilder {
    config: ControllerConfig,
    engine: Arc<dyn EngineRuntime>,
    audit: Arc<dyn AuditSink>,
    pool: Option<Arc<dyn DeadlinePool>>,
    repository: Option<Arc<dyn StrategyRepository>>,
    locks: Option<Arc<dyn LockStore>>,
    clock: Option<Arc<dyn Clock>>,
    notifier: Option<Arc<dyn TerminalNotifier>>,
}

impl ControllerBuilder {
    /// Starts a builder for `engine`.
    #[must_use]
    pub fn new(config: ControllerConfig, engine: Arc<dyn EngineRuntime>) -> Self {
        Self {
            config,
            engine,
            audit: Arc::new(LoggingAuditSink),
            pool: None,
            repository: None,
            locks: None,
            clock: None,
            notifier: None,
        }
    }

    /// Sets the audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Sets the deadline pool.
    #[must_use]
    pub fn with_pool(mut self, pool: Arc<dyn DeadlinePool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Sets the strategy repository.
    #[must_use]
    pub fn with_repository(mut self, repository: Arc<dyn StrategyRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Sets the lock store.
    #[must_use]
    pub fn with_locks(mut self, locks: Arc<dyn LockStore>) -> Self {
        self.locks = Some(locks);
        self
    }

    /// Sets the clock deadlines are measured against.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the terminal notifier.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn TerminalNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Uses Redis for the deadline pool and the retry locks.
    #[cfg(feature = "redis")]
    pub async fn with_redis(self, redis_url: &str) -> Result<Self> {
        let pool =
            crate::pool::RedisDeadlinePool::connect(redis_url, self.config.resolved_pool_key()).await?;
        let locks = crate::store::RedisLockStore::connect(redis_url).await?;
        Ok(self.with_pool(Arc::new(pool)).with_locks(Arc::new(locks)))
    }

    /// Validates the config and wires the controller on the current tokio runtime.
    pub fn build(self) -> Result<Controller> {
        self.config.validate()?;

        let routes = self.config.routes();
        let pool = self
            .pool
            .unwrap_or_else(|| Arc::new(InMemoryDeadlinePool::new()));
        let repository = self
            .repository
            .unwrap_or_else(|| Arc::new(InMemoryStrategyRepository::new()));
        let locks = self.locks.unwrap_or_else(|| Arc::new(InMemoryLockStore::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let queue = Arc::new(TokioJobQueue::new()?);
        let job_queue: Arc<dyn JobQueue> = queue.clone();
        let facade = OperationFacade::new(self.engine, self.audit);

        let retry = AutoRetryDispatcher::new(
            facade.clone(),
            repository.clone(),
            locks,
            job_queue.clone(),
            routes.clone(),
        )
        .with_settings(RetrySettings {
            lock_ttl: self.config.lock_ttl(),
            settle: self.config.settle_config(),
            operator: self.config.system_operator.clone(),
        });
        let fanout = TimeoutBatchDispatcher::new(repository.clone(), job_queue.clone(), routes.clone());
        let executor = TimeoutStrategyExecutor::new(
            facade.clone(),
            repository.clone(),
            self.config.system_operator.clone(),
        );
        let scanner = TimeoutScanner::new(
            pool.clone(),
            repository.clone(),
            job_queue,
            clock.clone(),
            routes.clone(),
        )
        .with_settings(ScanSettings {
            interval: self.config.scan_interval(),
            slow_tick_threshold: self.config.slow_tick_threshold(),
        });

        let mut hook = StateChangeHook::new(pool.clone(), repository.clone(), retry.clone(), clock);
        if let Some(notifier) = self.notifier {
            hook = hook.with_notifier(notifier);
        }
        let listener = hook.clone().listen()?;

        let worker: Arc<dyn JobHandler> = Arc::new(JobWorker {
            retry,
            fanout,
            executor,
        });
        for name in routes.all() {
            queue.bind(name, &worker);
        }

        info!(module_code = %routes.module_code(), "controller ready");
        Ok(Controller {
            config: self.config,
            facade,
            pool,
            repository,
            queue,
            _worker: worker,
            scanner: Arc::new(scanner),
            hook,
            listener,
            shutdown: Arc::new(ShutdownSignal::new()),
        })
    }
}

/// A wired controller deployment.
pub struct Controller {
    config: ControllerConfig,
    facade: OperationFacade,
    pool: Arc<dyn DeadlinePool>,
    repository: Arc<dyn StrategyRepository>,
    queue: Arc<TokioJobQueue>,
    // The queue holds workers weakly.
    _worker: Arc<dyn JobHandler>,
    scanner: Arc<TimeoutScanner>,
    hook: StateChangeHook,
    listener: StateChangeListener,
    shutdown: Arc<ShutdownSignal>,
}

impl Controller {
    /// Starts a builder.
    #[must_use]
    pub fn builder(config: ControllerConfig, engine: Arc<dyn EngineRuntime>) -> ControllerBuilder {
        ControllerBuilder::new(config, engine)
    }

    /// The deployment config.
    #[must_use]
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// The command facade, for API handlers.
    #[must_use]
    pub fn facade(&self) -> &OperationFacade {
        &self.facade
    }

    /// The deadline pool.
    #[must_use]
    pub fn pool(&self) -> &Arc<dyn DeadlinePool> {
        &self.pool
    }

    /// The strategy repository.
    #[must_use]
    pub fn repository(&self) -> &Arc<dyn StrategyRepository> {
        &self.repository
    }

    /// The scanner.
    #[must_use]
    pub fn scanner(&self) -> &Arc<TimeoutScanner> {
        &self.scanner
    }

    /// The state-change hook, for processing an event inline.
    #[must_use]
    pub fn hook(&self) -> &StateChangeHook {
        &self.hook
    }

    /// The shutdown signal observed by the scanner.
    #[must_use]
    pub fn shutdown_signal(&self) -> &Arc<ShutdownSignal> {
        &self.shutdown
    }

    /// Creates the retry strategies and timeout configs of a new task.
    /// Returns how many of each were stored.
    pub async fn register_task(
        &self,
        taskflow_id: u64,
        root_pipeline_id: &str,
        tree: &Value,
    ) -> Result<(usize, usize)> {
        let strategies = build_retry_strategies(taskflow_id, root_pipeline_id, tree)?;
        let configs = build_timeout_configs(taskflow_id, root_pipeline_id, tree)?;
        let counts = (strategies.len(), configs.len());

        if !strategies.is_empty() {
            self.repository.insert_retry_strategies(strategies).await?;
        }
        if !configs.is_empty() {
            self.repository.insert_timeout_configs(configs).await?;
        }
        info!(
            taskflow_id,
            root_pipeline_id,
            retry_strategies = counts.0,
            timeout_configs = counts.1,
            "task registered"
        );
        Ok(counts)
    }

    /// Deletes the strategies and timeout configs of a task.
    pub async fn purge_task(&self, root_pipeline_id: &str) -> Result<()> {
        self.repository.purge_task(root_pipeline_id).await
    }

    /// Runs the scanner on its own task until shutdown.
    pub fn spawn_scanner(&self) -> JoinHandle<()> {
        let scanner = self.scanner.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move { scanner.run(&shutdown).await })
    }

    /// Stops the scanner. Jobs already queued still run.
    pub fn shutdown(&self, reason: impl Into<String>) {
        self.shutdown.trigger(reason);
    }

    /// Runs until Ctrl-C, SIGTERM or [`shutdown`](Self::shutdown), then
    /// stops the scanner and lets queued work finish.
    pub async fn serve(&self) {
        let scanner = self.spawn_scanner();
        tokio::select! {
            () = self.shutdown.listen_for_os_signals() => {}
            () = self.shutdown.triggered() => {}
        }
        if let Err(e) = scanner.await {
            error!(error = %e, "scanner task failed");
        }
        self.drain().await;
        info!(reason = ?self.shutdown.reason(), "controller stopped");
    }

    /// Waits for every state change reported so far and every queued job,
    /// including jobs they submit.
    pub async fn drain(&self) {
        self.listener.flush().await;
        self.queue.drain().await;
    }
}

impl StateChangeObserver for Controller {
    fn on_state_change(&self, event: StateChangeEvent) {
        self.listener.on_state_change(event);
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditLog;
    use crate::core::NodeState;
    use crate::testing::{EngineCall, FakeEngine, ManualClock};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn tree() -> Value {
        json!({
            "activities": {
                "n1": {
                    "type": "ServiceActivity",
                    "auto_retry": {"enable": true, "times": 2, "interval": 1},
                    "timeout_config": {"enable": true, "seconds": 10, "action": "forced_fail"}
                },
                "n2": {"type": "ServiceActivity"}
            }
        })
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_config() {
        let engine = Arc::new(FakeEngine::new());
        let config = ControllerConfig::new().with_module_code("");
        assert!(Controller::builder(config, engine).build().is_err());
    }

    #[tokio::test]
    async fn test_register_and_purge_task() {
        let engine = Arc::new(FakeEngine::new());
        let controller = Controller::builder(ControllerConfig::new(), engine)
            .build()
            .unwrap();

        let counts = controller.register_task(1, "root", &tree()).await.unwrap();
        assert_eq!(counts, (1, 1));
        assert!(controller
            .repository()
            .get_timeout_config("n1")
            .await
            .unwrap()
            .is_some());

        controller.purge_task("root").await.unwrap();
        assert!(controller
            .repository()
            .get_retry_strategy("root", "n1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_expired_attempt_is_force_failed_end_to_end() {
        let engine = Arc::new(FakeEngine::new());
        let clock = Arc::new(ManualClock::default());
        let audit = Arc::new(InMemoryAuditLog::new());
        let controller = Controller::builder(ControllerConfig::new(), engine.clone())
            .with_clock(clock.clone())
            .with_audit(audit.clone())
            .build()
            .unwrap();
        controller.register_task(1, "root", &tree()).await.unwrap();
        engine.set_node_state("n1", NodeState::Running, "v1");
        engine.set_current_node("root", "n1");

        controller
            .hook()
            .process(StateChangeEvent::new("n1", NodeState::Running, "v1", "root"))
            .await;
        clock.advance(chrono::Duration::seconds(11));
        controller.scanner().tick().await.unwrap();
        controller.drain().await;

        assert_eq!(
            engine.calls(),
            vec![EngineCall::ForcedFail {
                node_id: "n1".into(),
                ex_data: "forced fail by system".into(),
            }]
        );
        assert_eq!(audit.records_for_node("n1").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scanner_stops_on_shutdown() {
        let engine = Arc::new(FakeEngine::new());
        let controller = Controller::builder(ControllerConfig::new(), engine)
            .build()
            .unwrap();

        let handle = controller.spawn_scanner();
        tokio::time::sleep(std::time::Duration::from_secs(3)).await;
        controller.shutdown("test over");
        handle.await.unwrap();

        assert_eq!(controller.shutdown_signal().reason().as_deref(), Some("test over"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_serve_returns_after_shutdown() {
        let engine = Arc::new(FakeEngine::new());
        let clock = Arc::new(ManualClock::default());
        let controller = Controller::builder(ControllerConfig::new(), engine.clone())
            .with_clock(clock.clone())
            .build()
            .unwrap();
        controller.register_task(1, "root", &tree()).await.unwrap();
        engine.set_node_state("n1", NodeState::Running, "v1");
        engine.set_current_node("root", "n1");

        let stop = async {
            controller.on_state_change(StateChangeEvent::new("n1", NodeState::Running, "v1", "root"));
            controller.drain().await;
            clock.advance(chrono::Duration::seconds(11));
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
            controller.shutdown("deploy");
        };
        tokio::join!(controller.serve(), stop);

        assert_eq!(controller.shutdown_signal().reason().as_deref(), Some("deploy"));
        assert_eq!(engine.calls().len(), 1);
        assert_eq!(controller.pool().len().await.unwrap(), 0);
    }
}
