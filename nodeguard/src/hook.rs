//! Reaction to engine state-change notifications.
//!
//! The engine calls [`StateChangeObserver::on_state_change`] synchronously
//! from inside its own transition, so the observer only enqueues and
//! returns. A single consumer task then runs [`StateChangeHook::process`]
//! for each event in notification order, keeping the deadline pool in step
//! with running attempts, scheduling retries of failed nodes and forwarding
//! terminal events.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::core::{Clock, NodeKey, NodeState};
use crate::errors::{NodeGuardError, Result};
use crate::pool::DeadlinePool;
use crate::retry::{AutoRetryDispatcher, RetryDispatch};
use crate::store::StrategyRepository;

/// One engine state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChangeEvent {
    /// Node that transitioned.
    pub node_id: String,
    /// State entered.
    pub to_state: NodeState,
    /// Attempt version of the node.
    pub version: String,
    /// Root pipeline of the node.
    pub root_id: String,
    /// Direct parent pipeline.
    pub parent_id: String,
    /// Loop iteration of the node.
    pub loop_count: u32,
}

impl StateChangeEvent {
    /// Creates an event for a node in its first loop iteration.
    #[must_use]
    pub fn new(
        node_id: impl Into<String>,
        to_state: NodeState,
        version: impl Into<String>,
        root_id: impl Into<String>,
    ) -> Self {
        let root_id = root_id.into();
        Self {
            node_id: node_id.into(),
            to_state,
            version: version.into(),
            parent_id: root_id.clone(),
            root_id,
            loop_count: 1,
        }
    }

    /// Sets the parent pipeline.
    #[must_use]
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = parent_id.into();
        self
    }

    /// Sets the loop iteration.
    #[must_use]
    pub fn with_loop_count(mut self, loop_count: u32) -> Self {
        self.loop_count = loop_count;
        self
    }

    /// Returns true if the event is about the root pipeline itself.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.node_id == self.root_id
    }

    /// The pool key of the attempt.
    #[must_use]
    pub fn node_key(&self) -> NodeKey {
        NodeKey::new(self.node_id.clone(), self.version.clone())
    }
}

/// Receives engine state transitions. Must return quickly.
pub trait StateChangeObserver: Send + Sync {
    /// Called once per transition.
    fn on_state_change(&self, event: StateChangeEvent);
}

/// Kind of a terminal event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalKind {
    /// A node failed and will not be retried automatically.
    NodeFailed,
    /// The root pipeline finished.
    TaskFinished,
    /// The root pipeline was revoked.
    TaskRevoked,
}

/// An event worth telling the task owner about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalEvent {
    /// What happened.
    pub kind: TerminalKind,
    /// Root pipeline of the task.
    pub root_pipeline_id: String,
    /// Node concerned; the root pipeline id for task-level events.
    pub node_id: String,
}

/// Delivers terminal events to task owners.
#[async_trait]
pub trait TerminalNotifier: Send + Sync {
    /// Delivers one event.
    async fn notify(&self, event: TerminalEvent) -> Result<()>;
}

/// A notifier that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingTerminalNotifier;

#[async_trait]
impl TerminalNotifier for LoggingTerminalNotifier {
    async fn notify(&self, event: TerminalEvent) -> Result<()> {
        info!(
            kind = ?event.kind,
            root_pipeline_id = %event.root_pipeline_id,
            node_id = %event.node_id,
            "terminal event"
        );
        Ok(())
    }
}

/// A notifier collecting events for tests.
#[derive(Debug, Default)]
pub struct CollectingTerminalNotifier {
    events: RwLock<Vec<TerminalEvent>>,
}

impl CollectingTerminalNotifier {
    /// Creates an empty notifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events received so far.
    #[must_use]
    pub fn events(&self) -> Vec<TerminalEvent> {
        self.events.read().clone()
    }
}

#[async_trait]
impl TerminalNotifier for CollectingTerminalNotifier {
    async fn notify(&self, event: TerminalEvent) -> Result<()> {
        self.events.write().push(event);
        Ok(())
    }
}

/// Routes state transitions to the deadline pool, the retry dispatcher
/// and the terminal notifier.
#[derive(Clone)]
pub struct StateChangeHook {
    pool: Arc<dyn DeadlinePool>,
    repository: Arc<dyn StrategyRepository>,
    retry: AutoRetryDispatcher,
    notifier: Arc<dyn TerminalNotifier>,
    clock: Arc<dyn Clock>,
}

impl StateChangeHook {
    /// Creates a hook with a logging terminal notifier.
    #[must_use]
    pub fn new(
        pool: Arc<dyn DeadlinePool>,
        repository: Arc<dyn StrategyRepository>,
        retry: AutoRetryDispatcher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            pool,
            repository,
            retry,
            notifier: Arc::new(LoggingTerminalNotifier),
            clock,
        }
    }

    /// Replaces the terminal notifier.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn TerminalNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Starts the consumer task on the current tokio runtime and returns
    /// the observer feeding it.
    pub fn listen(self) -> Result<StateChangeListener> {
        let runtime = Handle::try_current().map_err(|e| NodeGuardError::Runtime(e.to_string()))?;
        let (tx, mut rx) = mpsc::unbounded_channel::<HookMessage>();

        let worker = runtime.spawn(async move {
            while let Some(message) = rx.recv().await {
                match message {
                    HookMessage::Event(event) => self.process(event).await,
                    HookMessage::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            debug!("state change consumer stopped");
        });

        Ok(StateChangeListener { tx, worker })
    }

    /// Handles one transition to completion. Failures are logged.
    pub async fn process(&self, event: StateChangeEvent) {
        debug!(
            node_id = %event.node_id,
            state = %event.to_state,
            version = %event.version,
            "state change"
        );

        if event.to_state == NodeState::Running {
            if let Err(e) = self.start_deadline(&event).await {
                error!(node_id = %event.node_id, error = %e, "deadline registration failed");
            }
        } else if event.to_state.clears_deadline() {
            if let Err(e) = self.pool.mark_terminal(&event.node_key()).await {
                error!(node_id = %event.node_id, error = %e, "deadline removal failed");
            }
        }

        match event.to_state {
            NodeState::Failed => {
                let dispatch = self.retry.dispatch(&event.root_id, &event.node_id).await;
                if !dispatch.is_scheduled() {
                    if let RetryDispatch::Exhausted { retry_times, .. } = dispatch {
                        info!(node_id = %event.node_id, retry_times, "node failed for good");
                    }
                    self.notify(TerminalKind::NodeFailed, &event).await;
                }
            }
            NodeState::Finished if event.is_root() => {
                self.notify(TerminalKind::TaskFinished, &event).await;
            }
            NodeState::Revoked if event.is_root() => {
                self.notify(TerminalKind::TaskRevoked, &event).await;
            }
            _ => {}
        }
    }

    async fn start_deadline(&self, event: &StateChangeEvent) -> Result<()> {
        let Some(config) = self.repository.get_timeout_config(&event.node_id).await? else {
            return Ok(());
        };

        let timeout = chrono::Duration::from_std(std::time::Duration::from_secs(
            config.timeout_seconds,
        ))
        .map_err(|e| NodeGuardError::config(format!("timeout out of range: {e}")))?;
        let deadline = self
            .clock
            .now()
            .checked_add_signed(timeout)
            .ok_or_else(|| NodeGuardError::config("deadline out of range"))?;

        let key = event.node_key();
        if self.pool.mark_running(&key, deadline).await? {
            debug!(%key, %deadline, "deadline registered");
        } else {
            debug!(%key, "deadline already registered");
        }
        Ok(())
    }

    async fn notify(&self, kind: TerminalKind, event: &StateChangeEvent) {
        let terminal = TerminalEvent {
            kind,
            root_pipeline_id: event.root_id.clone(),
            node_id: event.node_id.clone(),
        };
        if let Err(e) = self.notifier.notify(terminal).await {
            warn!(node_id = %event.node_id, ?kind, error = %e, "terminal notification failed");
        }
    }
}

enum HookMessage {
    Event(StateChangeEvent),
    Flush(oneshot::Sender<()>),
}

/// The observer handed to the engine.
///
/// Events go through an unbounded channel to one consumer, so transitions
/// of a node are applied to the pool in the order they were reported and
/// the engine is never blocked or told to retry.
pub struct StateChangeListener {
    tx: mpsc::UnboundedSender<HookMessage>,
    worker: JoinHandle<()>,
}

impl StateChangeListener {
    /// Waits until every event enqueued before this call has been processed.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(HookMessage::Flush(done)).is_err() {
            return;
        }
        let _ = wait.await;
    }

    /// Returns true while the consumer task is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.worker.is_finished()
    }
}

impl StateChangeObserver for StateChangeListener {
    fn on_state_change(&self, event: StateChangeEvent) {
        if let Err(rejected) = self.tx.send(HookMessage::Event(event)) {
            if let HookMessage::Event(event) = rejected.0 {
                error!(
                    node_id = %event.node_id,
                    state = %event.to_state,
                    "state change consumer gone, event lost"
                );
            }
        }
    }
}

impl Drop for StateChangeListener {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

impl std::fmt::Debug for StateChangeListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateChangeListener")
            .field("running", &self.is_running())
            .finish()
    }
}

impl std::fmt::Debug for StateChangeHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateChangeHook")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
