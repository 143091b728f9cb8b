//! In-process queue backed by tokio tasks.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::{Job, JobHandler, JobQueue, QueueName};
use crate::errors::{NodeGuardError, Result};

/// Runs each submitted job on its own tokio task after the requested delay.
///
/// Workers are bound per queue name. The queue holds them weakly, since the
/// worker usually owns the queue itself.
pub struct TokioJobQueue {
    runtime: Handle,
    workers: RwLock<HashMap<QueueName, Weak<dyn JobHandler>>>,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl TokioJobQueue {
    /// Creates a queue on the current tokio runtime.
    pub fn new() -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| NodeGuardError::Runtime(e.to_string()))?;
        Ok(Self::with_runtime(runtime))
    }

    /// Creates a queue spawning onto `runtime`.
    #[must_use]
    pub fn with_runtime(runtime: Handle) -> Self {
        Self {
            runtime,
            workers: RwLock::new(HashMap::new()),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Binds `handler` as the worker of `queue`.
    pub fn bind(&self, queue: QueueName, handler: &Arc<dyn JobHandler>) {
        debug!(%queue, "worker bound");
        self.workers.write().insert(queue, Arc::downgrade(handler));
    }

    /// Number of jobs submitted and not yet finished.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        let mut pending = self.pending.lock();
        pending.retain(|h| !h.is_finished());
        pending.len()
    }

    /// Waits until every submitted job, including jobs submitted by jobs, has finished.
    pub async fn drain(&self) {
        loop {
            let handles: Vec<_> = self.pending.lock().drain(..).collect();
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    error!(error = %e, "queued job aborted");
                }
            }
        }
    }
}

#[async_trait]
impl JobQueue for TokioJobQueue {
    async fn submit(&self, queue: &QueueName, job: Job, delay: Duration) -> Result<()> {
        let handler = self
            .workers
            .read()
            .get(queue)
            .and_then(Weak::upgrade)
            .ok_or_else(|| NodeGuardError::queue(format!("no worker bound to queue {queue}")))?;

        debug!(%queue, job = job.name(), delay_ms = delay.as_millis() as u64, "job submitted");
        let handle = self.runtime.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            handler.handle(job).await;
        });

        let mut pending = self.pending.lock();
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
        Ok(())
    }
}

impl std::fmt::Debug for TokioJobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioJobQueue")
            .field("queues", &self.workers.read().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(Job, tokio::time::Instant)>>,
    }

    #[async_trait]
    impl JobHandler for Recorder {
        async fn handle(&self, job: Job) {
            self.seen.lock().push((job, tokio::time::Instant::now()));
        }
    }

    #[tokio::test]
    async fn test_submit_without_worker_fails() {
        let queue = TokioJobQueue::new().unwrap();
        let err = queue
            .submit(&QueueName::new("missing"), Job::DispatchTimeoutBatch { record_id: 1 }, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, NodeGuardError::Queue(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_job_runs_after_delay() {
        let queue = TokioJobQueue::new().unwrap();
        let recorder = Arc::new(Recorder::default());
        let handler: Arc<dyn JobHandler> = recorder.clone();
        let name = QueueName::new("q");
        queue.bind(name.clone(), &handler);

        let start = tokio::time::Instant::now();
        queue
            .submit(&name, Job::DispatchTimeoutBatch { record_id: 7 }, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(queue.in_flight(), 1);

        queue.drain().await;

        let seen = recorder.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, Job::DispatchTimeoutBatch { record_id: 7 });
        assert!(seen[0].1 - start >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_dropped_worker_is_not_called() {
        let queue = TokioJobQueue::new().unwrap();
        let name = QueueName::new("q");
        {
            let handler: Arc<dyn JobHandler> = Arc::new(Recorder::default());
            queue.bind(name.clone(), &handler);
        }
        let result = queue
            .submit(&name, Job::DispatchTimeoutBatch { record_id: 1 }, Duration::ZERO)
            .await;
        assert!(result.is_err());
    }
}
