//! Splits a persisted timeout batch into per-node strategy jobs.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::errors::Result;
use crate::queue::{Job, JobQueue, QueueRoutes};
use crate::store::StrategyRepository;

/// Turns one [`TimeoutBatchRecord`](crate::models::TimeoutBatchRecord) into
/// one `ExecuteTimeoutStrategy` job per node.
#[derive(Clone)]
pub struct TimeoutBatchDispatcher {
    repository: Arc<dyn StrategyRepository>,
    queue: Arc<dyn JobQueue>,
    routes: QueueRoutes,
}

impl TimeoutBatchDispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(
        repository: Arc<dyn StrategyRepository>,
        queue: Arc<dyn JobQueue>,
        routes: QueueRoutes,
    ) -> Self {
        Self {
            repository,
            queue,
            routes,
        }
    }

    /// Fans out batch `record_id`. Returns the number of jobs submitted.
    ///
    /// A missing record and malformed keys are logged and skipped; a failed
    /// submission is logged and the remaining nodes are still submitted.
    pub async fn dispatch(&self, record_id: u64) -> Result<usize> {
        let Some(record) = self.repository.get_timeout_batch(record_id).await? else {
            warn!(record_id, "timeout batch record not found");
            return Ok(0);
        };

        let (keys, malformed) = record.parse_keys();
        for raw in malformed {
            warn!(record_id, key = raw, "skipping malformed node key");
        }

        let queue = self.routes.timeout_execute();
        let mut submitted = 0;
        for key in keys {
            let job = Job::ExecuteTimeoutStrategy {
                node_id: key.node_id().to_string(),
                version: key.version().to_string(),
            };
            match self.queue.submit(&queue, job, Duration::ZERO).await {
                Ok(()) => submitted += 1,
                Err(e) => error!(record_id, %key, error = %e, "submitting timeout strategy failed"),
            }
        }

        info!(record_id, submitted, "timeout batch dispatched");
        Ok(submitted)
    }
}

impl std::fmt::Debug for TimeoutBatchDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutBatchDispatcher")
            .field("routes", &self.routes)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStrategyRepository;
    use crate::testing::RecordingJobQueue;
    use pretty_assertions::assert_eq;

    fn setup() -> (Arc<InMemoryStrategyRepository>, Arc<RecordingJobQueue>, TimeoutBatchDispatcher) {
        let repo = Arc::new(InMemoryStrategyRepository::new());
        let queue = Arc::new(RecordingJobQueue::new());
        let dispatcher =
            TimeoutBatchDispatcher::new(repo.clone(), queue.clone(), QueueRoutes::new("default"));
        (repo, queue, dispatcher)
    }

    #[tokio::test]
    async fn test_one_job_per_parsable_key() {
        let (repo, queue, dispatcher) = setup();
        let id = repo
            .create_timeout_batch(vec!["n1_v1".into(), "broken".into(), "n2_v3".into()])
            .await
            .unwrap();

        let submitted = dispatcher.dispatch(id).await.unwrap();

        assert_eq!(submitted, 2);
        let jobs = queue.jobs_on("timeout_node_execute_default");
        assert_eq!(
            jobs,
            vec![
                Job::ExecuteTimeoutStrategy {
                    node_id: "n1".into(),
                    version: "v1".into()
                },
                Job::ExecuteTimeoutStrategy {
                    node_id: "n2".into(),
                    version: "v3".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_record_dispatches_nothing() {
        let (_repo, queue, dispatcher) = setup();
        assert_eq!(dispatcher.dispatch(404).await.unwrap(), 0);
        assert!(queue.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_submit_failure_continues_with_next_node() {
        let (repo, queue, dispatcher) = setup();
        let id = repo
            .create_timeout_batch(vec!["n1_v1".into(), "n2_v1".into()])
            .await
            .unwrap();
        queue.fail_next(1);

        assert_eq!(dispatcher.dispatch(id).await.unwrap(), 1);
        assert_eq!(queue.submissions().len(), 1);
    }
}
