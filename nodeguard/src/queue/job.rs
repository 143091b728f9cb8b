//! Job payloads and queue routing.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Payload of a delayed auto-retry attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RetryJob {
    /// Task instance id.
    pub taskflow_id: u64,
    /// Root pipeline id.
    pub root_pipeline_id: String,
    /// Node to retry.
    pub node_id: String,
    /// Attempts already made when the job was scheduled.
    pub retry_times: u32,
}

impl RetryJob {
    /// Key of the per-attempt lock: one node, one attempt number.
    #[must_use]
    pub fn lock_key(&self) -> String {
        format!("{}-{}-{}", self.root_pipeline_id, self.node_id, self.retry_times)
    }
}

/// Work handed to the queue layer.
///
/// Payloads stay small: a timeout batch travels as its record id and is
/// reloaded from storage by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Job {
    /// Retry a failed node.
    AutoRetryNode(RetryJob),
    /// Fan a persisted timeout batch out into per-node jobs.
    DispatchTimeoutBatch {
        /// Id of the persisted batch record.
        record_id: u64,
    },
    /// Apply the timeout strategy of one node attempt.
    ExecuteTimeoutStrategy {
        /// Node id.
        node_id: String,
        /// Attempt version popped from the pool.
        version: String,
    },
}

impl Job {
    /// Short name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::AutoRetryNode(_) => "auto_retry_node",
            Self::DispatchTimeoutBatch { .. } => "dispatch_timeout_nodes",
            Self::ExecuteTimeoutStrategy { .. } => "execute_node_timeout_strategy",
        }
    }
}

/// Name of a queue on the task-queue layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueName(String);

impl QueueName {
    /// Creates a queue name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The queue name (also used as routing key).
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Queue names scoped to one engine deployment module, so that several
/// deployments can share broker infrastructure without cross-talk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRoutes {
    module_code: String,
}

impl QueueRoutes {
    /// Creates the routes of a module.
    #[must_use]
    pub fn new(module_code: impl Into<String>) -> Self {
        Self {
            module_code: module_code.into(),
        }
    }

    /// The module code.
    #[must_use]
    pub fn module_code(&self) -> &str {
        &self.module_code
    }

    /// Queue of delayed retry attempts.
    #[must_use]
    pub fn auto_retry(&self) -> QueueName {
        QueueName::new(format!("node_auto_retry_{}", self.module_code))
    }

    /// Queue of batch fan-out jobs.
    #[must_use]
    pub fn timeout_record(&self) -> QueueName {
        QueueName::new(format!("timeout_node_record_{}", self.module_code))
    }

    /// Queue of per-node strategy executions.
    #[must_use]
    pub fn timeout_execute(&self) -> QueueName {
        QueueName::new(format!("timeout_node_execute_{}", self.module_code))
    }

    /// All queues of the module.
    #[must_use]
    pub fn all(&self) -> [QueueName; 3] {
        [self.auto_retry(), self.timeout_record(), self.timeout_execute()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_key() {
        let job = RetryJob {
            taskflow_id: 1,
            root_pipeline_id: "p1".into(),
            node_id: "n1".into(),
            retry_times: 2,
        };
        assert_eq!(job.lock_key(), "p1-n1-2");
    }

    #[test]
    fn test_routes_are_module_scoped() {
        let routes = QueueRoutes::new("default");
        assert_eq!(routes.auto_retry().as_str(), "node_auto_retry_default");
        assert_eq!(routes.timeout_record().as_str(), "timeout_node_record_default");
        assert_eq!(routes.timeout_execute().as_str(), "timeout_node_execute_default");

        let other = QueueRoutes::new("mod2");
        assert_ne!(routes.auto_retry(), other.auto_retry());
    }

    #[test]
    fn test_job_serialization_is_tagged() {
        let job = Job::DispatchTimeoutBatch { record_id: 5 };
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "dispatch_timeout_batch", "record_id": 5}));
        assert_eq!(job.name(), "dispatch_timeout_nodes");
    }
}
