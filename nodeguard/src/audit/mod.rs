//! Operation audit trail.

mod sink;

#[cfg(test)]
pub use sink::MockAuditSink;
pub use sink::{AuditSink, InMemoryAuditLog, LoggingAuditSink, NoOpAuditSink};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The kind of operation that was performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    /// Task started.
    Start,
    /// Task paused.
    Pause,
    /// Task resumed.
    Resume,
    /// Task revoked.
    Revoke,
    /// Node retried.
    Retry,
    /// Node retried inside a loop.
    LoopRetry,
    /// Node skipped.
    Skip,
    /// Node skipped inside a loop.
    LoopSkip,
    /// Node forced into failure.
    ForcedFail,
    /// Callback delivered to a node.
    Callback,
    /// Exclusive gateway skipped.
    SkipExg,
    /// Conditional parallel gateway skipped.
    SkipCpg,
}

impl OperationType {
    /// The variant recorded when the operation is issued inside a loop.
    #[must_use]
    pub fn in_loop(self) -> Self {
        match self {
            Self::Retry => Self::LoopRetry,
            Self::Skip => Self::LoopSkip,
            other => other,
        }
    }

    /// Stable name of the operation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Revoke => "revoke",
            Self::Retry => "retry",
            Self::LoopRetry => "loop_retry",
            Self::Skip => "skip",
            Self::LoopSkip => "loop_skip",
            Self::ForcedFail => "forced_fail",
            Self::Callback => "callback",
            Self::SkipExg => "skip_exg",
            Self::SkipCpg => "skip_cpg",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an operation was issued from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationSource {
    /// The application UI or an internal job.
    App,
    /// The public API.
    Api,
}

impl fmt::Display for OperationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::App => write!(f, "app"),
            Self::Api => write!(f, "api"),
        }
    }
}

/// One audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Entry id.
    pub id: Uuid,
    /// What was done.
    pub operation_type: OperationType,
    /// Where it came from.
    pub source: OperationSource,
    /// Task instance id.
    pub instance_id: u64,
    /// Who did it.
    pub operator: String,
    /// Target node, for node operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// When the entry was written.
    pub recorded_at: DateTime<Utc>,
}

impl AuditRecord {
    /// An entry for a task-level operation.
    #[must_use]
    pub fn task(
        operation_type: OperationType,
        source: OperationSource,
        instance_id: u64,
        operator: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            operation_type,
            source,
            instance_id,
            operator: operator.into(),
            node_id: None,
            recorded_at: Utc::now(),
        }
    }

    /// An entry for a node-level operation.
    #[must_use]
    pub fn node(
        operation_type: OperationType,
        source: OperationSource,
        instance_id: u64,
        operator: impl Into<String>,
        node_id: impl Into<String>,
    ) -> Self {
        Self {
            node_id: Some(node_id.into()),
            ..Self::task(operation_type, source, instance_id, operator)
        }
    }
}
