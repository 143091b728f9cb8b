//! Persisted records: retry strategies, timeout configs and timeout batches.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::NodeKey;
use crate::errors::NodeGuardError;

/// Upper bound on configured retry attempts.
pub const MAX_AUTO_RETRY_TIMES: u32 = 10;

/// Upper bound on the configured delay between retry attempts, in seconds.
pub const MAX_AUTO_RETRY_INTERVAL: u64 = 10;

/// Auto-retry policy of one node, with its attempt counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRetryStrategy {
    /// Task instance id.
    pub taskflow_id: u64,
    /// Root pipeline id.
    pub root_pipeline_id: String,
    /// Node id (unique).
    pub node_id: String,
    /// Attempts dispatched so far.
    pub retry_times: u32,
    /// Attempt budget.
    pub max_retry_times: u32,
    /// Delay before each attempt.
    pub interval_seconds: u64,
}

impl NodeRetryStrategy {
    /// Creates a fresh strategy with no attempts made.
    #[must_use]
    pub fn new(
        taskflow_id: u64,
        root_pipeline_id: impl Into<String>,
        node_id: impl Into<String>,
        max_retry_times: u32,
        interval_seconds: u64,
    ) -> Self {
        Self {
            taskflow_id,
            root_pipeline_id: root_pipeline_id.into(),
            node_id: node_id.into(),
            retry_times: 0,
            max_retry_times,
            interval_seconds,
        }
    }

    /// Returns true while another attempt fits in the budget.
    #[must_use]
    pub fn can_dispatch(&self) -> bool {
        self.retry_times.saturating_add(1) <= self.max_retry_times
    }
}

/// What to do with a node that overran its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeoutAction {
    /// Force the node into failure.
    #[serde(rename = "forced_fail")]
    ForceFail,
    /// Force the node into failure, then skip it.
    #[serde(rename = "forced_fail_and_skip")]
    ForceFailAndSkip,
}

impl TimeoutAction {
    /// Stable name of the action.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ForceFail => "forced_fail",
            Self::ForceFailAndSkip => "forced_fail_and_skip",
        }
    }
}

impl fmt::Display for TimeoutAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeoutAction {
    type Err = NodeGuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "forced_fail" => Ok(Self::ForceFail),
            "forced_fail_and_skip" => Ok(Self::ForceFailAndSkip),
            other => Err(NodeGuardError::config(format!("unknown timeout action: {other}"))),
        }
    }
}

/// Execution deadline of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTimeoutConfig {
    /// Task instance id.
    pub task_id: u64,
    /// Root pipeline id.
    pub root_pipeline_id: String,
    /// Node id (unique).
    pub node_id: String,
    /// Action applied on overrun.
    pub action: TimeoutAction,
    /// Allowed running time.
    pub timeout_seconds: u64,
}

/// Keys popped from the pool by one scanner tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutBatchRecord {
    /// Record id.
    pub id: u64,
    /// Expired attempts as `"{node}_{version}"` strings, parsed on fan-out.
    pub node_keys: Vec<String>,
}

impl TimeoutBatchRecord {
    /// Parses every key, returning the malformed ones separately.
    #[must_use]
    pub fn parse_keys(&self) -> (Vec<NodeKey>, Vec<&str>) {
        let mut parsed = Vec::with_capacity(self.node_keys.len());
        let mut malformed = Vec::new();
        for raw in &self.node_keys {
            match raw.parse::<NodeKey>() {
                Ok(key) => parsed.push(key),
                Err(_) => malformed.push(raw.as_str()),
            }
        }
        (parsed, malformed)
    }
}
