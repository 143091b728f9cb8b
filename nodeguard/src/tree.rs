//! Derives retry strategies and timeout configs from a pipeline tree.
//!
//! The tree is the engine's JSON description of a pipeline: an `activities`
//! mapping of node id to activity, where `SubProcess` activities nest a
//! complete `pipeline` of their own.

use serde_json::{Map, Value};
use tracing::{error, warn};

use crate::errors::{NodeGuardError, Result};
use crate::models::{
    NodeRetryStrategy, NodeTimeoutConfig, TimeoutAction, MAX_AUTO_RETRY_INTERVAL,
    MAX_AUTO_RETRY_TIMES,
};

const SUB_PROCESS: &str = "SubProcess";
const SERVICE_ACTIVITY: &str = "ServiceActivity";

/// Builds the retry strategies of every activity with `auto_retry.enable` set.
///
/// Attempt counts and intervals are taken by absolute value and capped; a
/// value that cannot be read as an integer falls back to the cap.
pub fn build_retry_strategies(
    taskflow_id: u64,
    root_pipeline_id: &str,
    tree: &Value,
) -> Result<Vec<NodeRetryStrategy>> {
    let mut strategies = Vec::new();
    walk(tree, &mut |node_id, activity| {
        let Some(auto_retry) = activity.get("auto_retry") else {
            return;
        };
        if !is_truthy(auto_retry.get("enable")) {
            return;
        }
        let max_retry_times = match auto_retry.get("times") {
            None => MAX_AUTO_RETRY_TIMES,
            Some(v) => read_int(v).map_or(MAX_AUTO_RETRY_TIMES, |n| {
                u32::try_from(n.unsigned_abs().min(u64::from(MAX_AUTO_RETRY_TIMES)))
                    .unwrap_or(MAX_AUTO_RETRY_TIMES)
            }),
        };
        let interval_seconds = match auto_retry.get("interval") {
            None => 0,
            Some(v) => read_int(v).map_or(MAX_AUTO_RETRY_INTERVAL, |n| {
                n.unsigned_abs().min(MAX_AUTO_RETRY_INTERVAL)
            }),
        };
        strategies.push(NodeRetryStrategy::new(
            taskflow_id,
            root_pipeline_id,
            node_id,
            max_retry_times,
            interval_seconds,
        ));
    })?;
    Ok(strategies)
}

/// Builds the timeout configs of every `ServiceActivity` with
/// `timeout_config.enable` set. Invalid seconds or actions are logged and
/// the node is left without a deadline.
pub fn build_timeout_configs(
    task_id: u64,
    root_pipeline_id: &str,
    tree: &Value,
) -> Result<Vec<NodeTimeoutConfig>> {
    let mut configs = Vec::new();
    walk(tree, &mut |node_id, activity| {
        if activity.get("type").and_then(Value::as_str) != Some(SERVICE_ACTIVITY) {
            return;
        }
        let Some(timeout) = activity.get("timeout_config") else {
            return;
        };
        if !is_truthy(timeout.get("enable")) {
            return;
        }
        let seconds = match timeout.get("seconds").and_then(Value::as_u64) {
            Some(s) if s > 0 => s,
            _ => {
                error!(
                    node_id,
                    seconds = ?timeout.get("seconds"),
                    "node has an invalid timeout, no deadline will be set"
                );
                return;
            }
        };
        let action = match timeout.get("action").and_then(Value::as_str).map(str::parse::<TimeoutAction>) {
            Some(Ok(action)) => action,
            _ => {
                warn!(node_id, action = ?timeout.get("action"), "node has an invalid timeout action");
                return;
            }
        };
        configs.push(NodeTimeoutConfig {
            task_id,
            root_pipeline_id: root_pipeline_id.to_string(),
            node_id: node_id.to_string(),
            action,
            timeout_seconds: seconds,
        });
    })?;
    Ok(configs)
}

/// Calls `visit` on every non-subprocess activity, depth first.
fn walk(tree: &Value, visit: &mut dyn FnMut(&str, &Map<String, Value>)) -> Result<()> {
    let activities = tree
        .get("activities")
        .and_then(Value::as_object)
        .ok_or_else(|| NodeGuardError::config("pipeline tree has no activities"))?;

    for (node_id, activity) in activities {
        let Some(activity) = activity.as_object() else {
            continue;
        };
        if activity.get("type").and_then(Value::as_str) == Some(SUB_PROCESS) {
            let pipeline = activity.get("pipeline").ok_or_else(|| {
                NodeGuardError::config(format!("subprocess {node_id} has no pipeline"))
            })?;
            walk(pipeline, visit)?;
        } else {
            visit(node_id, activity);
        }
    }
    Ok(())
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn read_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}
