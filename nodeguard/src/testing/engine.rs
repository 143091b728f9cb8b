//! A scriptable in-memory engine.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};

use crate::core::NodeState;
use crate::engine::{EngineError, EngineReply, EngineResult, EngineRuntime, NodeStateInfo};

/// A command received by [`FakeEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    /// `run_pipeline`.
    RunPipeline(String),
    /// `pause_pipeline`.
    PausePipeline(String),
    /// `resume_pipeline`.
    ResumePipeline(String),
    /// `revoke_pipeline`.
    RevokePipeline(String),
    /// `retry_node`.
    Retry(String),
    /// `skip_node`.
    Skip(String),
    /// `forced_fail_node`.
    ForcedFail {
        /// Target node.
        node_id: String,
        /// Error data attached to the failure.
        ex_data: String,
    },
    /// `callback`.
    Callback {
        /// Target node.
        node_id: String,
        /// Version the callback was addressed to.
        version: String,
    },
    /// `skip_exclusive_gateway`.
    SkipExclusiveGateway {
        /// Gateway node.
        node_id: String,
        /// Selected flow.
        flow_id: String,
    },
    /// `skip_conditional_parallel_gateway`.
    SkipConditionalParallelGateway {
        /// Gateway node.
        node_id: String,
        /// Selected flows.
        flow_ids: Vec<String>,
        /// Converge gateway.
        converge_gateway_id: String,
    },
}

#[derive(Debug, Clone)]
enum Scripted {
    Reject(String),
    Error(String),
    Panic(String),
}

#[derive(Debug, Default)]
struct FakeEngineState {
    calls: Vec<EngineCall>,
    states: HashMap<String, NodeStateInfo>,
    current: HashSet<(String, String)>,
    awaiting_retry: HashSet<String>,
    settle_after: HashMap<String, usize>,
    scripted: HashMap<&'static str, VecDeque<Scripted>>,
    version_seq: u64,
}

/// An engine double that records commands and keeps a minimal state table.
///
/// Successful commands mutate node state the way the real engine would:
/// force-fail marks the node failed and awaiting retry, retry puts it back
/// to running under a fresh version, skip finishes it.
#[derive(Debug, Default)]
pub struct FakeEngine {
    state: Mutex<FakeEngineState>,
}

impl FakeEngine {
    /// Creates an engine with no nodes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every command received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<EngineCall> {
        self.state.lock().calls.clone()
    }

    /// Returns the number of `retry_node` calls.
    #[must_use]
    pub fn retry_count(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| matches!(c, EngineCall::Retry(_)))
            .count()
    }

    /// Sets the persisted state row of a node.
    pub fn set_node_state(&self, node_id: &str, state: NodeState, version: &str) {
        self.state.lock().states.insert(
            node_id.to_string(),
            NodeStateInfo {
                node_id: node_id.to_string(),
                state,
                version: version.to_string(),
            },
        );
    }

    /// Returns the persisted state row of a node.
    #[must_use]
    pub fn node_state_of(&self, node_id: &str) -> Option<NodeStateInfo> {
        self.state.lock().states.get(node_id).cloned()
    }

    /// Points a process of `root_pipeline_id` at `node_id`.
    pub fn set_current_node(&self, root_pipeline_id: &str, node_id: &str) {
        self.state
            .lock()
            .current
            .insert((root_pipeline_id.to_string(), node_id.to_string()));
    }

    /// Moves processes of `root_pipeline_id` away from `node_id`.
    pub fn clear_current_node(&self, root_pipeline_id: &str, node_id: &str) {
        self.state
            .lock()
            .current
            .remove(&(root_pipeline_id.to_string(), node_id.to_string()));
    }

    /// Marks whether a process sleeps on `node_id` awaiting a retry.
    pub fn set_awaiting_retry(&self, node_id: &str, awaiting: bool) {
        let mut state = self.state.lock();
        if awaiting {
            state.awaiting_retry.insert(node_id.to_string());
        } else {
            state.awaiting_retry.remove(node_id);
        }
    }

    /// Reports `node_id` as awaiting retry only after `checks` negative answers.
    pub fn settle_after(&self, node_id: &str, checks: usize) {
        self.state
            .lock()
            .settle_after
            .insert(node_id.to_string(), checks);
    }

    /// Makes the next call of `command` return a rejected reply.
    pub fn reject_next(&self, command: &'static str, message: &str) {
        self.script(command, Scripted::Reject(message.to_string()));
    }

    /// Makes the next call of `command` return an error.
    pub fn error_next(&self, command: &'static str, message: &str) {
        self.script(command, Scripted::Error(message.to_string()));
    }

    /// Makes the next call of `command` panic.
    pub fn panic_next(&self, command: &'static str, message: &str) {
        self.script(command, Scripted::Panic(message.to_string()));
    }

    fn script(&self, command: &'static str, outcome: Scripted) {
        self.state
            .lock()
            .scripted
            .entry(command)
            .or_default()
            .push_back(outcome);
    }

    /// Records the call and applies any scripted outcome. Returns `None`
    /// when the command should take its normal effect.
    fn intercept(&self, command: &'static str, call: EngineCall) -> Option<EngineResult> {
        let scripted = {
            let mut state = self.state.lock();
            state.calls.push(call);
            state.scripted.get_mut(command).and_then(VecDeque::pop_front)
        };
        match scripted {
            None => None,
            Some(Scripted::Reject(message)) => Some(Ok(EngineReply::rejected(message))),
            Some(Scripted::Error(message)) => Some(Err(EngineError::new(message))),
            Some(Scripted::Panic(message)) => panic!("{message}"),
        }
    }

    fn take_query_script(&self, query: &'static str) -> EngineResult<()> {
        let scripted = self
            .state
            .lock()
            .scripted
            .get_mut(query)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(Scripted::Error(message) | Scripted::Reject(message)) => {
                Err(EngineError::new(message))
            }
            Some(Scripted::Panic(message)) => panic!("{message}"),
            None => Ok(()),
        }
    }

    fn transition(&self, node_id: &str, to: NodeState, new_version: bool) {
        let mut state = self.state.lock();
        state.version_seq += 1;
        let seq = state.version_seq;
        if let Some(info) = state.states.get_mut(node_id) {
            info.state = to;
            if new_version {
                info.version = format!("{}-r{seq}", info.version);
            }
        }
        if to == NodeState::Failed {
            state.awaiting_retry.insert(node_id.to_string());
        } else {
            state.awaiting_retry.remove(node_id);
        }
    }
}

#[async_trait]
impl EngineRuntime for FakeEngine {
    async fn run_pipeline(&self, root_pipeline_id: &str, _operator: &str) -> EngineResult {
        let call = EngineCall::RunPipeline(root_pipeline_id.to_string());
        self.intercept("run_pipeline", call)
            .unwrap_or_else(|| Ok(EngineReply::accepted()))
    }

    async fn pause_pipeline(&self, root_pipeline_id: &str) -> EngineResult {
        let call = EngineCall::PausePipeline(root_pipeline_id.to_string());
        self.intercept("pause_pipeline", call)
            .unwrap_or_else(|| Ok(EngineReply::accepted()))
    }

    async fn resume_pipeline(&self, root_pipeline_id: &str) -> EngineResult {
        let call = EngineCall::ResumePipeline(root_pipeline_id.to_string());
        self.intercept("resume_pipeline", call)
            .unwrap_or_else(|| Ok(EngineReply::accepted()))
    }

    async fn revoke_pipeline(&self, root_pipeline_id: &str) -> EngineResult {
        let call = EngineCall::RevokePipeline(root_pipeline_id.to_string());
        self.intercept("revoke_pipeline", call)
            .unwrap_or_else(|| Ok(EngineReply::accepted()))
    }

    async fn retry_node(&self, node_id: &str, _inputs: Option<serde_json::Value>) -> EngineResult {
        if let Some(out) = self.intercept("retry_node", EngineCall::Retry(node_id.to_string())) {
            return out;
        }
        self.transition(node_id, NodeState::Running, true);
        Ok(EngineReply::accepted())
    }

    async fn skip_node(&self, node_id: &str) -> EngineResult {
        if let Some(out) = self.intercept("skip_node", EngineCall::Skip(node_id.to_string())) {
            return out;
        }
        self.transition(node_id, NodeState::Finished, false);
        Ok(EngineReply::accepted())
    }

    async fn forced_fail_node(&self, node_id: &str, ex_data: &str) -> EngineResult {
        let call = EngineCall::ForcedFail {
            node_id: node_id.to_string(),
            ex_data: ex_data.to_string(),
        };
        if let Some(out) = self.intercept("forced_fail_node", call) {
            return out;
        }
        self.transition(node_id, NodeState::Failed, false);
        Ok(EngineReply::accepted())
    }

    async fn callback(&self, node_id: &str, version: &str, _data: serde_json::Value) -> EngineResult {
        let call = EngineCall::Callback {
            node_id: node_id.to_string(),
            version: version.to_string(),
        };
        self.intercept("callback", call)
            .unwrap_or_else(|| Ok(EngineReply::accepted()))
    }

    async fn skip_exclusive_gateway(&self, node_id: &str, flow_id: &str) -> EngineResult {
        let call = EngineCall::SkipExclusiveGateway {
            node_id: node_id.to_string(),
            flow_id: flow_id.to_string(),
        };
        self.intercept("skip_exclusive_gateway", call)
            .unwrap_or_else(|| Ok(EngineReply::accepted()))
    }

    async fn skip_conditional_parallel_gateway(
        &self,
        node_id: &str,
        flow_ids: &[String],
        converge_gateway_id: &str,
    ) -> EngineResult {
        let call = EngineCall::SkipConditionalParallelGateway {
            node_id: node_id.to_string(),
            flow_ids: flow_ids.to_vec(),
            converge_gateway_id: converge_gateway_id.to_string(),
        };
        self.intercept("skip_conditional_parallel_gateway", call)
            .unwrap_or_else(|| Ok(EngineReply::accepted()))
    }

    async fn node_state(&self, node_id: &str) -> EngineResult<Option<NodeStateInfo>> {
        self.take_query_script("node_state")?;
        Ok(self.state.lock().states.get(node_id).cloned())
    }

    async fn is_current_node(&self, root_pipeline_id: &str, node_id: &str) -> EngineResult<bool> {
        self.take_query_script("is_current_node")?;
        Ok(self
            .state
            .lock()
            .current
            .contains(&(root_pipeline_id.to_string(), node_id.to_string())))
    }

    async fn is_awaiting_retry(&self, node_id: &str) -> EngineResult<bool> {
        self.take_query_script("is_awaiting_retry")?;
        let mut state = self.state.lock();
        if let Some(remaining) = state.settle_after.get_mut(node_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(false);
            }
        }
        Ok(state.awaiting_retry.contains(node_id))
    }
}
