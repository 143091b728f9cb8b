//! Node states reported by the engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A node state as reported in engine state-change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    /// Node was created but not scheduled.
    Created,
    /// Node is ready to run.
    Ready,
    /// Node is executing.
    Running,
    /// Node was paused.
    Suspended,
    /// Node is blocked on a gateway.
    Blocked,
    /// Node failed.
    Failed,
    /// Node finished successfully.
    Finished,
    /// Node was revoked.
    Revoked,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "CREATED"),
            Self::Ready => write!(f, "READY"),
            Self::Running => write!(f, "RUNNING"),
            Self::Suspended => write!(f, "SUSPENDED"),
            Self::Blocked => write!(f, "BLOCKED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Finished => write!(f, "FINISHED"),
            Self::Revoked => write!(f, "REVOKED"),
        }
    }
}

impl NodeState {
    /// Returns true if leaving this state ends a node's race against its deadline.
    #[must_use]
    pub fn clears_deadline(&self) -> bool {
        matches!(self, Self::Failed | Self::Finished | Self::Suspended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(NodeState::Running.to_string(), "RUNNING");
        assert_eq!(NodeState::Failed.to_string(), "FAILED");
    }

    #[test]
    fn test_state_serde() {
        let json = serde_json::to_string(&NodeState::Finished).unwrap();
        assert_eq!(json, "\"FINISHED\"");
        let state: NodeState = serde_json::from_str("\"SUSPENDED\"").unwrap();
        assert_eq!(state, NodeState::Suspended);
    }

    #[test]
    fn test_clears_deadline() {
        assert!(NodeState::Failed.clears_deadline());
        assert!(NodeState::Finished.clears_deadline());
        assert!(NodeState::Suspended.clears_deadline());
        assert!(!NodeState::Running.clears_deadline());
        assert!(!NodeState::Revoked.clears_deadline());
    }
}
