//! Core types shared by every component.

mod clock;
mod key;
mod state;

pub use clock::{Clock, SystemClock};
pub use key::NodeKey;
pub use state::NodeState;

use serde::{Deserialize, Serialize};

/// Identifies the task instance that owns a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskRef {
    /// Task instance id.
    pub id: u64,
    /// Root pipeline id of the running instance.
    pub root_pipeline_id: String,
}

impl TaskRef {
    /// Creates a new task reference.
    #[must_use]
    pub fn new(id: u64, root_pipeline_id: impl Into<String>) -> Self {
        Self {
            id,
            root_pipeline_id: root_pipeline_id.into(),
        }
    }
}
