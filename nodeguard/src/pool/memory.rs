//! In-memory deadline pool.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};

use super::DeadlinePool;
use crate::core::NodeKey;
use crate::errors::Result;

#[derive(Debug, Default)]
struct PoolState {
    deadlines: HashMap<NodeKey, DateTime<Utc>>,
    ordered: BTreeSet<(DateTime<Utc>, NodeKey)>,
}

/// Deadline pool guarded by a single lock; every operation is one critical section.
#[derive(Debug, Default)]
pub struct InMemoryDeadlinePool {
    state: Mutex<PoolState>,
}

impl InMemoryDeadlinePool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every pooled key with its deadline, earliest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(NodeKey, DateTime<Utc>)> {
        self.state
            .lock()
            .ordered
            .iter()
            .map(|(deadline, key)| (key.clone(), *deadline))
            .collect()
    }
}

#[async_trait]
impl DeadlinePool for InMemoryDeadlinePool {
    async fn mark_running(&self, key: &NodeKey, deadline: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.lock();
        if state.deadlines.contains_key(key) {
            return Ok(false);
        }
        state.deadlines.insert(key.clone(), deadline);
        state.ordered.insert((deadline, key.clone()));
        Ok(true)
    }

    async fn mark_terminal(&self, key: &NodeKey) -> Result<bool> {
        let mut state = self.state.lock();
        match state.deadlines.remove(key) {
            Some(deadline) => {
                state.ordered.remove(&(deadline, key.clone()));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn pop_expired(&self, now: DateTime<Utc>) -> Result<Vec<NodeKey>> {
        let mut state = self.state.lock();
        let mut expired = Vec::new();
        while state.ordered.first().is_some_and(|(deadline, _)| *deadline <= now) {
            if let Some((_, key)) = state.ordered.pop_first() {
                state.deadlines.remove(&key);
                expired.push(key);
            }
        }
        Ok(expired)
    }

    async fn deadline_of(&self, key: &NodeKey) -> Result<Option<DateTime<Utc>>> {
        Ok(self.state.lock().deadlines.get(key).copied())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.state.lock().deadlines.len())
    }
}
