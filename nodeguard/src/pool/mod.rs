//! The deadline pool: running node attempts ordered by absolute deadline.
//!
//! Members are [`NodeKey`]s. A key enters the pool when its attempt starts
//! running and leaves it either when the attempt reaches a terminal state or
//! when the scanner pops it as expired. Popping is atomic, so two scanners
//! never receive the same key.

mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use memory::InMemoryDeadlinePool;
#[cfg(feature = "redis")]
pub use self::redis::RedisDeadlinePool;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::NodeKey;
use crate::errors::Result;

/// Time-ordered store of running attempts.
#[async_trait]
pub trait DeadlinePool: Send + Sync {
    /// Inserts `key` unless present. Returns true if inserted; an existing
    /// deadline is never overwritten.
    async fn mark_running(&self, key: &NodeKey, deadline: DateTime<Utc>) -> Result<bool>;

    /// Removes `key`. Returns true if it was present.
    async fn mark_terminal(&self, key: &NodeKey) -> Result<bool>;

    /// Removes and returns every key whose deadline is at or before `now`.
    async fn pop_expired(&self, now: DateTime<Utc>) -> Result<Vec<NodeKey>>;

    /// The deadline of `key`, if pooled.
    async fn deadline_of(&self, key: &NodeKey) -> Result<Option<DateTime<Utc>>>;

    /// Number of pooled keys.
    async fn len(&self) -> Result<usize>;

    /// Returns true if nothing is pooled.
    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}
