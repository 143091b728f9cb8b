//! Deadline pool on a Redis sorted set.
//!
//! Scores are deadlines in epoch seconds. Expired members are selected and
//! removed by one Lua script, which Redis runs atomically.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use tracing::{debug, info, warn};

use super::DeadlinePool;
use crate::core::NodeKey;
use crate::errors::Result;

const POP_EXPIRED: &str = r"
local members = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
for i = 1, #members, 5000 do
    redis.call('ZREM', KEYS[1], unpack(members, i, math.min(i + 4999, #members)))
end
return members
";

#[allow(clippy::cast_precision_loss)]
fn to_score(deadline: DateTime<Utc>) -> f64 {
    deadline.timestamp_millis() as f64 / 1000.0
}

#[allow(clippy::cast_possible_truncation)]
fn from_score(score: f64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt((score * 1000.0).round() as i64).single()
}

/// Deadline pool shared by every process of a deployment module.
#[derive(Clone)]
pub struct RedisDeadlinePool {
    connection: ConnectionManager,
    key: String,
    pop_script: Script,
}

impl RedisDeadlinePool {
    /// Connects to `redis_url`, storing the pool under `pool_key`.
    pub async fn connect(redis_url: &str, pool_key: impl Into<String>) -> Result<Self> {
        info!(url = redis_url, "connecting deadline pool to redis");
        let client = Client::open(redis_url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self::from_connection(connection, pool_key))
    }

    /// Wraps an existing connection.
    #[must_use]
    pub fn from_connection(connection: ConnectionManager, pool_key: impl Into<String>) -> Self {
        Self {
            connection,
            key: pool_key.into(),
            pop_script: Script::new(POP_EXPIRED),
        }
    }

    /// The sorted-set key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl DeadlinePool for RedisDeadlinePool {
    async fn mark_running(&self, key: &NodeKey, deadline: DateTime<Utc>) -> Result<bool> {
        let mut conn = self.connection.clone();
        let added: i64 = redis::cmd("ZADD")
            .arg(&self.key)
            .arg("NX")
            .arg(to_score(deadline))
            .arg(key.to_string())
            .query_async(&mut conn)
            .await?;
        Ok(added > 0)
    }

    async fn mark_terminal(&self, key: &NodeKey) -> Result<bool> {
        let mut conn = self.connection.clone();
        let removed: i64 = conn.zrem(&self.key, key.to_string()).await?;
        Ok(removed > 0)
    }

    async fn pop_expired(&self, now: DateTime<Utc>) -> Result<Vec<NodeKey>> {
        let mut conn = self.connection.clone();
        let members: Vec<String> = self
            .pop_script
            .key(&self.key)
            .arg(to_score(now))
            .invoke_async(&mut conn)
            .await?;

        debug!(count = members.len(), "expired members popped");
        Ok(members
            .into_iter()
            .filter_map(|member| match member.parse::<NodeKey>() {
                Ok(key) => Some(key),
                Err(e) => {
                    warn!(%member, error = %e, "dropping malformed pool member");
                    None
                }
            })
            .collect())
    }

    async fn deadline_of(&self, key: &NodeKey) -> Result<Option<DateTime<Utc>>> {
        let mut conn = self.connection.clone();
        let score: Option<f64> = conn.zscore(&self.key, key.to_string()).await?;
        Ok(score.and_then(from_score))
    }

    async fn len(&self) -> Result<usize> {
        let mut conn = self.connection.clone();
        let count: usize = conn.zcard(&self.key).await?;
        Ok(count)
    }
}

impl std::fmt::Debug for RedisDeadlinePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisDeadlinePool")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}
