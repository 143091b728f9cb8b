//! Redis-backed lock store.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::time::Duration;
use tracing::{debug, info};

use super::LockStore;
use crate::errors::Result;

/// Locks held as plain Redis keys set with `SET NX EX`.
#[derive(Clone)]
pub struct RedisLockStore {
    connection: ConnectionManager,
}

impl RedisLockStore {
    /// Connects to `redis_url`.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        info!(url = redis_url, "connecting lock store to redis");
        let client = Client::open(redis_url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self { connection })
    }

    /// Wraps an existing connection.
    #[must_use]
    pub fn from_connection(connection: ConnectionManager) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.connection.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        let acquired = reply.is_some();
        debug!(key, acquired, "lock acquire");
        Ok(acquired)
    }

    async fn release(&self, key: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: i64 = conn.del(key).await?;
        Ok(())
    }
}

impl std::fmt::Debug for RedisLockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLockStore").finish_non_exhaustive()
    }
}
