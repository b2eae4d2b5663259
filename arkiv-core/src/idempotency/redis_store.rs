use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use super::ClaimStore;
use crate::error::ArchiveError;

/// Redis-backed claim store: `SET key 1 NX EX ttl` for the claim, `DEL` for
/// release. The prefix segregates delivery claims from ticket locks on a
/// shared server.
pub struct RedisClaimStore {
    conn: ConnectionManager,
    prefix: String,
    ttl: Duration,
}

impl std::fmt::Debug for RedisClaimStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisClaimStore")
            .field("prefix", &self.prefix)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl RedisClaimStore {
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>, ttl: Duration) -> Self {
        debug_assert!(!ttl.is_zero(), "redis claim store needs a positive TTL");
        Self {
            conn,
            prefix: prefix.into(),
            ttl,
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }
}

#[async_trait]
impl ClaimStore for RedisClaimStore {
    async fn try_claim(&self, key: &str) -> Result<bool, ArchiveError> {
        let mut conn = self.conn.clone();
        let set: bool = redis::cmd("SET")
            .arg(self.key(key))
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(self.ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map(|value: Option<String>| value.is_some())?;
        Ok(set)
    }

    async fn release(&self, key: &str) -> Result<(), ArchiveError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(self.key(key)).await?;
        Ok(())
    }
}
