//! Replay suppression and per-ticket mutual exclusion.
//!
//! Both concerns share one interface: an atomic `try_claim` plus `release`.
//! The in-process and Redis backends have identical semantics; only
//! cross-process visibility differs.

mod memory;
mod redis_store;

use std::sync::Arc;

use async_trait::async_trait;

pub use memory::InMemoryTtlSet;
pub use redis_store::RedisClaimStore;

#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// Atomically claim `key`. Returns true iff the key was not already
    /// claimed within its TTL.
    async fn try_claim(&self, key: &str) -> Result<bool, crate::error::ArchiveError>;

    /// Drop a claim early. Releasing an unknown key is a no-op.
    async fn release(&self, key: &str) -> Result<(), crate::error::ArchiveError>;
}

pub type SharedClaimStore = Arc<dyn ClaimStore>;
