//! Log-structured stream backend abstraction.
//!
//! The worker, history log, and admin surface speak this trait; the Redis
//! implementation is the production backend and an in-memory one backs
//! tests. Semantics follow Redis Streams consumer groups.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: String,
    pub fields: HashMap<String, String>,
}

impl StreamEntry {
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub id: String,
    pub consumer: String,
    pub idle_ms: u64,
}

#[async_trait]
pub trait StreamBackend: Send + Sync {
    /// Append an entry; the backend assigns and returns the stream id.
    async fn xadd(&self, stream: &str, fields: &[(String, String)]) -> Result<String>;

    /// Append with approximate maxlen trimming (capped streams).
    async fn xadd_maxlen(
        &self,
        stream: &str,
        maxlen: u64,
        fields: &[(String, String)],
    ) -> Result<String>;

    /// Ack in the group, then delete from the stream.
    async fn ack_and_delete(&self, stream: &str, group: &str, id: &str) -> Result<()>;

    async fn xlen(&self, stream: &str) -> Result<u64>;

    /// Create the consumer group at position 0 (pre-existing backlog stays
    /// visible); an already-existing group is not an error.
    async fn group_create(&self, stream: &str, group: &str) -> Result<()>;

    /// Read new (never-delivered) entries, blocking up to `block_ms`.
    async fn read_new(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamEntry>>;

    /// Re-read entries already delivered to this consumer but not acked.
    async fn read_own_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>>;

    /// Total pending entries in the group.
    async fn pending_count(&self, stream: &str, group: &str) -> Result<u64>;

    /// Pending entries with owner and idle time, oldest first.
    async fn pending_range(
        &self,
        stream: &str,
        group: &str,
        count: usize,
    ) -> Result<Vec<PendingEntry>>;

    /// Claim pending entries (from any consumer) idle at least
    /// `min_idle_ms`, transferring ownership to `consumer`.
    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        ids: &[String],
    ) -> Result<Vec<StreamEntry>>;

    /// Oldest-first scan.
    async fn range_head(&self, stream: &str, count: usize) -> Result<Vec<StreamEntry>>;

    /// Newest-first scan.
    async fn revrange_head(&self, stream: &str, count: usize) -> Result<Vec<StreamEntry>>;

    /// Bulk delete; returns how many entries were removed.
    async fn delete(&self, stream: &str, ids: &[String]) -> Result<u64>;
}

pub type SharedStreamBackend = std::sync::Arc<dyn StreamBackend>;
