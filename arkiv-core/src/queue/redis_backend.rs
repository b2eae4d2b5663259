//! Redis Streams implementation of [`StreamBackend`].

use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{
    StreamClaimReply, StreamId, StreamMaxlen, StreamPendingCountReply, StreamPendingReply,
    StreamRangeReply, StreamReadOptions, StreamReadReply,
};
use redis::AsyncCommands;

use super::backend::{PendingEntry, StreamBackend, StreamEntry};
use crate::error::Result;

pub struct RedisStreams {
    conn: ConnectionManager,
}

impl std::fmt::Debug for RedisStreams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStreams").finish()
    }
}

impl RedisStreams {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn))
    }
}

fn entry_from_stream_id(id: StreamId) -> StreamEntry {
    let fields: HashMap<String, String> = id
        .map
        .into_iter()
        .filter_map(|(key, value)| {
            redis::from_redis_value::<String>(value)
                .ok()
                .map(|text| (key, text))
        })
        .collect();
    StreamEntry { id: id.id, fields }
}

fn entries_from_read_reply(reply: StreamReadReply) -> Vec<StreamEntry> {
    reply
        .keys
        .into_iter()
        .flat_map(|key| key.ids)
        .map(entry_from_stream_id)
        .collect()
}

#[async_trait]
impl StreamBackend for RedisStreams {
    async fn xadd(&self, stream: &str, fields: &[(String, String)]) -> Result<String> {
        let mut conn = self.conn.clone();
        let id: String = conn.xadd(stream, "*", fields).await?;
        Ok(id)
    }

    async fn xadd_maxlen(
        &self,
        stream: &str,
        maxlen: u64,
        fields: &[(String, String)],
    ) -> Result<String> {
        let mut conn = self.conn.clone();
        let id: String = conn
            .xadd_maxlen(stream, StreamMaxlen::Approx(maxlen as usize), "*", fields)
            .await?;
        Ok(id)
    }

    async fn ack_and_delete(&self, stream: &str, group: &str, id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let ack: std::result::Result<u64, redis::RedisError> =
            conn.xack(stream, group, &[id]).await;
        // Delete even when the ack failed so a poisoned entry cannot wedge
        // the stream.
        let _: u64 = conn.xdel(stream, &[id]).await?;
        ack?;
        Ok(())
    }

    async fn xlen(&self, stream: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        Ok(conn.xlen(stream).await?)
    }

    async fn group_create(&self, stream: &str, group: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let created: std::result::Result<(), redis::RedisError> =
            conn.xgroup_create_mkstream(stream, group, "0").await;
        match created {
            Ok(()) => Ok(()),
            Err(err) if err.code() == Some("BUSYGROUP") => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn read_new(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamEntry>> {
        let mut conn = self.conn.clone();
        let options = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block_ms as usize);
        let reply: StreamReadReply = conn.xread_options(&[stream], &[">"], &options).await?;
        Ok(entries_from_read_reply(reply))
    }

    async fn read_own_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let mut conn = self.conn.clone();
        let options = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(1);
        let reply: StreamReadReply = conn.xread_options(&[stream], &["0"], &options).await?;
        Ok(entries_from_read_reply(reply))
    }

    async fn pending_count(&self, stream: &str, group: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let reply: StreamPendingReply = conn.xpending(stream, group).await?;
        Ok(match reply {
            StreamPendingReply::Empty => 0,
            StreamPendingReply::Data(data) => data.count as u64,
            _ => 0,
        })
    }

    async fn pending_range(
        &self,
        stream: &str,
        group: &str,
        count: usize,
    ) -> Result<Vec<PendingEntry>> {
        let mut conn = self.conn.clone();
        let reply: StreamPendingCountReply =
            conn.xpending_count(stream, group, "-", "+", count).await?;
        Ok(reply
            .ids
            .into_iter()
            .map(|entry| PendingEntry {
                id: entry.id,
                consumer: entry.consumer,
                idle_ms: entry.last_delivered_ms as u64,
            })
            .collect())
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        ids: &[String],
    ) -> Result<Vec<StreamEntry>> {
        let mut conn = self.conn.clone();
        let reply: StreamClaimReply = conn
            .xclaim(stream, group, consumer, min_idle_ms as usize, ids)
            .await?;
        Ok(reply.ids.into_iter().map(entry_from_stream_id).collect())
    }

    async fn range_head(&self, stream: &str, count: usize) -> Result<Vec<StreamEntry>> {
        let mut conn = self.conn.clone();
        let reply: StreamRangeReply = conn.xrange_count(stream, "-", "+", count).await?;
        Ok(reply.ids.into_iter().map(entry_from_stream_id).collect())
    }

    async fn revrange_head(&self, stream: &str, count: usize) -> Result<Vec<StreamEntry>> {
        let mut conn = self.conn.clone();
        let reply: StreamRangeReply = conn.xrevrange_count(stream, "+", "-", count).await?;
        Ok(reply.ids.into_iter().map(entry_from_stream_id).collect())
    }

    async fn delete(&self, stream: &str, ids: &[String]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for id in ids {
            pipe.cmd("XDEL").arg(stream).arg(id);
        }
        let deleted: Vec<u64> = pipe.query_async(&mut conn).await?;
        Ok(deleted.into_iter().sum())
    }
}
