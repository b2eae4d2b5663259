//! Durable queue: envelope codec, stream backends, worker loop, history
//! log, and the ops helpers (stats, DLQ drain).

mod backend;
mod envelope;
mod history;
mod memory;
mod redis_backend;
mod worker;

use serde::Serialize;

pub use backend::{PendingEntry, SharedStreamBackend, StreamBackend, StreamEntry};
pub use envelope::{
    Envelope, EnvelopeDecodeError, MAX_LAST_ERROR_LEN, canonical_payload_json, decode_entry,
    encode_fields,
};
pub use history::{HistoryEvent, HistoryLog, HistoryStatus};
pub use memory::InMemoryStreams;
pub use redis_backend::RedisStreams;
pub use worker::{
    CLAIM_IDLE_MS, DLQ_REASON_INVALID, DLQ_REASON_PERMANENT, DLQ_REASON_RETRY_EXHAUSTED,
    QueueWorker, WorkerConfig, enqueue_job,
};

use arkiv_config::WorkflowConfig;

use crate::error::Result;

/// Consumer name: configured override, else `<hostname>-<pid>`.
pub fn consumer_name(cfg: &WorkflowConfig) -> String {
    if let Some(configured) = cfg.queue_consumer.as_deref()
        && !configured.trim().is_empty()
    {
        return configured.trim().to_string();
    }
    let hostname = std::env::var("HOSTNAME")
        .ok()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "arkiv".to_string());
    format!("{hostname}-{}", std::process::id())
}

pub fn worker_config(cfg: &WorkflowConfig) -> WorkerConfig {
    WorkerConfig {
        stream: cfg.queue_stream.clone(),
        group: cfg.queue_group.clone(),
        consumer: consumer_name(cfg),
        dlq_stream: cfg.queue_dlq_stream.clone(),
        read_count: cfg.queue_read_count.max(1),
        read_block_ms: cfg.queue_read_block_ms.max(1),
        retry_max_attempts: cfg.queue_retry_max_attempts,
        retry_backoff: std::time::Duration::from_secs_f64(
            cfg.queue_retry_backoff_seconds.max(0.0),
        ),
        claim_idle_ms: CLAIM_IDLE_MS,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub execution_backend: String,
    pub queue_enabled: bool,
    pub stream: String,
    pub group: String,
    pub consumer: String,
    pub queue_depth: u64,
    pub pending: u64,
    pub dlq_stream: String,
    pub dlq_depth: u64,
    pub retry_max_attempts: u32,
    pub history_stream: String,
    pub history_retention_maxlen: u64,
}

pub async fn queue_stats(
    backend: &dyn StreamBackend,
    cfg: &WorkflowConfig,
) -> Result<QueueStats> {
    backend.group_create(&cfg.queue_stream, &cfg.queue_group).await?;
    let queue_depth = backend.xlen(&cfg.queue_stream).await?;
    let dlq_depth = backend.xlen(&cfg.queue_dlq_stream).await?;
    let pending = backend
        .pending_count(&cfg.queue_stream, &cfg.queue_group)
        .await?;

    Ok(QueueStats {
        execution_backend: "redis_queue".to_string(),
        queue_enabled: true,
        stream: cfg.queue_stream.clone(),
        group: cfg.queue_group.clone(),
        consumer: consumer_name(cfg),
        queue_depth,
        pending,
        dlq_stream: cfg.queue_dlq_stream.clone(),
        dlq_depth,
        retry_max_attempts: cfg.queue_retry_max_attempts,
        history_stream: cfg.history_stream.clone(),
        history_retention_maxlen: cfg.history_retention_maxlen,
    })
}

/// Delete up to `min(limit, 1000)` DLQ entries, oldest first.
pub async fn drain_dlq(
    backend: &dyn StreamBackend,
    dlq_stream: &str,
    limit: usize,
) -> Result<usize> {
    if limit == 0 {
        return Ok(0);
    }
    let bounded = limit.min(1000);
    let entries = backend.range_head(dlq_stream, bounded).await?;
    if entries.is_empty() {
        return Ok(0);
    }
    let ids: Vec<String> = entries.into_iter().map(|entry| entry.id).collect();
    let deleted = backend.delete(dlq_stream, &ids).await?;
    Ok(deleted as usize)
}
