//! Durable queue worker: a Redis Streams consumer-group loop with
//! claim-stale recovery, in-band delayed redelivery, bounded retries, and
//! a dead-letter stream.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Map;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::backend::{SharedStreamBackend, StreamEntry};
use super::envelope::{Envelope, decode_entry, encode_fields};
use crate::clock::SharedClock;
use crate::error::Result;
use crate::metrics::Metrics;
use crate::pipeline::{JobProcessor, Outcome};
use crate::queue::{HistoryLog, HistoryStatus};

/// Pending entries owned by a dead peer are claimable after this idle time.
pub const CLAIM_IDLE_MS: u64 = 30_000;

pub const DLQ_REASON_RETRY_EXHAUSTED: &str = "retry_exhausted";
pub const DLQ_REASON_PERMANENT: &str = "permanent_error";
pub const DLQ_REASON_INVALID: &str = "invalid_message";

const MAX_DLQ_ERROR_LEN: usize = 500;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub stream: String,
    pub group: String,
    pub consumer: String,
    pub dlq_stream: String,
    pub read_count: usize,
    pub read_block_ms: u64,
    pub retry_max_attempts: u32,
    pub retry_backoff: Duration,
    pub claim_idle_ms: u64,
}

/// Append a new job envelope to the work stream.
pub async fn enqueue_job(
    backend: &dyn super::backend::StreamBackend,
    stream: &str,
    metrics: &Metrics,
    clock: &dyn crate::clock::Clock,
    payload: &Map<String, serde_json::Value>,
    delivery_id: Option<&str>,
    attempt: u32,
    not_before_ts: f64,
    last_error: Option<&str>,
) -> Result<String> {
    let fields = encode_fields(
        payload,
        delivery_id,
        attempt,
        not_before_ts,
        clock.unix_seconds(),
        last_error,
    );
    let id = backend.xadd(stream, &fields).await?;
    metrics.queue_enqueued_total.inc();
    Ok(id)
}

pub struct QueueWorker {
    backend: SharedStreamBackend,
    processor: Arc<dyn JobProcessor>,
    history: HistoryLog,
    metrics: Metrics,
    clock: SharedClock,
    cfg: WorkerConfig,
    cancel: CancellationToken,
}

impl std::fmt::Debug for QueueWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueWorker")
            .field("stream", &self.cfg.stream)
            .field("consumer", &self.cfg.consumer)
            .finish()
    }
}

impl QueueWorker {
    pub fn new(
        backend: SharedStreamBackend,
        processor: Arc<dyn JobProcessor>,
        history: HistoryLog,
        metrics: Metrics,
        clock: SharedClock,
        cfg: WorkerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            backend,
            processor,
            history,
            metrics,
            clock,
            cfg,
            cancel,
        }
    }

    /// Run until cancelled. Every iteration returns control so shutdown is
    /// observed promptly.
    pub async fn run(self) {
        if let Err(err) = self
            .backend
            .group_create(&self.cfg.stream, &self.cfg.group)
            .await
        {
            error!(error = %err, stream = %self.cfg.stream, "failed to create consumer group");
        }
        info!(
            stream = %self.cfg.stream,
            group = %self.cfg.group,
            consumer = %self.cfg.consumer,
            "queue worker started"
        );

        while !self.cancel.is_cancelled() {
            match self.run_once().await {
                Ok(Some(delay)) if delay > Duration::ZERO => {
                    // Delayed envelope: stay responsive to shutdown while
                    // waiting, capped at one second per loop.
                    let sleep = delay.min(Duration::from_secs(1));
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(sleep) => {}
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    error!(error = %err, "queue worker iteration failed");
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_millis(300)) => {}
                    }
                }
            }
        }
        info!(consumer = %self.cfg.consumer, "queue worker stopped");
    }

    /// One loop iteration: claim stale peers' pending, replay own pending,
    /// then read new messages. Returns the smallest suggested delay of any
    /// not-yet-due envelope.
    pub async fn run_once(&self) -> Result<Option<Duration>> {
        let mut min_delay: Option<Duration> = None;

        let claimed = self.claim_stale_pending().await?;
        let had_backlog = !claimed.is_empty();
        merge_min(&mut min_delay, self.process_entries(claimed).await);

        let pending = self
            .backend
            .read_own_pending(
                &self.cfg.stream,
                &self.cfg.group,
                &self.cfg.consumer,
                self.cfg.read_count,
            )
            .await?;
        let had_backlog = had_backlog || !pending.is_empty();
        merge_min(&mut min_delay, self.process_entries(pending).await);

        let block_ms = if had_backlog { 1 } else { self.cfg.read_block_ms };
        let fresh = self
            .backend
            .read_new(
                &self.cfg.stream,
                &self.cfg.group,
                &self.cfg.consumer,
                self.cfg.read_count,
                block_ms,
            )
            .await?;
        merge_min(&mut min_delay, self.process_entries(fresh).await);

        Ok(min_delay)
    }

    async fn claim_stale_pending(&self) -> Result<Vec<StreamEntry>> {
        let pending = match self
            .backend
            .pending_range(&self.cfg.stream, &self.cfg.group, self.cfg.read_count)
            .await
        {
            Ok(pending) => pending,
            Err(err) => {
                warn!(error = %err, "pending scan failed, skipping claim pass");
                return Ok(Vec::new());
            }
        };

        let ids: Vec<String> = pending
            .into_iter()
            .filter(|entry| {
                entry.consumer != self.cfg.consumer && entry.idle_ms >= self.cfg.claim_idle_ms
            })
            .map(|entry| entry.id)
            .collect();

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let claimed = self
            .backend
            .claim(
                &self.cfg.stream,
                &self.cfg.group,
                &self.cfg.consumer,
                self.cfg.claim_idle_ms,
                &ids,
            )
            .await?;
        if !claimed.is_empty() {
            info!(count = claimed.len(), "claimed stale pending entries from peers");
        }
        Ok(claimed)
    }

    async fn process_entries(&self, entries: Vec<StreamEntry>) -> Option<Duration> {
        let mut min_delay: Option<Duration> = None;
        for entry in entries {
            if self.cancel.is_cancelled() {
                break;
            }
            match self.handle_entry(entry).await {
                Ok(delay) => merge_min(&mut min_delay, delay),
                Err(err) => {
                    self.metrics.queue_failed_total.inc();
                    error!(error = %err, "failed to handle queue entry");
                }
            }
        }
        min_delay
    }

    async fn handle_entry(&self, entry: StreamEntry) -> Result<Option<Duration>> {
        let envelope = match decode_entry(&entry) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.metrics.queue_failed_total.inc();
                warn!(id = %entry.id, error = %err, "undecodable envelope, dead-lettering");
                let synthetic = Envelope {
                    message_id: entry.id.clone(),
                    payload: Map::new(),
                    delivery_id: None,
                    attempt: 0,
                    not_before_ts: 0.0,
                    last_error: Some(err.to_string()),
                };
                self.push_dlq(&synthetic, DLQ_REASON_INVALID, Some(&err.to_string()))
                    .await?;
                self.history
                    .record(
                        HistoryStatus::FailedPermanent,
                        None,
                        Some("Permanent"),
                        &format!("invalid_message: {err}"),
                        None,
                        None,
                    )
                    .await;
                self.ack(&entry.id).await?;
                return Ok(None);
            }
        };

        let now = self.clock.unix_seconds();
        if envelope.not_before_ts > now {
            // Not due yet: leave it pending so the next iteration revisits
            // it without stream churn.
            return Ok(Some(Duration::from_secs_f64(envelope.not_before_ts - now)));
        }

        let outcome = self
            .processor
            .process(envelope.delivery_id.as_deref(), &envelope.payload)
            .await;

        match outcome {
            Outcome::FailedTransient {
                message,
                retry_after,
            } => {
                if envelope.attempt < self.cfg.retry_max_attempts {
                    let delay = retry_after.unwrap_or_else(|| self.retry_delay(envelope.attempt));
                    enqueue_job(
                        self.backend.as_ref(),
                        &self.cfg.stream,
                        &self.metrics,
                        self.clock.as_ref(),
                        &envelope.payload,
                        envelope.delivery_id.as_deref(),
                        envelope.attempt + 1,
                        self.clock.unix_seconds() + delay.as_secs_f64(),
                        Some(&message).filter(|m| !m.is_empty()).map(String::as_str),
                    )
                    .await?;
                    self.metrics.queue_retried_total.inc();
                } else {
                    self.push_dlq(
                        &envelope,
                        DLQ_REASON_RETRY_EXHAUSTED,
                        Some(&message).filter(|m| !m.is_empty()).map(String::as_str),
                    )
                    .await?;
                }
                self.ack(&envelope.message_id).await?;
            }
            Outcome::FailedPermanent { message } => {
                self.push_dlq(
                    &envelope,
                    DLQ_REASON_PERMANENT,
                    Some(&message).filter(|m| !m.is_empty()).map(String::as_str),
                )
                .await?;
                self.ack(&envelope.message_id).await?;
            }
            Outcome::Cancelled => {
                // Keep the entry pending; it is redelivered after restart.
            }
            _ => {
                self.metrics.queue_processed_total.inc();
                self.ack(&envelope.message_id).await?;
            }
        }
        Ok(None)
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let base = self.cfg.retry_backoff.as_secs_f64();
        Duration::from_secs_f64(base * 2f64.powi(attempt as i32))
    }

    async fn ack(&self, id: &str) -> Result<()> {
        self.backend
            .ack_and_delete(&self.cfg.stream, &self.cfg.group, id)
            .await
    }

    async fn push_dlq(
        &self,
        envelope: &Envelope,
        reason: &str,
        error_message: Option<&str>,
    ) -> Result<()> {
        let mut fields = vec![
            (
                "payload_json".to_string(),
                super::envelope::canonical_payload_json(&envelope.payload),
            ),
            (
                "delivery_id".to_string(),
                envelope.delivery_id.clone().unwrap_or_default(),
            ),
            ("attempt".to_string(), envelope.attempt.to_string()),
            ("reason".to_string(), reason.to_string()),
            (
                "failed_at".to_string(),
                format!("{}", self.clock.unix_seconds()),
            ),
        ];
        let error_message = error_message.or(envelope.last_error.as_deref());
        if let Some(error_message) = error_message.filter(|msg| !msg.is_empty()) {
            let mut end = error_message.len().min(MAX_DLQ_ERROR_LEN);
            while !error_message.is_char_boundary(end) {
                end -= 1;
            }
            fields.push(("error".to_string(), error_message[..end].to_string()));
        }
        self.backend.xadd(&self.cfg.dlq_stream, &fields).await?;
        self.metrics.queue_dlq_total.inc();
        Ok(())
    }
}

fn merge_min(current: &mut Option<Duration>, candidate: Option<Duration>) {
    if let Some(candidate) = candidate.filter(|d| *d > Duration::ZERO)
        && current.map(|current| candidate < current).unwrap_or(true)
    {
        *current = Some(candidate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use crate::clock::{Clock, SystemClock};
    use crate::queue::backend::StreamBackend;
    use crate::queue::InMemoryStreams;

    struct ScriptedProcessor {
        outcomes: Mutex<Vec<Outcome>>,
        calls: Mutex<Vec<(Option<String>, u64)>>,
    }

    impl ScriptedProcessor {
        fn new(outcomes: Vec<Outcome>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl JobProcessor for ScriptedProcessor {
        async fn process(
            &self,
            delivery_id: Option<&str>,
            payload: &Map<String, serde_json::Value>,
        ) -> Outcome {
            let ticket = crate::payload::extract_ticket_id(payload).unwrap_or(0);
            self.calls
                .lock()
                .unwrap()
                .push((delivery_id.map(str::to_string), ticket));
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.is_empty() {
                Outcome::Processed
            } else {
                outcomes.remove(0)
            }
        }
    }

    fn worker_config() -> WorkerConfig {
        WorkerConfig {
            stream: "jobs".into(),
            group: "g".into(),
            consumer: "c1".into(),
            dlq_stream: "jobs:dlq".into(),
            read_count: 16,
            read_block_ms: 1,
            retry_max_attempts: 2,
            retry_backoff: Duration::from_secs(30),
            claim_idle_ms: CLAIM_IDLE_MS,
        }
    }

    struct Harness {
        backend: Arc<InMemoryStreams>,
        worker: QueueWorker,
        metrics: Metrics,
        processor: Arc<ScriptedProcessor>,
    }

    fn harness(outcomes: Vec<Outcome>) -> Harness {
        let backend = Arc::new(InMemoryStreams::new());
        let metrics = Metrics::new();
        let clock: SharedClock = Arc::new(SystemClock);
        let processor = Arc::new(ScriptedProcessor::new(outcomes));
        let worker = QueueWorker::new(
            backend.clone(),
            processor.clone(),
            HistoryLog::new(Some(backend.clone()), "hist", 1000, clock.clone()),
            metrics.clone(),
            clock,
            worker_config(),
            CancellationToken::new(),
        );
        Harness {
            backend,
            worker,
            metrics,
            processor,
        }
    }

    async fn enqueue(
        harness: &Harness,
        ticket_id: u64,
        delivery_id: Option<&str>,
        attempt: u32,
        not_before: f64,
    ) -> String {
        enqueue_job(
            harness.backend.as_ref(),
            "jobs",
            &harness.metrics,
            &SystemClock,
            json!({"ticket_id": ticket_id}).as_object().unwrap(),
            delivery_id,
            attempt,
            not_before,
            None,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn processed_envelope_is_acked_and_deleted() {
        let h = harness(vec![Outcome::Processed]);
        h.backend.group_create("jobs", "g").await.unwrap();
        enqueue(&h, 123, Some("d-1"), 0, 0.0).await;

        h.worker.run_once().await.unwrap();

        assert_eq!(h.backend.xlen("jobs").await.unwrap(), 0);
        assert_eq!(h.metrics.queue_processed_total.get(), 1);
        let calls = h.processor.calls.lock().unwrap();
        assert_eq!(calls.as_slice(), &[(Some("d-1".to_string()), 123)]);
    }

    #[tokio::test]
    async fn transient_failure_reenqueues_with_backoff() {
        let h = harness(vec![Outcome::FailedTransient {
            message: "HTTP 503".into(),
            retry_after: None,
        }]);
        h.backend.group_create("jobs", "g").await.unwrap();
        enqueue(&h, 123, Some("d-1"), 0, 0.0).await;

        h.worker.run_once().await.unwrap();

        assert_eq!(h.metrics.queue_retried_total.get(), 1);
        // Old entry acked+deleted, a new one with attempt=1 in its place.
        let entries = h.backend.range_head("jobs", 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        let envelope = decode_entry(&entries[0]).unwrap();
        assert_eq!(envelope.attempt, 1);
        assert_eq!(envelope.delivery_id.as_deref(), Some("d-1"));
        assert!(envelope.not_before_ts > SystemClock.unix_seconds() + 25.0);
        assert_eq!(envelope.last_error.as_deref(), Some("HTTP 503"));
    }

    #[tokio::test]
    async fn retry_exhaustion_goes_to_dlq() {
        let h = harness(vec![Outcome::FailedTransient {
            message: "still broken".into(),
            retry_after: None,
        }]);
        h.backend.group_create("jobs", "g").await.unwrap();
        enqueue(&h, 123, None, 2, 0.0).await;

        h.worker.run_once().await.unwrap();

        assert_eq!(h.metrics.queue_dlq_total.get(), 1);
        assert_eq!(h.backend.xlen("jobs").await.unwrap(), 0);
        let dlq = h.backend.range_head("jobs:dlq", 10).await.unwrap();
        assert_eq!(dlq.len(), 1);
        assert_eq!(dlq[0].field("reason"), Some(DLQ_REASON_RETRY_EXHAUSTED));
        assert_eq!(dlq[0].field("attempt"), Some("2"));
        assert_eq!(dlq[0].field("payload_json"), Some(r#"{"ticket_id":123}"#));
        assert_eq!(dlq[0].field("error"), Some("still broken"));
    }

    #[tokio::test]
    async fn permanent_failure_goes_straight_to_dlq() {
        let h = harness(vec![Outcome::FailedPermanent {
            message: "dot segments are not allowed".into(),
        }]);
        h.backend.group_create("jobs", "g").await.unwrap();
        enqueue(&h, 123, None, 0, 0.0).await;

        h.worker.run_once().await.unwrap();

        let dlq = h.backend.range_head("jobs:dlq", 10).await.unwrap();
        assert_eq!(dlq[0].field("reason"), Some(DLQ_REASON_PERMANENT));
        assert_eq!(h.metrics.queue_dlq_total.get(), 1);
    }

    #[tokio::test]
    async fn not_due_envelope_stays_pending_with_suggested_delay() {
        let h = harness(vec![]);
        h.backend.group_create("jobs", "g").await.unwrap();
        let future = SystemClock.unix_seconds() + 120.0;
        enqueue(&h, 123, None, 1, future).await;

        let delay = h.worker.run_once().await.unwrap();
        assert!(delay.is_some_and(|d| d > Duration::from_secs(100)));

        // Not processed, not acked, no new envelope.
        assert!(h.processor.calls.lock().unwrap().is_empty());
        assert_eq!(h.backend.xlen("jobs").await.unwrap(), 1);
        assert_eq!(h.backend.pending_count("jobs", "g").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn invalid_envelope_is_dead_lettered() {
        let h = harness(vec![]);
        h.backend.group_create("jobs", "g").await.unwrap();
        h.backend
            .xadd(
                "jobs",
                &[("payload_json".to_string(), "{broken".to_string())],
            )
            .await
            .unwrap();

        h.worker.run_once().await.unwrap();

        let dlq = h.backend.range_head("jobs:dlq", 10).await.unwrap();
        assert_eq!(dlq.len(), 1);
        assert_eq!(dlq[0].field("reason"), Some(DLQ_REASON_INVALID));
        assert_eq!(h.backend.xlen("jobs").await.unwrap(), 0);

        // Permanent history event with the decode failure.
        let hist = h.backend.revrange_head("hist", 10).await.unwrap();
        assert_eq!(hist.len(), 1);
        assert_eq!(hist[0].field("status"), Some("failed_permanent"));
    }

    #[tokio::test]
    async fn stale_peer_entries_are_claimed_and_processed() {
        let h = harness(vec![Outcome::Processed]);
        h.backend.group_create("jobs", "g").await.unwrap();
        let id = enqueue(&h, 123, None, 0, 0.0).await;

        // A dead peer read the entry and never acked.
        h.backend.read_new("jobs", "g", "dead", 10, 1).await.unwrap();
        h.backend
            .age_pending("jobs", "g", &id, Duration::from_secs(60));

        h.worker.run_once().await.unwrap();

        assert_eq!(h.metrics.queue_processed_total.get(), 1);
        assert_eq!(h.backend.xlen("jobs").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn retry_after_hint_overrides_backoff() {
        let h = harness(vec![Outcome::FailedTransient {
            message: "429".into(),
            retry_after: Some(Duration::from_secs(7)),
        }]);
        h.backend.group_create("jobs", "g").await.unwrap();
        enqueue(&h, 123, None, 0, 0.0).await;

        h.worker.run_once().await.unwrap();

        let entries = h.backend.range_head("jobs", 10).await.unwrap();
        let envelope = decode_entry(&entries[0]).unwrap();
        let delta = envelope.not_before_ts - SystemClock.unix_seconds();
        assert!(delta > 5.0 && delta < 9.0, "delta={delta}");
    }

    #[tokio::test]
    async fn cancelled_outcome_leaves_entry_pending() {
        let h = harness(vec![Outcome::Cancelled]);
        h.backend.group_create("jobs", "g").await.unwrap();
        enqueue(&h, 123, None, 0, 0.0).await;

        h.worker.run_once().await.unwrap();

        assert_eq!(h.backend.xlen("jobs").await.unwrap(), 1);
        assert_eq!(h.backend.pending_count("jobs", "g").await.unwrap(), 1);
    }
}
