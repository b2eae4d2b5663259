//! Append-only history of processing outcomes on a capped stream.

use serde::Serialize;

use arkiv_config::scrub_secrets_in_text;

use super::backend::SharedStreamBackend;
use crate::clock::SharedClock;
use crate::error::Result;
use tracing::warn;

const MAX_MESSAGE_LEN: usize = 500;
const READ_LIMIT_CEILING: usize = 5000;
const FILTER_OVERFETCH_FACTOR: usize = 8;
const FILTER_OVERFETCH_CEILING: usize = 10_000;

/// Statuses recorded per run. At most one outcome event per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryStatus {
    Processed,
    FailedTransient,
    FailedPermanent,
    SkippedNoTicketId,
    SkippedInFlight,
    SkippedIdempotency,
    SkippedNotTriggered,
}

impl HistoryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::FailedTransient => "failed_transient",
            Self::FailedPermanent => "failed_permanent",
            Self::SkippedNoTicketId => "skipped_no_ticket_id",
            Self::SkippedInFlight => "skipped_in_flight",
            Self::SkippedIdempotency => "skipped_idempotency",
            Self::SkippedNotTriggered => "skipped_not_triggered",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEvent {
    pub id: String,
    pub status: String,
    pub ticket_id: Option<u64>,
    pub classification: Option<String>,
    pub message: String,
    pub delivery_id: Option<String>,
    pub request_id: Option<String>,
    /// Seconds since the Unix epoch.
    pub created_at: f64,
}

#[derive(Clone)]
pub struct HistoryLog {
    backend: Option<SharedStreamBackend>,
    stream: String,
    maxlen: u64,
    clock: SharedClock,
}

impl std::fmt::Debug for HistoryLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryLog")
            .field("stream", &self.stream)
            .field("maxlen", &self.maxlen)
            .finish()
    }
}

fn bounded_message(message: &str) -> String {
    let cleaned = scrub_secrets_in_text(message.trim());
    if cleaned.len() > MAX_MESSAGE_LEN {
        let mut end = MAX_MESSAGE_LEN;
        while !cleaned.is_char_boundary(end) {
            end -= 1;
        }
        cleaned[..end].to_string()
    } else {
        cleaned
    }
}

impl HistoryLog {
    /// `maxlen == 0` or a missing backend disables history entirely.
    pub fn new(
        backend: Option<SharedStreamBackend>,
        stream: impl Into<String>,
        maxlen: u64,
        clock: SharedClock,
    ) -> Self {
        Self {
            backend: if maxlen > 0 { backend } else { None },
            stream: stream.into(),
            maxlen,
            clock,
        }
    }

    pub fn disabled(clock: SharedClock) -> Self {
        Self::new(None, "", 0, clock)
    }

    /// Append an event. History failures are logged and swallowed; they
    /// never affect the run outcome.
    pub async fn record(
        &self,
        status: HistoryStatus,
        ticket_id: Option<u64>,
        classification: Option<&str>,
        message: &str,
        delivery_id: Option<&str>,
        request_id: Option<&str>,
    ) {
        let Some(backend) = &self.backend else {
            return;
        };

        let fields = vec![
            ("status".to_string(), status.as_str().to_string()),
            (
                "ticket_id".to_string(),
                ticket_id.map(|id| id.to_string()).unwrap_or_default(),
            ),
            (
                "classification".to_string(),
                classification.unwrap_or_default().to_string(),
            ),
            ("message".to_string(), bounded_message(message)),
            (
                "delivery_id".to_string(),
                delivery_id.unwrap_or_default().to_string(),
            ),
            (
                "request_id".to_string(),
                request_id.unwrap_or_default().to_string(),
            ),
            ("created_at".to_string(), format!("{}", self.clock.unix_seconds())),
        ];

        if let Err(err) = backend.xadd_maxlen(&self.stream, self.maxlen, &fields).await {
            warn!(status = status.as_str(), ?ticket_id, error = %err, "failed to record history event");
        }
    }

    /// Read most-recent-first, optionally filtered by ticket id. Filtering
    /// over-fetches to avoid sparse pages on busy streams.
    pub async fn read(&self, limit: usize, ticket_id: Option<u64>) -> Result<Vec<HistoryEvent>> {
        let Some(backend) = &self.backend else {
            return Ok(Vec::new());
        };

        let bounded_limit = limit.clamp(1, READ_LIMIT_CEILING);
        let fetch_count = match ticket_id {
            None => bounded_limit,
            Some(_) => (bounded_limit * FILTER_OVERFETCH_FACTOR).min(FILTER_OVERFETCH_CEILING),
        };

        let entries = backend.revrange_head(&self.stream, fetch_count).await?;

        let mut out = Vec::new();
        for entry in entries {
            let event = HistoryEvent {
                id: entry.id.clone(),
                status: entry.field("status").unwrap_or_default().to_string(),
                ticket_id: entry
                    .field("ticket_id")
                    .and_then(|raw| raw.trim().parse::<u64>().ok()),
                classification: entry
                    .field("classification")
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(str::to_string),
                message: entry.field("message").unwrap_or_default().to_string(),
                delivery_id: entry
                    .field("delivery_id")
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                    .map(str::to_string),
                request_id: entry
                    .field("request_id")
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(str::to_string),
                created_at: entry
                    .field("created_at")
                    .and_then(|raw| raw.trim().parse::<f64>().ok())
                    .unwrap_or(0.0),
            };

            if ticket_id.is_some() && event.ticket_id != ticket_id {
                continue;
            }
            out.push(event);
            if out.len() >= bounded_limit {
                break;
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::clock::SystemClock;
    use crate::queue::backend::StreamBackend;
    use crate::queue::InMemoryStreams;

    fn log(backend: Arc<InMemoryStreams>, maxlen: u64) -> HistoryLog {
        HistoryLog::new(Some(backend), "hist", maxlen, Arc::new(SystemClock))
    }

    #[tokio::test]
    async fn records_and_reads_most_recent_first() {
        let backend = Arc::new(InMemoryStreams::new());
        let log = log(backend, 100);

        log.record(HistoryStatus::Processed, Some(1), None, "", None, Some("r1"))
            .await;
        log.record(
            HistoryStatus::FailedTransient,
            Some(2),
            Some("Transient"),
            "HTTP 503 from upstream",
            Some("d-2"),
            None,
        )
        .await;

        let events = log.read(10, None).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].status, "failed_transient");
        assert_eq!(events[0].ticket_id, Some(2));
        assert_eq!(events[0].classification.as_deref(), Some("Transient"));
        assert_eq!(events[1].status, "processed");
        assert_eq!(events[1].request_id.as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn filters_by_ticket_id() {
        let backend = Arc::new(InMemoryStreams::new());
        let log = log(backend, 100);
        for ticket in [1u64, 2, 1, 3, 1] {
            log.record(HistoryStatus::Processed, Some(ticket), None, "", None, None)
                .await;
        }
        let events = log.read(10, Some(1)).await.unwrap();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.ticket_id == Some(1)));
    }

    #[tokio::test]
    async fn messages_are_scrubbed_and_bounded() {
        let backend = Arc::new(InMemoryStreams::new());
        let log = log(backend, 100);
        let long = format!("password=hunter2 {}", "x".repeat(600));
        log.record(HistoryStatus::FailedPermanent, Some(1), Some("Permanent"), &long, None, None)
            .await;

        let events = log.read(1, None).await.unwrap();
        assert!(!events[0].message.contains("hunter2"));
        assert!(events[0].message.len() <= MAX_MESSAGE_LEN);
    }

    #[tokio::test]
    async fn stream_stays_bounded() {
        let backend = Arc::new(InMemoryStreams::new());
        let log = log(backend.clone(), 5);
        for i in 0..20u64 {
            log.record(HistoryStatus::Processed, Some(i), None, "", None, None)
                .await;
        }
        assert!(backend.xlen("hist").await.unwrap() <= 5);
    }

    #[tokio::test]
    async fn zero_maxlen_disables_history() {
        let backend = Arc::new(InMemoryStreams::new());
        let log = log(backend.clone(), 0);
        log.record(HistoryStatus::Processed, Some(1), None, "", None, None)
            .await;
        assert_eq!(backend.xlen("hist").await.unwrap(), 0);
        assert!(log.read(10, None).await.unwrap().is_empty());
    }
}
