use std::time::Duration;

use crate::error::Classification;

/// Result of one processing run, returned to the dispatcher so the queue
/// can route retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Processed,
    SkippedNoTicketId,
    SkippedInFlight,
    SkippedIdempotency,
    SkippedNotTriggered,
    FailedTransient {
        message: String,
        /// Upstream-provided delay hint (Retry-After).
        retry_after: Option<Duration>,
    },
    FailedPermanent {
        message: String,
    },
    /// Shutdown cancellation hit mid-run; the ticket was not mutated
    /// further and the queue must not ack the envelope.
    Cancelled,
}

impl Outcome {
    pub fn failed(classification: Classification, message: String, retry_after: Option<Duration>) -> Self {
        match classification {
            Classification::Transient => Self::FailedTransient {
                message,
                retry_after,
            },
            Classification::Permanent => Self::FailedPermanent { message },
        }
    }

    pub fn status_label(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::SkippedNoTicketId => "skipped_no_ticket_id",
            Self::SkippedInFlight => "skipped_in_flight",
            Self::SkippedIdempotency => "skipped_idempotency",
            Self::SkippedNotTriggered => "skipped_not_triggered",
            Self::FailedTransient { .. } => "failed_transient",
            Self::FailedPermanent { .. } => "failed_permanent",
            Self::Cancelled => "cancelled",
        }
    }
}
