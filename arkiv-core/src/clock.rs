use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

/// Time source injected everywhere "now" matters (retry delays,
/// `not_before_ts`, sidecar timestamps) so tests control it.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;

    /// Seconds since the Unix epoch, as the queue encodes wall-clock fields.
    fn unix_seconds(&self) -> f64 {
        let now = self.now_utc();
        now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn unix_seconds(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

pub type SharedClock = Arc<dyn Clock>;

/// RFC3339 UTC with a trailing `Z` and second precision, the timestamp
/// format used in notes and the audit sidecar.
pub fn format_timestamp_utc(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
