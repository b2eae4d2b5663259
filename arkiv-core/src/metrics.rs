//! Prometheus metrics. The registry lives in the app context, not in
//! globals, so tests get isolated registries.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,

    pub processed_total: IntCounter,
    pub skipped_total: IntCounterVec,
    pub failed_total: IntCounter,

    pub render_seconds: Histogram,
    pub sign_seconds: Histogram,
    pub total_seconds: Histogram,

    pub queue_enqueued_total: IntCounter,
    pub queue_processed_total: IntCounter,
    pub queue_retried_total: IntCounter,
    pub queue_failed_total: IntCounter,
    pub queue_dlq_total: IntCounter,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let processed_total = IntCounter::with_opts(Opts::new(
            "processed_total",
            "Number of successfully processed tickets.",
        ))
        .expect("metric opts");
        let skipped_total = IntCounterVec::new(
            Opts::new("skipped_total", "Number of skipped ticket processing attempts."),
            &["reason"],
        )
        .expect("metric opts");
        let failed_total = IntCounter::with_opts(Opts::new(
            "failed_total",
            "Number of failed ticket processing attempts.",
        ))
        .expect("metric opts");

        let render_seconds = Histogram::with_opts(HistogramOpts::new(
            "render_seconds",
            "Seconds spent rendering the PDF.",
        ))
        .expect("metric opts");
        let sign_seconds = Histogram::with_opts(HistogramOpts::new(
            "sign_seconds",
            "Seconds spent signing the PDF.",
        ))
        .expect("metric opts");
        let total_seconds = Histogram::with_opts(HistogramOpts::new(
            "total_seconds",
            "Seconds spent processing a ticket end-to-end.",
        ))
        .expect("metric opts");

        let queue_enqueued_total = IntCounter::with_opts(Opts::new(
            "queue_enqueued_total",
            "Number of jobs enqueued to the durable queue.",
        ))
        .expect("metric opts");
        let queue_processed_total = IntCounter::with_opts(Opts::new(
            "queue_processed_total",
            "Number of queued jobs processed successfully.",
        ))
        .expect("metric opts");
        let queue_retried_total = IntCounter::with_opts(Opts::new(
            "queue_retried_total",
            "Number of queued jobs re-scheduled for retry.",
        ))
        .expect("metric opts");
        let queue_failed_total = IntCounter::with_opts(Opts::new(
            "queue_failed_total",
            "Number of queued jobs that failed to process in a worker.",
        ))
        .expect("metric opts");
        let queue_dlq_total = IntCounter::with_opts(Opts::new(
            "queue_dlq_total",
            "Number of queued jobs moved to the dead-letter queue.",
        ))
        .expect("metric opts");

        for collector in [
            Box::new(processed_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(skipped_total.clone()),
            Box::new(failed_total.clone()),
            Box::new(render_seconds.clone()),
            Box::new(sign_seconds.clone()),
            Box::new(total_seconds.clone()),
            Box::new(queue_enqueued_total.clone()),
            Box::new(queue_processed_total.clone()),
            Box::new(queue_retried_total.clone()),
            Box::new(queue_failed_total.clone()),
            Box::new(queue_dlq_total.clone()),
        ] {
            registry.register(collector).expect("unique metric names");
        }

        Self {
            registry,
            processed_total,
            skipped_total,
            failed_total,
            render_seconds,
            sign_seconds,
            total_seconds,
            queue_enqueued_total,
            queue_processed_total,
            queue_retried_total,
            queue_failed_total,
            queue_dlq_total,
        }
    }

    /// Prometheus text exposition of the current registry state.
    pub fn render_text(&self) -> (Vec<u8>, &'static str) {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .expect("text encoding never fails on a healthy registry");
        (buffer, "text/plain; version=0.0.4; charset=utf-8")
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_show_up_in_exposition() {
        let metrics = Metrics::new();
        metrics.processed_total.inc();
        metrics.skipped_total.with_label_values(&["in_flight"]).inc();
        metrics.render_seconds.observe(0.25);

        let (body, content_type) = metrics.render_text();
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("processed_total 1"));
        assert!(text.contains("skipped_total{reason=\"in_flight\"} 1"));
        assert!(text.contains("render_seconds_count 1"));
        assert!(content_type.starts_with("text/plain"));
    }

    #[test]
    fn registries_are_isolated() {
        let a = Metrics::new();
        let b = Metrics::new();
        a.processed_total.inc();
        let (body, _) = b.render_text();
        assert!(String::from_utf8(body).unwrap().contains("processed_total 0"));
    }
}
