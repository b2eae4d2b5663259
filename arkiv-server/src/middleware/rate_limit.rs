//! Per-client token-bucket rate limiting on the intake path (and
//! optionally `/metrics`). The bucket map is size-capped with bounded
//! eviction per call so a key flood cannot grow it without limit.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use parking_lot::Mutex;

use crate::responses::api_error;
use crate::state::AppState;

const MAX_BUCKET_ENTRIES: usize = 10_000;
const MAX_EVICT_PER_CALL: usize = 2_000;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    updated_at: Instant,
}

#[derive(Debug)]
pub struct TokenBucketLimiter {
    rps: f64,
    burst: f64,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl TokenBucketLimiter {
    pub fn new(rps: f64, burst: u32) -> Self {
        Self {
            rps,
            burst: f64::from(burst.max(1)),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn allow(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();

        if buckets.len() > MAX_BUCKET_ENTRIES {
            let mut oldest: Vec<(String, Instant)> = buckets
                .iter()
                .map(|(key, bucket)| (key.clone(), bucket.updated_at))
                .collect();
            oldest.sort_by_key(|(_, updated_at)| *updated_at);
            let excess = buckets.len() - MAX_BUCKET_ENTRIES + 1;
            for (key, _) in oldest.into_iter().take(excess.min(MAX_EVICT_PER_CALL)) {
                buckets.remove(&key);
            }
        }

        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: self.burst,
            updated_at: now,
        });

        let elapsed = now.duration_since(bucket.updated_at).as_secs_f64();
        if self.rps > 0.0 {
            bucket.tokens = (bucket.tokens + elapsed * self.rps).min(self.burst);
        }
        bucket.updated_at = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

fn client_key(request: &Request, header: Option<&str>) -> String {
    if let Some(header) = header
        && let Some(value) = request
            .headers()
            .get(header)
            .and_then(|value| value.to_str().ok())
    {
        // First value of a comma-separated list (e.g. X-Forwarded-For).
        let first = value.split(',').next().unwrap_or("").trim();
        if !first.is_empty() {
            return first.to_string();
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let cfg = &state.ctx.cfg.hardening.rate_limit;
    if !cfg.enabled {
        return next.run(request).await;
    }

    let path = request.uri().path();
    let guarded = path == "/ingest" || (cfg.include_metrics && path == "/metrics");
    if !guarded {
        return next.run(request).await;
    }

    let key = client_key(&request, cfg.client_key_header.as_deref());
    if !state.limiter.allow(&key) {
        return api_error(
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limited",
            Some("rate_limited"),
        );
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_then_deny_at_zero_rps() {
        let limiter = TokenBucketLimiter::new(0.0, 2);
        assert!(limiter.allow("1.2.3.4"));
        assert!(limiter.allow("1.2.3.4"));
        assert!(!limiter.allow("1.2.3.4"));
        // A different client has its own bucket.
        assert!(limiter.allow("5.6.7.8"));
    }

    #[test]
    fn tokens_refill_over_time() {
        let limiter = TokenBucketLimiter::new(1000.0, 1);
        assert!(limiter.allow("k"));
        assert!(!limiter.allow("k"));
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(limiter.allow("k"));
    }
}
