use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HardeningConfig {
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub body_size_limit: BodySizeLimitConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub transport: TransportConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_rps")]
    pub rps: f64,
    #[serde(default = "default_burst")]
    pub burst: u32,
    /// Also rate-limit `GET /metrics`.
    #[serde(default)]
    pub include_metrics: bool,
    /// When set (e.g. "X-Forwarded-For"), the rate-limit key is the first
    /// value of this header instead of the peer address. Trust the proxy.
    #[serde(default)]
    pub client_key_header: Option<String>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rps: default_rps(),
            burst: default_burst(),
            include_metrics: false,
            client_key_header: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_rps() -> f64 {
    5.0
}

fn default_burst() -> u32 {
    10
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BodySizeLimitConfig {
    /// 0 disables the limit.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
}

impl Default for BodySizeLimitConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_max_bytes(),
        }
    }
}

fn default_max_bytes() -> u64 {
    1024 * 1024
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WebhookConfig {
    /// If false, `/ingest` is rejected unless a webhook HMAC secret is set.
    #[serde(default)]
    pub allow_unsigned: bool,
    /// Second opt-in required to run without any webhook secret at all.
    #[serde(default)]
    pub allow_unsigned_when_no_secret: bool,
    /// Require the `X-Zammad-Delivery` header on `/ingest`.
    #[serde(default)]
    pub require_delivery_id: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TransportConfig {
    /// Allow the HTTP client to honor proxy-related environment variables.
    #[serde(default)]
    pub trust_env: bool,
    /// Allow plaintext HTTP upstream URLs. Strongly discouraged.
    #[serde(default)]
    pub allow_insecure_http: bool,
    /// Allow disabling TLS verification upstream. Strongly discouraged.
    #[serde(default)]
    pub allow_insecure_tls: bool,
}
