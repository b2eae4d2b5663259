//! Configuration model tree.
//!
//! The tree mirrors the service's concerns: `server`, `zammad`, `workflow`,
//! `fields`, `storage`, `pdf`, `signing`, `observability`, `hardening`, and
//! `admin`. Every section deserializes with defaults so a YAML file only has
//! to name what it changes; `zammad.base_url`, `zammad.api_token`, and
//! `storage.root` are the only required leaves.

mod hardening;
mod signing;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

pub use hardening::{
    BodySizeLimitConfig, HardeningConfig, RateLimitConfig, TransportConfig, WebhookConfig,
};
pub use signing::{PadesConfig, Rfc3161Config, SigningConfig, TimestampConfig};

use crate::secret::SecretString;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub zammad: ZammadConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub fields: FieldsConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub pdf: PdfConfig,
    #[serde(default)]
    pub signing: SigningConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub hardening: HardeningConfig,
    #[serde(default)]
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Legacy shared secret; still accepted for webhook HMAC verification
    /// when `zammad.webhook_hmac_secret` is unset.
    #[serde(default)]
    pub webhook_shared_secret: Option<SecretString>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            webhook_shared_secret: None,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ZammadConfig {
    pub base_url: Url,
    pub api_token: SecretString,
    #[serde(default)]
    pub webhook_hmac_secret: Option<SecretString>,
    #[serde(default = "default_upstream_timeout")]
    pub timeout_seconds: f64,
    #[serde(default = "default_true")]
    pub verify_tls: bool,
}

fn default_upstream_timeout() -> f64 {
    10.0
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionBackend {
    /// Dispatch webhook jobs as tracked in-process tasks.
    Inprocess,
    /// Enqueue webhook jobs onto the durable Redis stream.
    RedisQueue,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowConfig {
    #[serde(default = "default_trigger_tag")]
    pub trigger_tag: String,
    #[serde(default = "default_true")]
    pub require_tag: bool,
    #[serde(default = "default_true")]
    pub acknowledge_on_success: bool,
    /// TTL for webhook delivery-id replay suppression; 0 disables it.
    #[serde(default = "default_delivery_ttl")]
    pub delivery_id_ttl_seconds: u64,
    #[serde(default = "default_idempotency_backend")]
    pub idempotency_backend: IdempotencyBackend,
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default = "default_execution_backend")]
    pub execution_backend: ExecutionBackend,
    #[serde(default = "default_queue_stream")]
    pub queue_stream: String,
    #[serde(default = "default_queue_group")]
    pub queue_group: String,
    /// Consumer name override; defaults to `<hostname>-<pid>` at runtime.
    #[serde(default)]
    pub queue_consumer: Option<String>,
    #[serde(default = "default_dlq_stream")]
    pub queue_dlq_stream: String,
    #[serde(default = "default_retry_max_attempts")]
    pub queue_retry_max_attempts: u32,
    #[serde(default = "default_retry_backoff_seconds")]
    pub queue_retry_backoff_seconds: f64,
    #[serde(default = "default_queue_read_count")]
    pub queue_read_count: usize,
    #[serde(default = "default_queue_read_block_ms")]
    pub queue_read_block_ms: u64,
    #[serde(default = "default_history_stream")]
    pub history_stream: String,
    /// Approximate maxlen for the history stream; 0 disables history.
    #[serde(default = "default_history_maxlen")]
    pub history_retention_maxlen: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            trigger_tag: default_trigger_tag(),
            require_tag: true,
            acknowledge_on_success: true,
            delivery_id_ttl_seconds: default_delivery_ttl(),
            idempotency_backend: default_idempotency_backend(),
            redis_url: None,
            execution_backend: default_execution_backend(),
            queue_stream: default_queue_stream(),
            queue_group: default_queue_group(),
            queue_consumer: None,
            queue_dlq_stream: default_dlq_stream(),
            queue_retry_max_attempts: default_retry_max_attempts(),
            queue_retry_backoff_seconds: default_retry_backoff_seconds(),
            queue_read_count: default_queue_read_count(),
            queue_read_block_ms: default_queue_read_block_ms(),
            history_stream: default_history_stream(),
            history_retention_maxlen: default_history_maxlen(),
        }
    }
}

fn default_trigger_tag() -> String {
    "pdf:sign".to_string()
}

fn default_delivery_ttl() -> u64 {
    3600
}

fn default_idempotency_backend() -> IdempotencyBackend {
    IdempotencyBackend::Memory
}

fn default_execution_backend() -> ExecutionBackend {
    ExecutionBackend::Inprocess
}

fn default_queue_stream() -> String {
    "arkiv:jobs".to_string()
}

fn default_queue_group() -> String {
    "arkiv-workers".to_string()
}

fn default_dlq_stream() -> String {
    "arkiv:jobs:dlq".to_string()
}

fn default_retry_max_attempts() -> u32 {
    5
}

fn default_retry_backoff_seconds() -> f64 {
    30.0
}

fn default_queue_read_count() -> usize {
    16
}

fn default_queue_read_block_ms() -> u64 {
    1000
}

fn default_history_stream() -> String {
    "arkiv:history".to_string()
}

fn default_history_maxlen() -> u64 {
    10_000
}

/// Names of the ticket custom fields the archiver reads.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FieldsConfig {
    #[serde(default = "default_archive_path_field")]
    pub archive_path: String,
    #[serde(default = "default_archive_user_mode_field")]
    pub archive_user_mode: String,
    #[serde(default = "default_archive_user_field")]
    pub archive_user: String,
}

impl Default for FieldsConfig {
    fn default() -> Self {
        Self {
            archive_path: default_archive_path_field(),
            archive_user_mode: default_archive_user_mode_field(),
            archive_user: default_archive_user_field(),
        }
    }
}

fn default_archive_path_field() -> String {
    "archive_path".to_string()
}

fn default_archive_user_mode_field() -> String {
    "archive_user_mode".to_string()
}

fn default_archive_user_field() -> String {
    "archive_user".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    pub root: PathBuf,
    #[serde(default = "default_true")]
    pub fsync: bool,
    #[serde(default)]
    pub path_policy: PathPolicyConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PathPolicyConfig {
    /// When non-empty, sanitized archive path segments must start with one
    /// of these `>`- or `/`-separated prefixes.
    #[serde(default)]
    pub allow_prefixes: Vec<String>,
    #[serde(default = "default_filename_pattern")]
    pub filename_pattern: String,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_max_segment_length")]
    pub max_segment_length: usize,
}

impl Default for PathPolicyConfig {
    fn default() -> Self {
        Self {
            allow_prefixes: Vec::new(),
            filename_pattern: default_filename_pattern(),
            max_depth: default_max_depth(),
            max_segment_length: default_max_segment_length(),
        }
    }
}

fn default_filename_pattern() -> String {
    "Ticket-{ticket_number}_{timestamp_utc}.pdf".to_string()
}

fn default_max_depth() -> usize {
    10
}

fn default_max_segment_length() -> usize {
    64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleLimitMode {
    /// Fail the run permanently when a ticket has more articles than the cap.
    Fail,
    /// Truncate to the cap, log, and continue.
    CapAndContinue,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PdfConfig {
    #[serde(default = "default_template_variant")]
    pub template_variant: String,
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// 0 disables the cap.
    #[serde(default = "default_max_articles")]
    pub max_articles: usize,
    #[serde(default = "default_article_limit_mode")]
    pub article_limit_mode: ArticleLimitMode,
    #[serde(default)]
    pub include_attachment_binary: bool,
    #[serde(default = "default_max_attachment_bytes_per_file")]
    pub max_attachment_bytes_per_file: u64,
    #[serde(default = "default_max_total_attachment_bytes")]
    pub max_total_attachment_bytes: u64,
}

impl Default for PdfConfig {
    fn default() -> Self {
        Self {
            template_variant: default_template_variant(),
            locale: default_locale(),
            timezone: default_timezone(),
            max_articles: default_max_articles(),
            article_limit_mode: default_article_limit_mode(),
            include_attachment_binary: false,
            max_attachment_bytes_per_file: default_max_attachment_bytes_per_file(),
            max_total_attachment_bytes: default_max_total_attachment_bytes(),
        }
    }
}

fn default_template_variant() -> String {
    "default".to_string()
}

fn default_locale() -> String {
    "de_DE".to_string()
}

fn default_timezone() -> String {
    "Europe/Berlin".to_string()
}

fn default_max_articles() -> usize {
    250
}

fn default_article_limit_mode() -> ArticleLimitMode {
    ArticleLimitMode::Fail
}

fn default_max_attachment_bytes_per_file() -> u64 {
    10 * 1024 * 1024
}

fn default_max_total_attachment_bytes() -> u64 {
    50 * 1024 * 1024
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub json_logs: bool,
    #[serde(default)]
    pub metrics_enabled: bool,
    /// When set, `GET /metrics` requires `Authorization: Bearer <token>`.
    #[serde(default)]
    pub metrics_bearer_token: Option<SecretString>,
    /// When true, `GET /healthz` omits service name and version.
    #[serde(default)]
    pub healthz_omit_version: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            metrics_enabled: false,
            metrics_bearer_token: None,
            healthz_omit_version: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AdminConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub bearer_token: Option<SecretString>,
}

impl Config {
    /// The secret used for webhook HMAC verification: the canonical
    /// `zammad.webhook_hmac_secret` wins; the legacy
    /// `server.webhook_shared_secret` is a fallback.
    pub fn webhook_secret(&self) -> Option<&SecretString> {
        if let Some(secret) = &self.zammad.webhook_hmac_secret
            && !secret.is_empty()
        {
            return Some(secret);
        }
        self.server
            .webhook_shared_secret
            .as_ref()
            .filter(|secret| !secret.is_empty())
    }
}
