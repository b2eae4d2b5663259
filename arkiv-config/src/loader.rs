//! Configuration loading.
//!
//! Precedence, lowest to highest: struct defaults, YAML file, flat legacy
//! environment variables, canonical `ARKIV__`-nested environment variables.
//! The file path comes from `ARKIV_CONFIG` (or an explicit override); a path
//! that is set but unreadable is its own error class so the CLI can exit
//! with a distinct code.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use config::{Environment, File, FileFormat};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::Config;
use crate::validate::{ValidationError, validate};

pub const CONFIG_PATH_ENV: &str = "ARKIV_CONFIG";

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),
    #[error("failed to load configuration: {0}")]
    Invalid(#[from] config::ConfigError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Flat environment variable -> dotted config path. These predate the
/// nested `ARKIV__SECTION__KEY` scheme and stay supported for existing
/// deployments.
const FLAT_ENV_VARS: &[(&str, &str)] = &[
    ("SERVER_HOST", "server.host"),
    ("SERVER_PORT", "server.port"),
    ("WEBHOOK_SHARED_SECRET", "server.webhook_shared_secret"),
    ("ZAMMAD_BASE_URL", "zammad.base_url"),
    ("ZAMMAD_API_TOKEN", "zammad.api_token"),
    ("WEBHOOK_HMAC_SECRET", "zammad.webhook_hmac_secret"),
    ("ZAMMAD_TIMEOUT_SECONDS", "zammad.timeout_seconds"),
    ("ZAMMAD_VERIFY_TLS", "zammad.verify_tls"),
    ("WORKFLOW_TRIGGER_TAG", "workflow.trigger_tag"),
    ("WORKFLOW_REQUIRE_TAG", "workflow.require_tag"),
    (
        "WORKFLOW_DELIVERY_ID_TTL_SECONDS",
        "workflow.delivery_id_ttl_seconds",
    ),
    ("IDEMPOTENCY_BACKEND", "workflow.idempotency_backend"),
    ("EXECUTION_BACKEND", "workflow.execution_backend"),
    ("REDIS_URL", "workflow.redis_url"),
    ("QUEUE_STREAM", "workflow.queue_stream"),
    ("QUEUE_GROUP", "workflow.queue_group"),
    ("QUEUE_CONSUMER", "workflow.queue_consumer"),
    ("QUEUE_DLQ_STREAM", "workflow.queue_dlq_stream"),
    ("QUEUE_RETRY_MAX_ATTEMPTS", "workflow.queue_retry_max_attempts"),
    (
        "QUEUE_RETRY_BACKOFF_SECONDS",
        "workflow.queue_retry_backoff_seconds",
    ),
    ("HISTORY_STREAM", "workflow.history_stream"),
    (
        "HISTORY_RETENTION_MAXLEN",
        "workflow.history_retention_maxlen",
    ),
    ("FIELDS_ARCHIVE_PATH", "fields.archive_path"),
    ("FIELDS_ARCHIVE_USER_MODE", "fields.archive_user_mode"),
    ("FIELDS_ARCHIVE_USER", "fields.archive_user"),
    ("STORAGE_ROOT", "storage.root"),
    ("STORAGE_FSYNC", "storage.fsync"),
    ("PDF_TEMPLATE_VARIANT", "pdf.template_variant"),
    ("PDF_LOCALE", "pdf.locale"),
    ("PDF_TIMEZONE", "pdf.timezone"),
    ("PDF_MAX_ARTICLES", "pdf.max_articles"),
    ("PDF_ARTICLE_LIMIT_MODE", "pdf.article_limit_mode"),
    (
        "PDF_INCLUDE_ATTACHMENT_BINARY",
        "pdf.include_attachment_binary",
    ),
    (
        "PDF_MAX_ATTACHMENT_BYTES_PER_FILE",
        "pdf.max_attachment_bytes_per_file",
    ),
    (
        "PDF_MAX_TOTAL_ATTACHMENT_BYTES",
        "pdf.max_total_attachment_bytes",
    ),
    ("SIGNING_ENABLED", "signing.enabled"),
    ("SIGNING_PFX_PATH", "signing.pfx_path"),
    ("SIGNING_PFX_PASSWORD", "signing.pfx_password"),
    ("SIGNING_COMMAND", "signing.command"),
    ("SIGNING_REASON", "signing.pades.reason"),
    ("SIGNING_LOCATION", "signing.pades.location"),
    ("TSA_ENABLED", "signing.timestamp.enabled"),
    ("TSA_URL", "signing.timestamp.rfc3161.tsa_url"),
    ("TSA_TIMEOUT_SECONDS", "signing.timestamp.rfc3161.timeout_seconds"),
    (
        "TSA_CA_BUNDLE_PATH",
        "signing.timestamp.rfc3161.ca_bundle_path",
    ),
    ("LOG_LEVEL", "observability.log_level"),
    ("LOG_JSON", "observability.json_logs"),
    ("METRICS_ENABLED", "observability.metrics_enabled"),
    ("METRICS_BEARER_TOKEN", "observability.metrics_bearer_token"),
    ("HEALTHZ_OMIT_VERSION", "observability.healthz_omit_version"),
    ("RATE_LIMIT_ENABLED", "hardening.rate_limit.enabled"),
    ("RATE_LIMIT_RPS", "hardening.rate_limit.rps"),
    ("RATE_LIMIT_BURST", "hardening.rate_limit.burst"),
    (
        "RATE_LIMIT_INCLUDE_METRICS",
        "hardening.rate_limit.include_metrics",
    ),
    (
        "RATE_LIMIT_CLIENT_KEY_HEADER",
        "hardening.rate_limit.client_key_header",
    ),
    ("MAX_BODY_BYTES", "hardening.body_size_limit.max_bytes"),
    (
        "HARDENING_WEBHOOK_ALLOW_UNSIGNED",
        "hardening.webhook.allow_unsigned",
    ),
    (
        "HARDENING_WEBHOOK_ALLOW_UNSIGNED_WHEN_NO_SECRET",
        "hardening.webhook.allow_unsigned_when_no_secret",
    ),
    (
        "HARDENING_WEBHOOK_REQUIRE_DELIVERY_ID",
        "hardening.webhook.require_delivery_id",
    ),
    ("HARDENING_TRANSPORT_TRUST_ENV", "hardening.transport.trust_env"),
    (
        "HARDENING_TRANSPORT_ALLOW_INSECURE_HTTP",
        "hardening.transport.allow_insecure_http",
    ),
    (
        "HARDENING_TRANSPORT_ALLOW_INSECURE_TLS",
        "hardening.transport.allow_insecure_tls",
    ),
    ("ADMIN_ENABLED", "admin.enabled"),
    ("ADMIN_BEARER_TOKEN", "admin.bearer_token"),
];

/// Deprecated aliases for flat variables; resolved before the flat table is
/// applied. Kept for deployments predating the rename.
const DEPRECATED_ALIASES: &[(&str, &str)] = &[
    ("ZAMMAD_URL", "ZAMMAD_BASE_URL"),
    ("TEMPLATE_VARIANT", "PDF_TEMPLATE_VARIANT"),
    ("RENDER_LOCALE", "PDF_LOCALE"),
    ("RENDER_TIMEZONE", "PDF_TIMEZONE"),
    ("OBSERVABILITY_METRICS_ENABLED", "METRICS_ENABLED"),
];

#[derive(Debug, Clone)]
pub struct AliasUse {
    pub deprecated: &'static str,
    pub canonical: &'static str,
    /// True when the canonical variable is also set and wins.
    pub overridden: bool,
}

/// Report deprecated environment variables currently in use.
pub fn deprecated_aliases_in_use() -> Vec<AliasUse> {
    DEPRECATED_ALIASES
        .iter()
        .filter(|(old, _)| std::env::var_os(old).is_some())
        .map(|&(old, new)| AliasUse {
            deprecated: old,
            canonical: new,
            overridden: std::env::var_os(new).is_some(),
        })
        .collect()
}

fn flat_env_value(name: &str) -> Option<String> {
    if let Ok(value) = std::env::var(name)
        && !value.is_empty()
    {
        return Some(value);
    }
    DEPRECATED_ALIASES
        .iter()
        .find(|(_, canonical)| *canonical == name)
        .and_then(|(old, _)| std::env::var(old).ok())
        .filter(|value| !value.is_empty())
}

/// Collect flat env overrides into a nested JSON tree so the `config`
/// builder can layer them between the file and the canonical env source.
fn flat_env_tree() -> Value {
    let mut root = Map::new();
    for (name, dotted) in FLAT_ENV_VARS {
        let Some(value) = flat_env_value(name) else {
            continue;
        };
        let mut node = &mut root;
        let mut parts = dotted.split('.').peekable();
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                node.insert(part.to_string(), Value::String(value.clone()));
            } else {
                node = node
                    .entry(part.to_string())
                    .or_insert_with(|| Value::Object(Map::new()))
                    .as_object_mut()
                    .expect("intermediate config nodes are objects");
            }
        }
    }
    Value::Object(root)
}

fn config_file_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from)
}

/// Load and validate the full configuration.
pub fn load(explicit_path: Option<&Path>) -> Result<Config, LoadError> {
    let mut builder = config::Config::builder();

    if let Some(path) = config_file_path(explicit_path) {
        if !path.is_file() {
            return Err(LoadError::FileNotFound(path));
        }
        builder = builder.add_source(File::from(path.as_path()).format(FileFormat::Yaml));
    }

    let flat = flat_env_tree();
    if flat.as_object().is_some_and(|map| !map.is_empty()) {
        builder = builder.add_source(File::from_str(
            &serde_json::to_string(&flat).expect("flat env tree serializes"),
            FileFormat::Json,
        ));
    }

    let loaded = builder
        .add_source(
            Environment::with_prefix("ARKIV")
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;

    let cfg: Config = loaded.try_deserialize()?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Deep-redacted JSON rendering of the configuration for `dump-config`.
pub fn redacted_dump(cfg: &Config) -> Value {
    // SecretString serializes as "[redacted]" already; the scrubber pass
    // additionally catches secrets embedded in plain string fields such as
    // redis URLs with userinfo.
    let value = serde_json::to_value(cfg).expect("config serializes");
    crate::redact::redact_json(value)
}

/// Ordered key/value listing of every supported flat legacy variable, for
/// documentation output.
pub fn flat_env_table() -> BTreeMap<&'static str, &'static str> {
    FLAT_ENV_VARS.iter().copied().collect()
}
