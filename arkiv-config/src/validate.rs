//! Cross-field configuration validation, applied after deserialization.

use thiserror::Error;

use crate::models::{Config, ExecutionBackend, IdempotencyBackend};

#[derive(Debug, Error)]
#[error("invalid configuration: {0}")]
pub struct ValidationError(String);

impl ValidationError {
    fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

pub fn validate(cfg: &Config) -> Result<(), ValidationError> {
    if cfg.server.port == 0 {
        return Err(ValidationError::new("server.port must be non-zero"));
    }

    if cfg.zammad.timeout_seconds <= 0.0 {
        return Err(ValidationError::new("zammad.timeout_seconds must be > 0"));
    }

    if cfg.zammad.base_url.scheme() == "http" && !cfg.hardening.transport.allow_insecure_http {
        return Err(ValidationError::new(
            "zammad.base_url uses plaintext http; set hardening.transport.allow_insecure_http to permit it",
        ));
    }

    if !cfg.zammad.verify_tls && !cfg.hardening.transport.allow_insecure_tls {
        return Err(ValidationError::new(
            "zammad.verify_tls is disabled; set hardening.transport.allow_insecure_tls to permit it",
        ));
    }

    let redis_url_set = cfg
        .workflow
        .redis_url
        .as_deref()
        .is_some_and(|url| !url.trim().is_empty());

    if cfg.workflow.idempotency_backend == IdempotencyBackend::Redis && !redis_url_set {
        return Err(ValidationError::new(
            "workflow.idempotency_backend is 'redis' but workflow.redis_url is not set",
        ));
    }

    if cfg.workflow.execution_backend == ExecutionBackend::RedisQueue && !redis_url_set {
        return Err(ValidationError::new(
            "workflow.execution_backend is 'redis_queue' but workflow.redis_url is not set",
        ));
    }

    if cfg.hardening.webhook.require_delivery_id && cfg.workflow.delivery_id_ttl_seconds == 0 {
        return Err(ValidationError::new(
            "hardening.webhook.require_delivery_id needs workflow.delivery_id_ttl_seconds > 0",
        ));
    }

    if cfg.hardening.rate_limit.burst == 0 {
        return Err(ValidationError::new("hardening.rate_limit.burst must be >= 1"));
    }

    if cfg.signing.enabled && cfg.signing.pfx_path.is_none() && cfg.signing.command.is_none() {
        return Err(ValidationError::new(
            "signing.enabled requires signing.pfx_path or signing.command",
        ));
    }

    if cfg.signing.timestamp.enabled && cfg.signing.timestamp.rfc3161.tsa_url.is_none() {
        return Err(ValidationError::new(
            "signing.timestamp.enabled requires signing.timestamp.rfc3161.tsa_url",
        ));
    }

    if cfg.admin.enabled
        && cfg
            .admin
            .bearer_token
            .as_ref()
            .is_none_or(|token| token.is_empty())
    {
        return Err(ValidationError::new(
            "admin.enabled requires a non-empty admin.bearer_token",
        ));
    }

    Ok(())
}
