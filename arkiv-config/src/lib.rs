//! Configuration for the arkiv ticket archiver.
//!
//! YAML file plus environment overlay (flat legacy names and canonical
//! `ARKIV__SECTION__KEY` names), cross-field validation, and a single
//! redaction toolkit shared by every outbound text path.

mod loader;
mod models;
mod redact;
mod secret;
mod validate;

pub use loader::{
    AliasUse, CONFIG_PATH_ENV, LoadError, deprecated_aliases_in_use, flat_env_table, load,
    redacted_dump,
};
pub use models::{
    AdminConfig, ArticleLimitMode, BodySizeLimitConfig, Config, ExecutionBackend, FieldsConfig,
    HardeningConfig, IdempotencyBackend, ObservabilityConfig, PadesConfig, PathPolicyConfig,
    PdfConfig, RateLimitConfig, Rfc3161Config, ServerConfig, SigningConfig, StorageConfig,
    TimestampConfig, TransportConfig, WebhookConfig, WorkflowConfig, ZammadConfig,
};
pub use redact::{REDACTED_VALUE, redact_json, scrub_secrets_in_text};
pub use secret::SecretString;
pub use validate::ValidationError;

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        r#"
zammad:
  base_url: "https://zammad.example"
  api_token: "tok-123"
storage:
  root: "/srv/archive"
"#
    }

    fn parse(yaml: &str) -> Result<Config, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()?
            .try_deserialize()
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = parse(minimal_yaml()).unwrap();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.workflow.trigger_tag, "pdf:sign");
        assert_eq!(cfg.workflow.delivery_id_ttl_seconds, 3600);
        assert_eq!(cfg.pdf.max_articles, 250);
        assert_eq!(cfg.hardening.body_size_limit.max_bytes, 1024 * 1024);
        assert!(cfg.hardening.rate_limit.enabled);
        assert!(!cfg.signing.enabled);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let yaml = format!("{}\nunknown_section:\n  x: 1\n", minimal_yaml());
        assert!(parse(&yaml).is_err());
    }

    #[test]
    fn webhook_secret_prefers_canonical() {
        let yaml = r#"
server:
  webhook_shared_secret: "legacy"
zammad:
  base_url: "https://zammad.example"
  api_token: "tok"
  webhook_hmac_secret: "canonical"
storage:
  root: "/srv/archive"
"#;
        let cfg = parse(yaml).unwrap();
        assert_eq!(cfg.webhook_secret().unwrap().expose(), "canonical");
    }

    #[test]
    fn webhook_secret_falls_back_to_legacy() {
        let yaml = r#"
server:
  webhook_shared_secret: "legacy"
zammad:
  base_url: "https://zammad.example"
  api_token: "tok"
storage:
  root: "/srv/archive"
"#;
        let cfg = parse(yaml).unwrap();
        assert_eq!(cfg.webhook_secret().unwrap().expose(), "legacy");
    }

    #[test]
    fn redis_backend_requires_url() {
        let yaml = r#"
zammad:
  base_url: "https://zammad.example"
  api_token: "tok"
storage:
  root: "/srv/archive"
workflow:
  idempotency_backend: redis
"#;
        let cfg = parse(yaml).unwrap();
        assert!(crate::validate::validate(&cfg).is_err());
    }

    #[test]
    fn plain_http_needs_explicit_opt_in() {
        let yaml = r#"
zammad:
  base_url: "http://zammad.internal"
  api_token: "tok"
storage:
  root: "/srv/archive"
"#;
        let cfg = parse(yaml).unwrap();
        assert!(crate::validate::validate(&cfg).is_err());

        let yaml = format!(
            "{yaml}hardening:\n  transport:\n    allow_insecure_http: true\n"
        );
        let cfg = parse(&yaml).unwrap();
        assert!(crate::validate::validate(&cfg).is_ok());
    }

    #[test]
    fn dump_is_redacted() {
        let cfg = parse(minimal_yaml()).unwrap();
        let dump = redacted_dump(&cfg);
        assert_eq!(dump["zammad"]["api_token"], REDACTED_VALUE);
        assert_eq!(dump["zammad"]["base_url"], "https://zammad.example/");
    }
}
