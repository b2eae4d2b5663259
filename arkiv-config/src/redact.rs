//! Secret redaction.
//!
//! One scrubber serves every outbound text path: history messages, error
//! note bodies, log output derived from errors, and config dumps. Detection
//! is two-layered: key-name heuristics for structured data and value-level
//! patterns for free-form text.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

pub use crate::secret::REDACTED_VALUE;

const SENSITIVE_KEY_FRAGMENTS: &[&str] = &[
    "password",
    "passwd",
    "token",
    "secret",
    "authorization",
    "api_key",
    "apikey",
];

static AUTHZ_SCHEME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(authorization)\s*[:=]\s*(bearer|token|basic)\s+([^\s,;]+)")
        .expect("authz scheme pattern")
});

static TOKEN_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bToken\s+token=([^\s,;]+)").expect("token token pattern"));

static KV_SECRET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(token|api[_-]?token|access[_-]?token|refresh[_-]?token|webhook[_-]?hmac[_-]?secret|secret|password|passwd|tsa[_-]?pass|pfx[_-]?password|key[_-]?password)\s*[:=]\s*([^\s,;]+)",
    )
    .expect("kv secret pattern")
});

static QUERY_SECRET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)([?&](?:api[_-]?token|access[_-]?token|refresh[_-]?token|token|secret)=)([^&\s]+)")
        .expect("query secret pattern")
});

static URL_USERINFO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b([a-z][a-z0-9+.-]*://)([^/@\s:]+):([^/@\s]+)@").expect("userinfo pattern")
});

/// Best-effort redaction of secrets embedded in free-form text.
pub fn scrub_secrets_in_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let out = AUTHZ_SCHEME_RE.replace_all(text, |caps: &regex::Captures<'_>| {
        format!("{}: {} {REDACTED_VALUE}", &caps[1], &caps[2])
    });
    let out = TOKEN_TOKEN_RE.replace_all(&out, format!("Token token={REDACTED_VALUE}").as_str());
    let out = KV_SECRET_RE.replace_all(&out, |caps: &regex::Captures<'_>| {
        format!("{}={REDACTED_VALUE}", &caps[1])
    });
    let out = QUERY_SECRET_RE.replace_all(&out, |caps: &regex::Captures<'_>| {
        format!("{}{REDACTED_VALUE}", &caps[1])
    });
    let out = URL_USERINFO_RE.replace_all(&out, |caps: &regex::Captures<'_>| {
        format!("{}{}:{REDACTED_VALUE}@", &caps[1], &caps[2])
    });
    out.into_owned()
}

fn is_sensitive_key(key: &str) -> bool {
    let normalized = key.trim().to_ascii_lowercase();
    if normalized.ends_with("_pass") {
        return true;
    }
    SENSITIVE_KEY_FRAGMENTS
        .iter()
        .any(|fragment| normalized.contains(fragment))
}

/// Deep-redact a JSON value: sensitive keys are replaced wholesale, string
/// values are text-scrubbed.
pub fn redact_json(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, val)| {
                    if is_sensitive_key(&key) {
                        (key, Value::String(REDACTED_VALUE.to_string()))
                    } else {
                        (key, redact_json(val))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(redact_json).collect()),
        Value::String(text) => Value::String(scrub_secrets_in_text(&text)),
        other => other,
    }
}
