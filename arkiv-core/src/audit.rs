//! Audit sidecar: the deterministic JSON record written next to every
//! archived PDF, last in the commit order.

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::clock::format_timestamp_utc;

pub const SERVICE_NAME: &str = "arkiv";
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn compute_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Per-file entry for archived attachment binaries.
#[derive(Debug, Clone)]
pub struct AuditAttachment {
    pub storage_path: String,
    pub article_id: u64,
    pub attachment_id: Option<u64>,
    pub filename: Option<String>,
    pub sha256: String,
}

#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub ticket_id: u64,
    pub ticket_number: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub storage_path: String,
    pub sha256: String,
    pub signing_enabled: bool,
    pub tsa_used: bool,
    /// SHA-256 over the configured signing-material bytes; present only
    /// when signing is enabled and material is configured.
    pub cert_fingerprint: Option<String>,
    pub attachments: Vec<AuditAttachment>,
}

impl AuditRecord {
    fn to_value(&self) -> Value {
        let mut signing = json!({
            "enabled": self.signing_enabled,
            "tsa_used": self.tsa_used,
        });
        if let Some(fingerprint) = &self.cert_fingerprint {
            signing["cert_fingerprint"] = json!(fingerprint);
        }

        let mut out = json!({
            "ticket_id": self.ticket_id,
            "ticket_number": self.ticket_number,
            "title": self.title.trim(),
            "created_at": format_timestamp_utc(self.created_at),
            "storage_path": self.storage_path,
            "sha256": self.sha256,
            "signing": signing,
            "service": {
                "name": SERVICE_NAME,
                "version": SERVICE_VERSION,
            },
        });

        if !self.attachments.is_empty() {
            out["attachments"] = Value::Array(
                self.attachments
                    .iter()
                    .map(|att| {
                        json!({
                            "storage_path": att.storage_path,
                            "article_id": att.article_id,
                            "attachment_id": att.attachment_id,
                            "filename": att.filename,
                            "sha256": att.sha256,
                        })
                    })
                    .collect(),
            );
        }
        out
    }

    /// Canonical encoding: sorted keys, two-space indent, UTF-8, trailing
    /// newline.
    pub fn to_canonical_bytes(&self) -> Vec<u8> {
        let mut bytes = serde_json::to_vec_pretty(&self.to_value()).expect("audit serializes");
        bytes.push(b'\n');
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> AuditRecord {
        AuditRecord {
            ticket_id: 123,
            ticket_number: "20240123".into(),
            title: "  Printer on fire  ".into(),
            created_at: DateTime::parse_from_rfc3339("2024-01-23T10:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            storage_path: "/srv/archive/agent/A/Ticket-20240123_2024-01-23.pdf".into(),
            sha256: "ab".repeat(32),
            signing_enabled: false,
            tsa_used: false,
            cert_fingerprint: None,
            attachments: Vec::new(),
        }
    }

    #[test]
    fn canonical_bytes_have_sorted_keys_and_trailing_newline() {
        let bytes = record().to_canonical_bytes();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.ends_with('\n'));

        let keys: Vec<&str> = text
            .lines()
            .filter(|line| line.starts_with("  \""))
            .map(|line| line.trim_start_matches("  \"").split('"').next().unwrap())
            .collect();
        let mut sorted = keys.clone();
        sorted.sort_unstable();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn title_is_trimmed_and_timestamp_has_z() {
        let value: Value =
            serde_json::from_slice(&record().to_canonical_bytes()).unwrap();
        assert_eq!(value["title"], "Printer on fire");
        assert_eq!(value["created_at"], "2024-01-23T10:00:00Z");
        assert_eq!(value["service"]["name"], SERVICE_NAME);
    }

    #[test]
    fn fingerprint_appears_only_when_present() {
        let without: Value =
            serde_json::from_slice(&record().to_canonical_bytes()).unwrap();
        assert!(without["signing"].get("cert_fingerprint").is_none());

        let mut rec = record();
        rec.signing_enabled = true;
        rec.cert_fingerprint = Some("ff".repeat(32));
        let with: Value = serde_json::from_slice(&rec.to_canonical_bytes()).unwrap();
        assert_eq!(with["signing"]["cert_fingerprint"], "ff".repeat(32));
    }

    #[test]
    fn attachments_are_listed_when_present() {
        let mut rec = record();
        rec.attachments.push(AuditAttachment {
            storage_path: "/srv/archive/agent/A/attachments/1_2_scan.png".into(),
            article_id: 1,
            attachment_id: Some(2),
            filename: Some("scan.png".into()),
            sha256: compute_sha256(b"data"),
        });
        let value: Value = serde_json::from_slice(&rec.to_canonical_bytes()).unwrap();
        assert_eq!(value["attachments"][0]["article_id"], 1);
    }

    #[test]
    fn sha256_helper_matches_known_vector() {
        assert_eq!(
            compute_sha256(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
