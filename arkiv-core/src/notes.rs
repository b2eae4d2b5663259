//! Success and error notes posted to the ticket as internal articles.
//! Every interpolated value is HTML-escaped; messages arrive pre-scrubbed
//! and bounded from the classifier.

use crate::audit::SERVICE_VERSION;
use crate::snapshot::escape_html;

#[derive(Debug, Clone)]
pub struct SuccessNote<'a> {
    pub storage_dir: &'a str,
    pub filename: &'a str,
    pub sidecar_path: &'a str,
    pub size_bytes: u64,
    pub sha256_hex: &'a str,
    pub request_id: Option<&'a str>,
    pub delivery_id: Option<&'a str>,
    pub timestamp_utc: &'a str,
}

pub fn success_note_subject() -> String {
    format!("PDF archived ({SERVICE_VERSION})")
}

pub fn success_note_html(note: &SuccessNote<'_>) -> String {
    let items = [
        ("path", note.storage_dir.to_string()),
        ("filename", note.filename.to_string()),
        ("audit_sidecar", note.sidecar_path.to_string()),
        ("size_bytes", note.size_bytes.to_string()),
        ("sha256", note.sha256_hex.to_string()),
        ("request_id", note.request_id.unwrap_or("unknown").to_string()),
        ("delivery_id", note.delivery_id.unwrap_or("none").to_string()),
        ("time_utc", note.timestamp_utc.to_string()),
    ];

    let mut out = format!("<p><strong>PDF archived ({SERVICE_VERSION})</strong></p><ul>");
    for (key, value) in items {
        out.push_str(&format!("<li>{key}: <code>{}</code></li>", escape_html(&value)));
    }
    out.push_str("</ul>");
    out
}

#[derive(Debug, Clone)]
pub struct ErrorNote<'a> {
    pub classification: &'a str,
    pub message: &'a str,
    pub action: &'a str,
    pub code: Option<&'a str>,
    pub hint: Option<&'a str>,
    pub request_id: Option<&'a str>,
    pub delivery_id: Option<&'a str>,
    pub timestamp_utc: &'a str,
}

pub fn error_note_subject() -> String {
    format!("PDF archiver error ({SERVICE_VERSION})")
}

pub fn error_note_html(note: &ErrorNote<'_>) -> String {
    let mut items = vec![
        ("classification", note.classification.to_string()),
        ("error", note.message.to_string()),
        ("action", note.action.to_string()),
    ];
    if let Some(code) = note.code.filter(|code| !code.is_empty()) {
        items.push(("code", code.to_string()));
    }
    if let Some(hint) = note.hint.filter(|hint| !hint.is_empty()) {
        items.push(("hint", hint.to_string()));
    }
    items.push(("request_id", note.request_id.unwrap_or("unknown").to_string()));
    items.push(("delivery_id", note.delivery_id.unwrap_or("none").to_string()));
    items.push(("time_utc", note.timestamp_utc.to_string()));

    let mut out = format!("<p><strong>PDF archiver error ({SERVICE_VERSION})</strong></p><ul>");
    for (key, value) in items {
        out.push_str(&format!("<li>{key}: <code>{}</code></li>", escape_html(&value)));
    }
    out.push_str("</ul>");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_note_escapes_values() {
        let html = success_note_html(&SuccessNote {
            storage_dir: "/srv/archive/<agent>",
            filename: "Ticket-1.pdf",
            sidecar_path: "/srv/archive/<agent>/Ticket-1.pdf.json",
            size_bytes: 1234,
            sha256_hex: "abc",
            request_id: None,
            delivery_id: Some("d-1"),
            timestamp_utc: "2024-01-23T10:00:00Z",
        });
        assert!(html.contains("&lt;agent&gt;"));
        assert!(!html.contains("<agent>"));
        assert!(html.contains("<li>request_id: <code>unknown</code></li>"));
        assert!(html.contains("<li>delivery_id: <code>d-1</code></li>"));
        assert!(html.contains("size_bytes: <code>1234</code>"));
    }

    #[test]
    fn error_note_includes_code_and_hint_only_when_set() {
        let base = ErrorNote {
            classification: "Permanent",
            message: "dot segments are not allowed",
            action: "Fix ticket fields",
            code: Some("path_validation"),
            hint: Some("Check archive_path segments"),
            request_id: Some("req-1"),
            delivery_id: None,
            timestamp_utc: "2024-01-23T10:00:00Z",
        };
        let html = error_note_html(&base);
        assert!(html.contains("<li>code: <code>path_validation</code></li>"));
        assert!(html.contains("<li>hint: <code>Check archive_path segments</code></li>"));

        let without = ErrorNote {
            code: None,
            hint: None,
            ..base
        };
        let html = error_note_html(&without);
        assert!(!html.contains("<li>code:"));
        assert!(!html.contains("<li>hint:"));
    }
}
