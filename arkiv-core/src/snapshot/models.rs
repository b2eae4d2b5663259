//! Immutable snapshot tree rendered into the PDF and audit record.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PartyRef {
    pub id: Option<u64>,
    pub login: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TicketMeta {
    pub id: u64,
    pub number: String,
    pub title: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub customer: Option<PartyRef>,
    pub owner: Option<PartyRef>,
    pub tags: Vec<String>,
    pub custom_fields: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttachmentMeta {
    pub article_id: u64,
    pub attachment_id: Option<u64>,
    pub filename: Option<String>,
    pub size: Option<u64>,
    pub content_type: Option<String>,
    /// Set only when attachment binary inclusion is enabled and within caps.
    #[serde(skip)]
    pub content: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotArticle {
    pub id: u64,
    pub created_at: Option<DateTime<Utc>>,
    pub internal: bool,
    pub sender: Option<String>,
    pub subject: Option<String>,
    /// Sanitized HTML, or empty when the source was plain text or
    /// sanitization yielded nothing.
    pub body_html: String,
    /// Plain text; never derived from unsanitized HTML.
    pub body_text: String,
    pub attachments: Vec<AttachmentMeta>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub ticket: TicketMeta,
    pub articles: Vec<SnapshotArticle>,
}

impl Snapshot {
    pub fn truncated(&self, max_articles: usize) -> Self {
        Self {
            ticket: self.ticket.clone(),
            articles: self.articles.iter().take(max_articles).cloned().collect(),
        }
    }
}
