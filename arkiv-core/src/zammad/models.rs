//! Wire models for the Zammad REST API. Unknown fields are ignored;
//! Zammad adds fields freely between versions.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserRef {
    pub login: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomerRef {
    pub id: Option<u64>,
    pub login: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TicketPreferences {
    pub custom_fields: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Ticket {
    pub id: u64,
    pub number: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub owner: Option<UserRef>,
    #[serde(default)]
    pub updated_by: Option<UserRef>,
    #[serde(default)]
    pub customer: Option<CustomerRef>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub preferences: Option<TicketPreferences>,
}

impl Ticket {
    /// Custom fields live under `preferences.custom_fields`; missing layers
    /// collapse to an empty map.
    pub fn custom_fields(&self) -> HashMap<String, serde_json::Value> {
        self.preferences
            .as_ref()
            .and_then(|prefs| prefs.custom_fields.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArticleAttachment {
    pub id: Option<u64>,
    pub filename: Option<String>,
    pub size: Option<u64>,
    #[serde(rename = "preferences", default)]
    pub preferences: Option<HashMap<String, serde_json::Value>>,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Article {
    pub id: u64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub internal: Option<bool>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(rename = "from", default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub attachments: Option<Vec<ArticleAttachment>>,
}

/// Zammad returns tags either as a raw array or wrapped in `{"tags": []}`
/// depending on version.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TagList {
    Wrapped { tags: Vec<String> },
    Plain(Vec<String>),
}

impl TagList {
    pub fn into_tags(self) -> Vec<String> {
        match self {
            Self::Wrapped { tags } => tags,
            Self::Plain(tags) => tags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_parses_with_custom_fields() {
        let json = serde_json::json!({
            "id": 123,
            "number": "20240123",
            "title": "Printer on fire",
            "owner": {"login": "agent"},
            "preferences": {"custom_fields": {"archive_path": "A > B", "archive_user_mode": "owner"}},
            "some_future_field": true,
        });
        let ticket: Ticket = serde_json::from_value(json).unwrap();
        assert_eq!(ticket.id, 123);
        assert_eq!(ticket.custom_fields()["archive_path"], "A > B");
        assert_eq!(ticket.owner.unwrap().login.as_deref(), Some("agent"));
    }

    #[test]
    fn tag_list_accepts_both_shapes() {
        let plain: TagList = serde_json::from_value(serde_json::json!(["a", "b"])).unwrap();
        assert_eq!(plain.into_tags(), vec!["a", "b"]);

        let wrapped: TagList =
            serde_json::from_value(serde_json::json!({"tags": ["x"]})).unwrap();
        assert_eq!(wrapped.into_tags(), vec!["x"]);
    }

    #[test]
    fn article_from_field_maps() {
        let json = serde_json::json!({
            "id": 1,
            "from": "customer@example.com",
            "body": "<p>hi</p>",
            "content_type": "text/html",
        });
        let article: Article = serde_json::from_value(json).unwrap();
        assert_eq!(article.from.as_deref(), Some("customer@example.com"));
    }
}
