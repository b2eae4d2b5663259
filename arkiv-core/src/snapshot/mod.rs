//! Snapshot builder: pull ticket, tags, and articles from the upstream and
//! normalize them into an immutable tree, optionally enriched with
//! attachment binaries under byte caps.

mod html;
mod models;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::debug;

pub use html::{escape_html, has_html_hint, sanitize_html_fragment, strip_html_to_text};
pub use models::{AttachmentMeta, PartyRef, Snapshot, SnapshotArticle, TicketMeta};

use crate::zammad::{Article, CustomerRef, TicketingClient, Ticket, UpstreamResult, UserRef};

/// Concurrent attachment downloads per run.
const ATTACHMENT_FETCH_CONCURRENCY: usize = 5;

fn party_from_user(user: &UserRef) -> PartyRef {
    PartyRef {
        id: None,
        login: user.login.clone(),
        email: None,
        name: None,
    }
}

fn party_from_customer(customer: &CustomerRef) -> PartyRef {
    PartyRef {
        id: customer.id,
        login: customer.login.clone(),
        email: customer.email.clone(),
        name: None,
    }
}

fn article_to_snapshot(article: &Article) -> SnapshotArticle {
    let body_raw = article.body.as_deref().unwrap_or_default();
    let mut body_html = String::new();
    let mut body_text = String::new();

    if !body_raw.is_empty() {
        if has_html_hint(article.content_type.as_deref(), body_raw) {
            body_html = sanitize_html_fragment(body_raw);
            if body_html.is_empty() {
                // Never fall back to raw HTML; strip it to text instead.
                body_text = strip_html_to_text(body_raw);
            } else {
                body_text = strip_html_to_text(&body_html);
            }
        } else {
            body_text = body_raw.to_string();
        }
    }

    if body_text.is_empty() && !body_raw.is_empty() {
        body_text = body_raw.to_string();
    }

    let attachments = article
        .attachments
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(|att| AttachmentMeta {
            article_id: article.id,
            attachment_id: att.id,
            filename: att.filename.clone(),
            size: att.size,
            content_type: att.content_type.clone(),
            content: None,
        })
        .collect();

    SnapshotArticle {
        id: article.id,
        created_at: article.created_at,
        internal: article.internal.unwrap_or(false),
        sender: article.from.clone().or_else(|| article.to.clone()),
        subject: article.subject.clone(),
        body_html,
        body_text,
        attachments,
    }
}

fn sort_key(article: &SnapshotArticle) -> (bool, DateTime<Utc>, u64) {
    (
        article.created_at.is_none(),
        article.created_at.unwrap_or(DateTime::<Utc>::MAX_UTC),
        article.id,
    )
}

/// Build the snapshot. `ticket`/`tags` can be passed in when the pipeline
/// already fetched them.
pub async fn build_snapshot(
    client: &dyn TicketingClient,
    ticket_id: u64,
    ticket: Option<Ticket>,
    tags: Option<Vec<String>>,
) -> UpstreamResult<Snapshot> {
    let ticket = match ticket {
        Some(ticket) => ticket,
        None => client.get_ticket(ticket_id).await?,
    };
    let tags = match tags {
        Some(tags) => tags,
        None => client.list_tags(ticket_id).await?,
    };

    let articles = client.list_articles(ticket_id).await?;
    let mut snapshot_articles: Vec<SnapshotArticle> =
        articles.iter().map(article_to_snapshot).collect();
    snapshot_articles.sort_by_key(sort_key);

    Ok(Snapshot {
        ticket: TicketMeta {
            id: ticket.id,
            number: ticket.number.clone(),
            title: ticket.title.clone(),
            created_at: ticket.created_at,
            updated_at: ticket.updated_at,
            customer: ticket.customer.as_ref().map(party_from_customer),
            owner: ticket.owner.as_ref().map(party_from_user),
            tags,
            custom_fields: ticket.custom_fields(),
        },
        articles: snapshot_articles,
    })
}

/// Download attachment binaries concurrently under a bounded semaphore.
/// Individual failures and over-cap files are skipped; the total cap stops
/// further inclusion. An attachment problem never fails the run.
pub async fn enrich_attachment_content(
    snapshot: Snapshot,
    client: &dyn TicketingClient,
    include_attachment_binary: bool,
    max_attachment_bytes_per_file: u64,
    max_total_attachment_bytes: u64,
) -> Snapshot {
    if !include_attachment_binary || max_total_attachment_bytes == 0 {
        return snapshot;
    }

    let ticket_id = snapshot.ticket.id;
    let semaphore = Arc::new(Semaphore::new(ATTACHMENT_FETCH_CONCURRENCY));

    let mut fetches = Vec::new();
    for article in &snapshot.articles {
        for att in &article.attachments {
            let Some(attachment_id) = att.attachment_id else {
                continue;
            };
            // Pre-check declared size to avoid useless downloads.
            if att.size.is_some_and(|size| size > max_attachment_bytes_per_file) {
                continue;
            }
            let semaphore = semaphore.clone();
            let article_id = article.id;
            fetches.push(async move {
                let _permit = semaphore.acquire().await.expect("semaphore never closed");
                match client
                    .get_attachment_content(ticket_id, article_id, attachment_id)
                    .await
                {
                    Ok(raw) if raw.len() as u64 <= max_attachment_bytes_per_file => {
                        Some(((article_id, attachment_id), raw))
                    }
                    Ok(_) => None,
                    Err(err) => {
                        debug!(ticket_id, article_id, attachment_id, error = %err,
                               "attachment download failed, skipping");
                        None
                    }
                }
            });
        }
    }

    if fetches.is_empty() {
        return snapshot;
    }

    let content_map: HashMap<(u64, u64), Vec<u8>> =
        join_all(fetches).await.into_iter().flatten().collect();

    let mut total: u64 = 0;
    let mut articles = snapshot.articles;
    for article in &mut articles {
        for att in &mut article.attachments {
            let Some(attachment_id) = att.attachment_id else {
                continue;
            };
            let Some(content) = content_map.get(&(article.id, attachment_id)) else {
                continue;
            };
            if total + content.len() as u64 > max_total_attachment_bytes {
                continue;
            }
            total += content.len() as u64;
            att.content = Some(content.clone());
        }
    }

    Snapshot {
        ticket: snapshot.ticket,
        articles,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zammad::{ArticleAttachment, MockTicketingClient};

    fn ticket() -> Ticket {
        serde_json::from_value(serde_json::json!({
            "id": 123,
            "number": "20240123",
            "title": "Help",
            "owner": {"login": "agent"},
        }))
        .unwrap()
    }

    fn article(id: u64, created_at: Option<&str>, body: &str, content_type: &str) -> Article {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "created_at": created_at,
            "body": body,
            "content_type": content_type,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn articles_are_sorted_missing_created_at_last() {
        let mut client = MockTicketingClient::new();
        client
            .expect_list_articles()
            .returning(|_| {
                Ok(vec![
                    article(3, None, "c", "text/plain"),
                    article(2, Some("2024-01-02T00:00:00Z"), "b", "text/plain"),
                    article(1, Some("2024-01-01T00:00:00Z"), "a", "text/plain"),
                ])
            });

        let snapshot = build_snapshot(&client, 123, Some(ticket()), Some(vec![]))
            .await
            .unwrap();
        let ids: Vec<u64> = snapshot.articles.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn html_bodies_are_sanitized_and_texted() {
        let mut client = MockTicketingClient::new();
        client.expect_list_articles().returning(|_| {
            Ok(vec![article(
                1,
                None,
                "<p>hi</p><script>x()</script>",
                "text/html",
            )])
        });

        let snapshot = build_snapshot(&client, 123, Some(ticket()), Some(vec![]))
            .await
            .unwrap();
        let a = &snapshot.articles[0];
        assert_eq!(a.body_html, "<p>hi</p>");
        assert_eq!(a.body_text, "hi");
    }

    #[tokio::test]
    async fn plain_text_is_kept_verbatim() {
        let mut client = MockTicketingClient::new();
        client
            .expect_list_articles()
            .returning(|_| Ok(vec![article(1, None, "a < b", "text/plain")]));

        let snapshot = build_snapshot(&client, 123, Some(ticket()), Some(vec![]))
            .await
            .unwrap();
        assert!(snapshot.articles[0].body_html.is_empty());
        assert_eq!(snapshot.articles[0].body_text, "a < b");
    }

    fn article_with_attachment(id: u64, att_id: u64, size: u64) -> Article {
        let mut article = article(id, None, "x", "text/plain");
        article.attachments = Some(vec![ArticleAttachment {
            id: Some(att_id),
            filename: Some(format!("file{att_id}.bin")),
            size: Some(size),
            preferences: None,
            content_type: Some("application/octet-stream".into()),
        }]);
        article
    }

    #[tokio::test]
    async fn attachment_enrichment_respects_caps() {
        let mut client = MockTicketingClient::new();
        client.expect_list_articles().returning(|_| {
            Ok(vec![
                article_with_attachment(1, 10, 4),
                article_with_attachment(2, 20, 4),
                article_with_attachment(3, 30, 1000),
            ])
        });
        client
            .expect_get_attachment_content()
            .returning(|_, _, att_id| Ok(vec![att_id as u8; 4]));

        let snapshot = build_snapshot(&client, 123, Some(ticket()), Some(vec![]))
            .await
            .unwrap();
        // Per-file cap 100 excludes attachment 30 by declared size; total
        // cap 6 admits only the first download.
        let enriched = enrich_attachment_content(snapshot, &client, true, 100, 6).await;

        let contents: Vec<bool> = enriched
            .articles
            .iter()
            .map(|a| a.attachments[0].content.is_some())
            .collect();
        assert_eq!(contents, vec![true, false, false]);
    }

    #[tokio::test]
    async fn attachment_errors_never_fail_the_run() {
        let mut client = MockTicketingClient::new();
        client
            .expect_list_articles()
            .returning(|_| Ok(vec![article_with_attachment(1, 10, 4)]));
        client
            .expect_get_attachment_content()
            .returning(|_, _, _| {
                Err(crate::zammad::UpstreamError::Server {
                    status: Some(500),
                    message: "boom".into(),
                })
            });

        let snapshot = build_snapshot(&client, 123, Some(ticket()), Some(vec![]))
            .await
            .unwrap();
        let enriched = enrich_attachment_content(snapshot, &client, true, 100, 100).await;
        assert!(enriched.articles[0].attachments[0].content.is_none());
    }

    #[tokio::test]
    async fn enrichment_disabled_is_a_no_op() {
        let mut client = MockTicketingClient::new();
        client
            .expect_list_articles()
            .returning(|_| Ok(vec![article_with_attachment(1, 10, 4)]));

        let snapshot = build_snapshot(&client, 123, Some(ticket()), Some(vec![]))
            .await
            .unwrap();
        let enriched = enrich_attachment_content(snapshot, &client, false, 100, 100).await;
        assert!(enriched.articles[0].attachments[0].content.is_none());
    }
}
