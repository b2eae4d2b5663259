//! Zammad upstream: capability trait, normalized error taxonomy, wire
//! models, and the reqwest-backed client.

mod client;
mod models;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use client::{RetryPolicy, ZammadClient};
pub use models::{Article, ArticleAttachment, CustomerRef, TagList, Ticket, UserRef};

/// Errors from the ticketing upstream, normalized so the classifier can
/// route them without knowing HTTP internals.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Zammad auth failed (status={status}) at {url}")]
    Auth { status: u16, url: String },

    #[error("Zammad resource not found (status=404) at {url}")]
    NotFound { url: String },

    #[error("Zammad rate limit (status=429)")]
    RateLimit { retry_after: Option<Duration> },

    #[error("{message}")]
    Server { status: Option<u16>, message: String },

    #[error("Zammad API timeout after {attempts} attempts")]
    Timeout { attempts: u32 },

    #[error("{message}")]
    Network { message: String },

    #[error("{message}")]
    Client { status: Option<u16>, message: String },
}

pub type UpstreamResult<T> = std::result::Result<T, UpstreamError>;

/// The capability set the pipeline consumes. One implementation talks to a
/// real Zammad; tests mock this trait.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TicketingClient: Send + Sync {
    async fn get_ticket(&self, ticket_id: u64) -> UpstreamResult<Ticket>;

    async fn list_tags(&self, ticket_id: u64) -> UpstreamResult<Vec<String>>;

    async fn list_articles(&self, ticket_id: u64) -> UpstreamResult<Vec<Article>>;

    async fn get_attachment_content(
        &self,
        ticket_id: u64,
        article_id: u64,
        attachment_id: u64,
    ) -> UpstreamResult<Vec<u8>>;

    async fn add_tag(&self, ticket_id: u64, tag: &str) -> UpstreamResult<()>;

    async fn remove_tag(&self, ticket_id: u64, tag: &str) -> UpstreamResult<()>;

    async fn create_internal_article(
        &self,
        ticket_id: u64,
        subject: &str,
        body_html: &str,
    ) -> UpstreamResult<()>;
}
