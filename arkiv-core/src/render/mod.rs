//! PDF rendering capability.
//!
//! Rendering is a pure byte transform behind the [`Renderer`] trait so
//! deployments can plug in a full HTML/CSS engine. The built-in
//! [`MinimalPdfRenderer`] emits a deterministic, valid text-only PDF from
//! the snapshot, which keeps the service end-to-end runnable without an
//! external engine.

mod pdf;

use thiserror::Error;

pub use pdf::MinimalPdfRenderer;

use crate::snapshot::Snapshot;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("too many articles: {count} > max_articles={max}")]
    TooManyArticles { count: usize, max: usize },

    #[error("template error: {0}")]
    Template(String),

    #[error("render engine error: {0}")]
    Engine(String),
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub template_variant: String,
    pub locale: String,
    pub timezone: String,
    /// 0 disables the cap.
    pub max_articles: usize,
    /// Set when the article list was capped; the renderer surfaces a
    /// visible truncation notice (shown / total).
    pub truncated_from: Option<usize>,
}

pub trait Renderer: Send + Sync {
    fn render(&self, snapshot: &Snapshot, options: &RenderOptions) -> Result<Vec<u8>, RenderError>;
}

pub type SharedRenderer = std::sync::Arc<dyn Renderer>;
