//! Minimal deterministic PDF emitter.
//!
//! Produces a valid PDF 1.4 document: one Helvetica text column, paginated
//! at a fixed line count, no external resources. Layout fidelity is not a
//! goal; a parseable, archivable rendition of the snapshot is.

use chrono::SecondsFormat;

use super::{RenderError, RenderOptions, Renderer};
use crate::snapshot::{Snapshot, SnapshotArticle};

const PAGE_WIDTH: f32 = 595.0;
const PAGE_HEIGHT: f32 = 842.0;
const MARGIN: f32 = 56.0;
const FONT_SIZE: f32 = 10.0;
const LINE_HEIGHT: f32 = 14.0;
const MAX_LINE_CHARS: usize = 92;

#[derive(Debug, Default)]
pub struct MinimalPdfRenderer;

impl Renderer for MinimalPdfRenderer {
    fn render(&self, snapshot: &Snapshot, options: &RenderOptions) -> Result<Vec<u8>, RenderError> {
        if options.max_articles > 0 && snapshot.articles.len() > options.max_articles {
            return Err(RenderError::TooManyArticles {
                count: snapshot.articles.len(),
                max: options.max_articles,
            });
        }

        let lines = document_lines(snapshot, options);
        Ok(emit_pdf(&lines))
    }
}

fn document_lines(snapshot: &Snapshot, options: &RenderOptions) -> Vec<String> {
    let ticket = &snapshot.ticket;
    let mut lines = Vec::new();

    lines.push(format!(
        "Ticket #{} - {}",
        ticket.number,
        ticket.title.as_deref().unwrap_or("(untitled)")
    ));
    if let Some(created) = ticket.created_at {
        lines.push(format!(
            "Created: {}",
            created.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
    }
    if let Some(owner) = ticket.owner.as_ref().and_then(|o| o.login.as_deref()) {
        lines.push(format!("Owner: {owner}"));
    }
    if let Some(customer) = ticket
        .customer
        .as_ref()
        .and_then(|c| c.email.as_deref().or(c.login.as_deref()))
    {
        lines.push(format!("Customer: {customer}"));
    }
    if !ticket.tags.is_empty() {
        lines.push(format!("Tags: {}", ticket.tags.join(", ")));
    }

    if let Some(total) = options.truncated_from {
        lines.push(String::new());
        lines.push(format!(
            "Note: showing {} of {} articles (capped by configuration).",
            snapshot.articles.len(),
            total
        ));
    }

    for article in &snapshot.articles {
        lines.push(String::new());
        lines.push(article_heading(article));
        lines.push("-".repeat(MAX_LINE_CHARS.min(72)));
        for raw in article.body_text.lines() {
            for wrapped in wrap_line(raw) {
                lines.push(wrapped);
            }
        }
        if !article.attachments.is_empty() {
            lines.push(String::new());
            for att in &article.attachments {
                lines.push(format!(
                    "[attachment] {} ({} bytes)",
                    att.filename.as_deref().unwrap_or("unnamed"),
                    att.size.unwrap_or(0)
                ));
            }
        }
    }

    lines
}

fn article_heading(article: &SnapshotArticle) -> String {
    let when = article
        .created_at
        .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| "unknown time".to_string());
    let sender = article.sender.as_deref().unwrap_or("unknown sender");
    let marker = if article.internal { " (internal)" } else { "" };
    match article.subject.as_deref() {
        Some(subject) => format!("{when} | {sender}{marker}: {subject}"),
        None => format!("{when} | {sender}{marker}"),
    }
}

fn wrap_line(line: &str) -> Vec<String> {
    if line.chars().count() <= MAX_LINE_CHARS {
        return vec![line.to_string()];
    }
    let mut out = Vec::new();
    let mut current = String::new();
    for word in line.split_whitespace() {
        if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > MAX_LINE_CHARS
        {
            out.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        // Hard-break single words longer than a line.
        if word.chars().count() > MAX_LINE_CHARS {
            let mut chunk = String::new();
            for ch in word.chars() {
                chunk.push(ch);
                if chunk.chars().count() == MAX_LINE_CHARS {
                    out.push(std::mem::take(&mut chunk));
                }
            }
            current.push_str(&chunk);
        } else {
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    if out.is_empty() {
        out.push(String::new());
    }
    out
}

/// Escape a line for a PDF literal string, folding anything outside
/// Latin-1 to '?' (the built-in fonts have no wider coverage).
fn escape_pdf_text(line: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(line.len());
    for ch in line.chars() {
        match ch {
            '(' => out.extend_from_slice(b"\\("),
            ')' => out.extend_from_slice(b"\\)"),
            '\\' => out.extend_from_slice(b"\\\\"),
            ch if (ch as u32) < 256 => out.push(ch as u8),
            _ => out.push(b'?'),
        }
    }
    out
}

fn page_content(lines: &[String]) -> Vec<u8> {
    let mut content = Vec::new();
    content.extend_from_slice(b"BT\n/F1 ");
    content.extend_from_slice(format!("{FONT_SIZE}").as_bytes());
    content.extend_from_slice(b" Tf\n");
    content.extend_from_slice(
        format!("1 0 0 1 {MARGIN} {} Tm\n", PAGE_HEIGHT - MARGIN).as_bytes(),
    );
    content.extend_from_slice(format!("{LINE_HEIGHT} TL\n").as_bytes());
    for line in lines {
        content.extend_from_slice(b"(");
        content.extend_from_slice(&escape_pdf_text(line));
        content.extend_from_slice(b") Tj\nT*\n");
    }
    content.extend_from_slice(b"ET\n");
    content
}

fn emit_pdf(lines: &[String]) -> Vec<u8> {
    let lines_per_page = ((PAGE_HEIGHT - 2.0 * MARGIN) / LINE_HEIGHT) as usize;
    let pages: Vec<&[String]> = if lines.is_empty() {
        vec![&[]]
    } else {
        lines.chunks(lines_per_page).collect()
    };

    // Object numbering: 1 catalog, 2 pages, 3 font, then per page the page
    // object followed by its content stream.
    let page_count = pages.len();
    let first_page_obj = 4;

    let mut objects: Vec<Vec<u8>> = Vec::new();

    let kids: Vec<String> = (0..page_count)
        .map(|i| format!("{} 0 R", first_page_obj + i * 2))
        .collect();
    objects.push(b"<< /Type /Catalog /Pages 2 0 R >>".to_vec());
    objects.push(
        format!(
            "<< /Type /Pages /Kids [{}] /Count {page_count} >>",
            kids.join(" ")
        )
        .into_bytes(),
    );
    objects.push(b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_vec());

    for (index, page_lines) in pages.iter().enumerate() {
        let content = page_content(page_lines);
        let content_obj = first_page_obj + index * 2 + 1;
        objects.push(
            format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {PAGE_WIDTH} {PAGE_HEIGHT}] \
                 /Resources << /Font << /F1 3 0 R >> >> /Contents {content_obj} 0 R >>"
            )
            .into_bytes(),
        );
        let mut stream = format!("<< /Length {} >>\nstream\n", content.len()).into_bytes();
        stream.extend_from_slice(&content);
        stream.extend_from_slice(b"\nendstream");
        objects.push(stream);
    }

    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n%\xe2\xe3\xcf\xd3\n");

    let mut offsets = Vec::with_capacity(objects.len());
    for (index, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n", index + 1).as_bytes());
        out.extend_from_slice(body);
        out.extend_from_slice(b"\nendobj\n");
    }

    let xref_offset = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    out.extend_from_slice(b"0000000000 65535 f \n");
    for offset in &offsets {
        out.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_offset}\n%%EOF\n",
            objects.len() + 1
        )
        .as_bytes(),
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{TicketMeta, SnapshotArticle};

    fn snapshot(article_count: usize) -> Snapshot {
        Snapshot {
            ticket: TicketMeta {
                id: 123,
                number: "20240123".into(),
                title: Some("Printer on fire".into()),
                created_at: None,
                updated_at: None,
                customer: None,
                owner: None,
                tags: vec!["pdf:sign".into()],
                custom_fields: Default::default(),
            },
            articles: (0..article_count)
                .map(|i| SnapshotArticle {
                    id: i as u64 + 1,
                    created_at: None,
                    internal: false,
                    sender: Some("customer@example.com".into()),
                    subject: Some(format!("msg {i}")),
                    body_html: String::new(),
                    body_text: "hello (world) \\ with escapes".into(),
                    attachments: Vec::new(),
                })
                .collect(),
        }
    }

    fn options(max_articles: usize) -> RenderOptions {
        RenderOptions {
            template_variant: "default".into(),
            locale: "de_DE".into(),
            timezone: "Europe/Berlin".into(),
            max_articles,
            truncated_from: None,
        }
    }

    #[test]
    fn output_is_pdf_magic_and_well_terminated() {
        let pdf = MinimalPdfRenderer
            .render(&snapshot(2), &options(0))
            .unwrap();
        assert!(pdf.starts_with(b"%PDF"));
        assert!(pdf.ends_with(b"%%EOF\n"));
    }

    #[test]
    fn too_many_articles_fails() {
        let err = MinimalPdfRenderer
            .render(&snapshot(2), &options(1))
            .unwrap_err();
        assert!(matches!(err, RenderError::TooManyArticles { count: 2, max: 1 }));
        assert!(err.to_string().contains("too many articles"));
    }

    #[test]
    fn truncation_notice_is_rendered() {
        let mut opts = options(0);
        opts.truncated_from = Some(10);
        let pdf = MinimalPdfRenderer.render(&snapshot(1), &opts).unwrap();
        let text = String::from_utf8_lossy(&pdf);
        assert!(text.contains("showing 1 of 10 articles"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let a = MinimalPdfRenderer.render(&snapshot(3), &options(0)).unwrap();
        let b = MinimalPdfRenderer.render(&snapshot(3), &options(0)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn long_documents_paginate() {
        let mut snap = snapshot(1);
        snap.articles[0].body_text = (0..200)
            .map(|i| format!("line {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let pdf = MinimalPdfRenderer.render(&snap, &options(0)).unwrap();
        let text = String::from_utf8_lossy(&pdf);
        assert!(text.matches("/Type /Page ").count() >= 2);
    }
}
