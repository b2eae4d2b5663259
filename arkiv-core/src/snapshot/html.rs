//! Conservative allow-list HTML sanitizer and HTML-to-text stripping.
//!
//! The sanitizer keeps a small tag/attribute whitelist, drops scripts,
//! styles, frames and form machinery together with their content, filters
//! `href` to http/https/mailto, and caps nesting depth. Anything it cannot
//! prove safe is dropped; text content is re-escaped on output.

use std::sync::LazyLock;

use regex::Regex;

const ALLOWED_TAGS: &[&str] = &[
    "a", "b", "blockquote", "br", "code", "div", "em", "h1", "h2", "h3", "h4", "h5", "h6", "hr",
    "i", "li", "ol", "p", "pre", "span", "strong", "table", "tbody", "td", "th", "thead", "tr",
    "u", "ul",
];

const DROP_WITH_CONTENT: &[&str] = &[
    "script", "style", "iframe", "object", "embed", "link", "meta", "base", "form", "input",
    "button", "textarea", "select", "option",
];

const VOID_TAGS: &[&str] = &["br", "hr"];

const MAX_NESTING_DEPTH: usize = 50;

static HTML_TAG_HINT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)<\s*(?:p|div|br|span|a|ul|ol|li|pre|code|blockquote|table|tr|td|th|strong|em|b|i|u)\b",
    )
    .expect("html hint pattern")
});

/// Content-type says HTML, or the body looks like common HTML tags.
pub fn has_html_hint(content_type: Option<&str>, body: &str) -> bool {
    if content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("html")) {
        return true;
    }
    HTML_TAG_HINT_RE.is_match(body)
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            other => out.push(other),
        }
    }
    out
}

/// Decode the handful of entities that matter for text normalization.
fn unescape_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.char_indices().peekable();
    while let Some((idx, ch)) = chars.next() {
        if ch != '&' {
            out.push(ch);
            continue;
        }
        let rest = &text[idx..];
        let Some(end) = rest.find(';').filter(|end| *end <= 12) else {
            out.push('&');
            continue;
        };
        let entity = &rest[1..end];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            "nbsp" => Some(' '),
            _ => entity
                .strip_prefix('#')
                .and_then(|num| {
                    if let Some(hex) = num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
                        u32::from_str_radix(hex, 16).ok()
                    } else {
                        num.parse::<u32>().ok()
                    }
                })
                .and_then(char::from_u32),
        };
        match decoded {
            Some(decoded) => {
                out.push(decoded);
                for _ in 0..end {
                    chars.next();
                }
            }
            None => out.push('&'),
        }
    }
    out
}

fn sanitize_href(raw: &str) -> Option<String> {
    let href = raw.trim();
    if href.is_empty() || href.contains('\0') {
        return None;
    }

    // Scheme-relative URLs smuggle a host without a scheme.
    if href.starts_with("//") {
        return None;
    }

    match href.split_once(':') {
        None => Some(href.to_string()),
        Some((scheme, _)) => {
            let scheme = scheme.trim().to_ascii_lowercase();
            if matches!(scheme.as_str(), "http" | "https" | "mailto") {
                Some(href.to_string())
            } else {
                None
            }
        }
    }
}

#[derive(Debug)]
enum Token<'a> {
    Text(&'a str),
    Open { name: String, attrs: Vec<(String, String)>, self_closing: bool },
    Close { name: String },
    Skip,
}

fn parse_tag(tag_body: &str) -> Token<'_> {
    let body = tag_body.trim();
    if body.is_empty() || body.starts_with('!') || body.starts_with('?') {
        return Token::Skip;
    }

    if let Some(rest) = body.strip_prefix('/') {
        let name: String = rest
            .trim()
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        if name.is_empty() {
            return Token::Skip;
        }
        return Token::Close { name };
    }

    let self_closing = body.ends_with('/');
    let body = body.trim_end_matches('/').trim_end();

    let mut chars = body.char_indices();
    let mut name_end = body.len();
    for (idx, ch) in chars.by_ref() {
        if ch.is_whitespace() {
            name_end = idx;
            break;
        }
    }
    let name = body[..name_end].to_ascii_lowercase();
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Token::Skip;
    }

    let mut attrs = Vec::new();
    let mut rest = body[name_end..].trim_start();
    while !rest.is_empty() {
        let key_end = rest
            .find(|c: char| c == '=' || c.is_whitespace())
            .unwrap_or(rest.len());
        let key = rest[..key_end].trim().to_ascii_lowercase();
        rest = rest[key_end..].trim_start();

        let value = if let Some(after_eq) = rest.strip_prefix('=') {
            let after_eq = after_eq.trim_start();
            if let Some(stripped) = after_eq.strip_prefix('"') {
                let end = stripped.find('"').unwrap_or(stripped.len());
                rest = stripped.get(end + 1..).unwrap_or("").trim_start();
                stripped[..end].to_string()
            } else if let Some(stripped) = after_eq.strip_prefix('\'') {
                let end = stripped.find('\'').unwrap_or(stripped.len());
                rest = stripped.get(end + 1..).unwrap_or("").trim_start();
                stripped[..end].to_string()
            } else {
                let end = after_eq
                    .find(|c: char| c.is_whitespace())
                    .unwrap_or(after_eq.len());
                rest = after_eq[end..].trim_start();
                after_eq[..end].to_string()
            }
        } else {
            String::new()
        };

        if !key.is_empty() {
            attrs.push((key, unescape_entities(&value)));
        } else if rest.len() == body.len() {
            break;
        }
    }

    Token::Open {
        name,
        attrs,
        self_closing,
    }
}

fn tokenize(html: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut rest = html;
    while let Some(open_idx) = rest.find('<') {
        if open_idx > 0 {
            tokens.push(Token::Text(&rest[..open_idx]));
        }
        let after = &rest[open_idx + 1..];
        match after.find('>') {
            Some(close_idx) => {
                tokens.push(parse_tag(&after[..close_idx]));
                rest = &after[close_idx + 1..];
            }
            None => {
                // Unterminated tag: drop the remainder rather than guess.
                rest = "";
            }
        }
    }
    if !rest.is_empty() {
        tokens.push(Token::Text(rest));
    }
    tokens
}

fn allowed_attrs(tag: &str) -> &'static [&'static str] {
    match tag {
        "a" => &["href", "title"],
        "td" | "th" => &["colspan", "rowspan"],
        _ => &[],
    }
}

fn clean_attrs(tag: &str, attrs: &[(String, String)]) -> Vec<(String, String)> {
    let allowed = allowed_attrs(tag);
    let mut cleaned = Vec::new();
    for (key, value) in attrs {
        if key.starts_with("on") || key == "style" || !allowed.contains(&key.as_str()) {
            continue;
        }
        if tag == "a" && key == "href" {
            if let Some(href) = sanitize_href(value) {
                cleaned.push((key.clone(), href));
            }
            continue;
        }
        cleaned.push((key.clone(), value.clone()));
    }
    cleaned
}

/// Sanitize an HTML fragment to the allow-list. Unknown tags disappear but
/// keep their text; drop-with-content tags lose everything inside.
pub fn sanitize_html_fragment(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut open_stack: Vec<String> = Vec::new();
    let mut skip_depth = 0usize;

    for token in tokenize(html) {
        match token {
            Token::Skip => {}
            Token::Text(text) => {
                if skip_depth == 0 {
                    out.push_str(&escape_html(&unescape_entities(text)));
                }
            }
            Token::Open {
                name,
                attrs,
                self_closing,
            } => {
                if DROP_WITH_CONTENT.contains(&name.as_str()) {
                    if !self_closing && !VOID_TAGS.contains(&name.as_str()) {
                        skip_depth += 1;
                    }
                    continue;
                }
                if skip_depth > 0 {
                    continue;
                }
                if !ALLOWED_TAGS.contains(&name.as_str()) || open_stack.len() >= MAX_NESTING_DEPTH {
                    continue;
                }

                let cleaned = clean_attrs(&name, &attrs);
                let attr_text: String = cleaned
                    .iter()
                    .map(|(k, v)| format!(" {k}=\"{}\"", escape_html(v)))
                    .collect();

                if VOID_TAGS.contains(&name.as_str()) {
                    out.push_str(&format!("<{name}{attr_text} />"));
                    continue;
                }

                out.push_str(&format!("<{name}{attr_text}>"));
                open_stack.push(name);
            }
            Token::Close { name } => {
                if DROP_WITH_CONTENT.contains(&name.as_str()) {
                    skip_depth = skip_depth.saturating_sub(1);
                    continue;
                }
                if skip_depth > 0 || VOID_TAGS.contains(&name.as_str()) {
                    continue;
                }
                // Only close what is actually open, in order.
                if open_stack.last().map(String::as_str) == Some(name.as_str()) {
                    open_stack.pop();
                    out.push_str(&format!("</{name}>"));
                }
            }
        }
    }

    // Balance anything left open so the fragment stays well-formed.
    while let Some(name) = open_stack.pop() {
        out.push_str(&format!("</{name}>"));
    }

    out
}

/// Flatten HTML to readable text: block boundaries become newlines,
/// script/style content disappears, entities are decoded.
pub fn strip_html_to_text(html: &str) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut skip_depth = 0usize;

    for token in tokenize(html) {
        match token {
            Token::Text(text) => {
                if skip_depth == 0 {
                    parts.push(unescape_entities(text));
                }
            }
            Token::Open { name, self_closing, .. } => {
                if matches!(name.as_str(), "script" | "style") {
                    if !self_closing {
                        skip_depth += 1;
                    }
                } else if skip_depth == 0
                    && matches!(name.as_str(), "p" | "div" | "br" | "li" | "tr")
                {
                    parts.push("\n".to_string());
                }
            }
            Token::Close { name } => {
                if matches!(name.as_str(), "script" | "style") {
                    skip_depth = skip_depth.saturating_sub(1);
                } else if skip_depth == 0 && matches!(name.as_str(), "p" | "div" | "li" | "tr") {
                    parts.push("\n".to_string());
                }
            }
            Token::Skip => {}
        }
    }

    let text = parts.concat();
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_allowed_tags_and_drops_scripts() {
        let html = r#"<p>Hello <strong>world</strong></p><script>alert(1)</script>"#;
        let out = sanitize_html_fragment(html);
        assert_eq!(out, "<p>Hello <strong>world</strong></p>");
    }

    #[test]
    fn drops_event_handlers_and_style() {
        let html = r#"<p onclick="evil()" style="color:red">x</p>"#;
        assert_eq!(sanitize_html_fragment(html), "<p>x</p>");
    }

    #[test]
    fn filters_href_schemes() {
        let ok = sanitize_html_fragment(r#"<a href="https://example.com">x</a>"#);
        assert!(ok.contains(r#"href="https://example.com""#));

        let js = sanitize_html_fragment(r#"<a href="javascript:alert(1)">x</a>"#);
        assert_eq!(js, "<a>x</a>");

        let proto_relative = sanitize_html_fragment(r#"<a href="//evil.example">x</a>"#);
        assert_eq!(proto_relative, "<a>x</a>");
    }

    #[test]
    fn unknown_tags_keep_their_text() {
        assert_eq!(sanitize_html_fragment("<marquee>hi</marquee>"), "hi");
    }

    #[test]
    fn iframe_content_is_dropped_entirely() {
        assert_eq!(
            sanitize_html_fragment("before<iframe><p>inside</p></iframe>after"),
            "beforeafter"
        );
    }

    #[test]
    fn nesting_depth_is_capped() {
        let html = "<div>".repeat(80) + "deep" + &"</div>".repeat(80);
        let out = sanitize_html_fragment(&html);
        assert_eq!(out.matches("<div>").count(), MAX_NESTING_DEPTH);
        assert!(out.contains("deep"));
    }

    #[test]
    fn text_is_escaped_on_output() {
        let out = sanitize_html_fragment("<p>1 &lt; 2 &amp; x</p>");
        assert_eq!(out, "<p>1 &lt; 2 &amp; x</p>");
    }

    #[test]
    fn unbalanced_tags_are_closed() {
        let out = sanitize_html_fragment("<p><em>open");
        assert_eq!(out, "<p><em>open</em></p>");
    }

    #[test]
    fn strip_to_text_handles_blocks_and_entities() {
        let text = strip_html_to_text("<p>first</p><div>second &amp; third</div>");
        assert_eq!(text, "first\nsecond & third");
    }

    #[test]
    fn strip_to_text_drops_script_bodies() {
        let text = strip_html_to_text("<p>keep</p><script>var x = 1;</script>");
        assert_eq!(text, "keep");
    }

    #[test]
    fn html_hint_detection() {
        assert!(has_html_hint(Some("text/html"), ""));
        assert!(has_html_hint(None, "before <p>after"));
        assert!(!has_html_hint(Some("text/plain"), "a < b and c > d"));
    }
}
