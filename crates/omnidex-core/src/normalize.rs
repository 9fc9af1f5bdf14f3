//! Content normalizer.
//!
//! Converts raw source payloads (Markdown, HTML comment bodies, plain
//! text) into a sanitized HTML fragment for previews plus a plain-text
//! rendering for full-text indexing.
//!
//! Sanitizing is allowlist-based over an HTML5 parse tree:
//!
//! - `script`, `style`, `iframe`, `object`, `embed`, `form` and friends are
//!   removed together with their content.
//! - Unknown tags are unwrapped (their children are kept).
//! - Only a handful of attributes survive; every `on*` handler is gone.
//! - Links whose `href` is not an absolute URL are replaced by their text,
//!   which also breaks relative Markdown links.
//!
//! The output is serialized canonically, so feeding it back through
//! [`normalize`] with [`ContentKind::Html`] returns it unchanged.

use pulldown_cmark::{html, Options, Parser};
use scraper::{ElementRef, Html};
use thiserror::Error;

use crate::models::ContentKind;

/// Upper bound on raw payload size accepted for normalization.
pub const MAX_RAW_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("content is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },
    #[error("content looks binary (NUL byte at offset {offset})")]
    Binary { offset: usize },
}

/// Normalized representation of one document body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedContent {
    pub html: String,
    pub text: String,
}

const DROPPED: &[&str] = &[
    "script", "style", "iframe", "frame", "frameset", "object", "embed", "applet", "form",
    "template", "noscript", "textarea", "select", "svg", "math", "head", "title", "meta",
    "link", "base",
];

const ALLOWED: &[&str] = &[
    "a", "abbr", "b", "blockquote", "br", "caption", "code", "col", "colgroup", "dd", "del",
    "details", "div", "dl", "dt", "em", "h1", "h2", "h3", "h4", "h5", "h6", "hr", "i", "img",
    "ins", "kbd", "li", "mark", "ol", "p", "pre", "q", "s", "samp", "span", "strong", "sub",
    "summary", "sup", "table", "tbody", "td", "tfoot", "th", "thead", "tr", "u", "ul",
];

const VOID: &[&str] = &["br", "col", "hr", "img"];

const BLOCK: &[&str] = &[
    "blockquote", "br", "caption", "dd", "details", "div", "dl", "dt", "h1", "h2", "h3", "h4",
    "h5", "h6", "hr", "li", "ol", "p", "pre", "summary", "table", "td", "th", "tr", "ul",
];

/// Normalize one raw payload.
pub fn normalize(raw: &str, kind: ContentKind) -> Result<NormalizedContent, NormalizeError> {
    if raw.len() > MAX_RAW_BYTES {
        return Err(NormalizeError::TooLarge {
            size: raw.len(),
            limit: MAX_RAW_BYTES,
        });
    }
    if let Some(offset) = raw.find('\0') {
        return Err(NormalizeError::Binary { offset });
    }

    let html = match kind {
        ContentKind::Empty => return Ok(NormalizedContent::default()),
        ContentKind::Markdown => sanitize_html(&render_markdown(raw)),
        ContentKind::Html => sanitize_html(raw),
        ContentKind::PlainText => sanitize_html(&plain_text_to_html(raw)),
    };
    let text = html_to_text(&html);
    Ok(NormalizedContent { html, text })
}

/// Render CommonMark (with tables and strikethrough) to unsanitized HTML.
pub fn render_markdown(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    let parser = Parser::new_ext(markdown, options);
    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

/// Sanitize an HTML fragment against the allowlist.
pub fn sanitize_html(input: &str) -> String {
    let fragment = Html::parse_fragment(input);
    let mut out = String::with_capacity(input.len());
    write_children(fragment.root_element(), &mut out);
    out
}

/// Text content of an HTML fragment with whitespace collapsed.
pub fn html_to_text(input: &str) -> String {
    let fragment = Html::parse_fragment(input);
    let mut raw = String::with_capacity(input.len());
    collect_text(fragment.root_element(), &mut raw);
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate to `max_chars` characters, appending `...` when cut.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    let trimmed = cut.trim_end().len();
    cut.truncate(trimmed);
    cut.push_str("...");
    cut
}

/// Whether an `href` is a usable absolute link.
///
/// Truncated links left behind by excerpting (`...`, a dangling `-`, or
/// an embedded highlight tag) are rejected along with relative paths.
pub fn is_url(href: &str) -> bool {
    let href = href.trim();
    if href.contains("...") || href.contains("<b") || href.contains("&lt;") || href.ends_with('-')
    {
        return false;
    }
    let lower = href.to_ascii_lowercase();
    ["http://", "https://", "ftp://", "//", "mailto:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme) && lower.len() > scheme.len())
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    escape_text_into(s, &mut out);
    out
}

fn escape_text_into(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}

fn escape_attr_into(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}

fn plain_text_to_html(raw: &str) -> String {
    let normalized = raw.replace("\r\n", "\n");
    let mut out = String::with_capacity(normalized.len() + 16);
    for block in normalized.split("\n\n") {
        let block = block.trim();
        if block.is_empty() {
            continue;
        }
        out.push_str("<p>");
        for (i, line) in block.lines().enumerate() {
            if i > 0 {
                out.push_str("<br>");
            }
            escape_text_into(line, &mut out);
        }
        out.push_str("</p>");
    }
    out
}

fn allowed_attrs(tag: &str) -> &'static [&'static str] {
    match tag {
        "a" => &["href", "title"],
        "img" => &["src", "alt", "title"],
        "td" | "th" => &["colspan", "rowspan", "align"],
        "ol" => &["start"],
        "code" => &["class"],
        "abbr" => &["title"],
        _ => &[],
    }
}

fn attr_ok(tag: &str, attr: &str, value: &str) -> bool {
    match (tag, attr) {
        ("a", "href") => is_url(value),
        ("img", "src") => {
            let lower = value.trim().to_ascii_lowercase();
            lower.starts_with("https://") || lower.starts_with("http://")
        }
        ("code", "class") => {
            value.starts_with("language-")
                && value.len() > "language-".len()
                && value
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '+'))
        }
        ("td" | "th", "colspan" | "rowspan") | ("ol", "start") => {
            value.chars().all(|c| c.is_ascii_digit()) && !value.is_empty()
        }
        _ => true,
    }
}

fn write_children(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        if let Some(child_el) = ElementRef::wrap(child) {
            write_element(child_el, out);
        } else if let Some(text) = child.value().as_text() {
            escape_text_into(text, out);
        }
    }
}

fn write_element(el: ElementRef<'_>, out: &mut String) {
    let name = el.value().name();
    if DROPPED.contains(&name) {
        return;
    }
    if !ALLOWED.contains(&name) {
        write_children(el, out);
        return;
    }

    let attrs: Vec<(&str, &str)> = allowed_attrs(name)
        .iter()
        .filter_map(|attr| el.value().attr(attr).map(|v| (*attr, v)))
        .filter(|(attr, value)| attr_ok(name, attr, value))
        .collect();

    match name {
        "a" if !attrs.iter().any(|(attr, _)| *attr == "href") => {
            write_children(el, out);
            return;
        }
        "img" if !attrs.iter().any(|(attr, _)| *attr == "src") => return,
        _ => {}
    }

    out.push('<');
    out.push_str(name);
    for (attr, value) in &attrs {
        out.push(' ');
        out.push_str(attr);
        out.push_str("=\"");
        escape_attr_into(value, out);
        out.push('"');
    }
    out.push('>');

    if VOID.contains(&name) {
        return;
    }

    // The HTML parser drops one leading newline inside <pre>.
    if name == "pre" {
        let leading_newline = el
            .children()
            .next()
            .and_then(|c| c.value().as_text().map(|t| t.starts_with('\n')))
            .unwrap_or(false);
        if leading_newline {
            out.push('\n');
        }
    }

    write_children(el, out);
    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

fn collect_text(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        if let Some(child_el) = ElementRef::wrap(child) {
            let name = child_el.value().name();
            if DROPPED.contains(&name) {
                continue;
            }
            let block = BLOCK.contains(&name);
            if block {
                out.push(' ');
            }
            collect_text(child_el, out);
            if block {
                out.push(' ');
            }
        } else if let Some(text) = child.value().as_text() {
            out.push_str(text);
        }
    }
}
