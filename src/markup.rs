//! Markup rendering for post and page bodies.
//!
//! Rendering is dispatched on the stored markup tag. Tags without a bundled
//! renderer (including `textile` and `rst`) pass the text through unchanged.

use once_cell::sync::Lazy;
use pulldown_cmark::{html, Options, Parser};
use regex::Regex;

static CUT_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<!--.*cut.*-->").expect("valid cut regex"));

static PARAGRAPH_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n{2,}").expect("valid paragraph regex"));

static ANY_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));

// 1: closing slash, 2: tag name, 3: self-closing slash, 4: entity, 5: word
static TAG_OR_WORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<(/)?([A-Za-z][A-Za-z0-9]*)[^>]*?(/)?>|<[^>]*>|(&[^;\s]*;)|(\w[-\w]*)")
        .expect("valid truncation regex")
});

const VOID_ELEMENTS: &[&str] = &[
    "br", "col", "link", "base", "img", "param", "area", "hr", "input", "meta", "source", "wbr",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkupKind {
    Html,
    Text,
    Markdown,
}

impl MarkupKind {
    pub const ALL: [MarkupKind; 3] = [MarkupKind::Html, MarkupKind::Text, MarkupKind::Markdown];

    pub fn as_str(&self) -> &'static str {
        match self {
            MarkupKind::Html => "html",
            MarkupKind::Text => "txt",
            MarkupKind::Markdown => "markdown",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == tag)
    }

    fn renderer(&self) -> fn(&str) -> String {
        match self {
            MarkupKind::Html => str::to_string,
            MarkupKind::Text => render_text,
            MarkupKind::Markdown => render_markdown,
        }
    }
}

/// Render `text` according to the markup tag `kind`; unknown tags are identity.
pub fn render(kind: &str, text: &str) -> String {
    match MarkupKind::parse(kind) {
        Some(kind) => (kind.renderer())(text),
        None => text.to_string(),
    }
}

fn render_text(text: &str) -> String {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    PARAGRAPH_BREAK
        .split(normalized.trim_matches('\n'))
        .map(|para| format!("<p>{}</p>", escape_html(para).replace('\n', "<br />")))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn render_markdown(text: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    let parser = Parser::new_ext(text, options);
    let mut out = String::with_capacity(text.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

/// Remove every cut separator from a raw body.
pub fn clean_content(body: &str) -> String {
    CUT_SEPARATOR.replace_all(body, "").into_owned()
}

pub fn render_body(markup: &str, body: &str) -> String {
    render(markup, &clean_content(body))
}

/// Text before the first cut separator, or the whole body cut to `summary_words` words.
pub fn render_summary(markup: &str, body: &str, summary_words: usize) -> String {
    match CUT_SEPARATOR.find(body) {
        Some(m) => render(markup, &body[..m.start()]),
        None => truncate_html_words(&render_body(markup, body), summary_words),
    }
}

/// Truncate HTML after `limit` words, appending ` ...` and closing any tags
/// left open at the cut point.
pub fn truncate_html_words(html: &str, limit: usize) -> String {
    if limit == 0 {
        return String::new();
    }

    let mut words = 0usize;
    let mut cut_at = None;
    let mut open: Vec<String> = Vec::new();

    for caps in TAG_OR_WORD.captures_iter(html) {
        if caps.get(5).is_some() {
            words += 1;
            if words == limit {
                cut_at = caps.get(0).map(|m| m.end());
            }
            if words > limit {
                break;
            }
            continue;
        }
        if cut_at.is_some() || caps.get(4).is_some() {
            continue;
        }
        let Some(name) = caps.get(2).map(|m| m.as_str().to_ascii_lowercase()) else {
            continue;
        };
        if caps.get(3).is_some() || VOID_ELEMENTS.contains(&name.as_str()) {
            continue;
        }
        if caps.get(1).is_some() {
            if let Some(pos) = open.iter().rposition(|t| *t == name) {
                open.truncate(pos);
            }
        } else {
            open.push(name);
        }
    }

    let Some(end) = cut_at.filter(|_| words > limit) else {
        return html.to_string();
    };
    let mut out = html[..end].to_string();
    out.push_str(" ...");
    for tag in open.iter().rev() {
        out.push_str("</");
        out.push_str(tag);
        out.push('>');
    }
    out
}

/// Remove all markup tags, keeping the text between them.
pub fn strip_tags(text: &str) -> String {
    ANY_TAG.replace_all(text, "").into_owned()
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
