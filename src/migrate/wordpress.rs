//! WordPress export reader.
//!
//! The export is a JSON rendition of the WordPress WXR file:
//!
//! ```json
//! { "channel_link": "http://old.example.com",
//!   "items": [ { "title": "...", "content": "...", "status": "publish",
//!                "post_type": "post", "post_date": "2009-03-07 10:00:00",
//!                "link": "http://old.example.com/2009/03/hello",
//!                "categories": ["rust"],
//!                "comments": [ { "id": 1, "parent": 0, "approved": "1", ... } ] } ] }
//! ```

use crate::config::Site;
use crate::markup::escape_html;
use crate::model::{ImportedArticle, ImportedComment};
use crate::paths::format_post_path;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DEFAULT_AUTHOR: &str = "Someone";

static CAPTION_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[caption[^\]]*\]").expect("valid caption regex"));
static SOURCECODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)\[sourcecode(?: language="([a-z]+)")?\](.*?)\[/sourcecode\]"#)
        .expect("valid sourcecode regex")
});

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("export is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("item {index}: {reason}")]
    Item { index: usize, reason: String },
    #[error("comment {id}: {reason}")]
    Comment { id: i64, reason: String },
}

#[derive(Debug, Deserialize)]
struct Export {
    #[serde(default)]
    channel_link: String,
    #[serde(default)]
    items: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct WpItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    post_type: String,
    #[serde(default)]
    post_date: Option<String>,
    #[serde(default)]
    link: String,
    #[serde(default)]
    categories: Vec<String>,
    #[serde(default)]
    comments: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct WpComment {
    id: i64,
    #[serde(default)]
    parent: i64,
    #[serde(default)]
    approved: Value,
    #[serde(default)]
    author: String,
    #[serde(default)]
    author_email: String,
    #[serde(default)]
    author_url: String,
    date: String,
    #[serde(default)]
    content: String,
}

pub async fn load_export(path: &Path, site: &Site) -> Result<Vec<ImportedArticle>, ImportError> {
    let raw = tokio::fs::read_to_string(path).await?;
    parse_export(&raw, site)
}

/// Read every `post` item. Malformed items and comments are logged and skipped.
pub fn parse_export(raw: &str, site: &Site) -> Result<Vec<ImportedArticle>, ImportError> {
    let export: Export = serde_json::from_str(raw)?;
    let mut articles = Vec::new();
    let mut taken = HashSet::new();
    for (index, value) in export.items.into_iter().enumerate() {
        match convert_item(index, value, &export.channel_link, site, &mut taken) {
            Ok(Some(article)) => articles.push(article),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "skipping export item"),
        }
    }
    info!(count = articles.len(), "export parsed");
    Ok(articles)
}

fn convert_item(
    index: usize,
    value: Value,
    channel_link: &str,
    site: &Site,
    taken: &mut HashSet<String>,
) -> Result<Option<ImportedArticle>, ImportError> {
    let item: WpItem = serde_json::from_value(value).map_err(|e| ImportError::Item {
        index,
        reason: e.to_string(),
    })?;
    if item.post_type != "post" {
        return Ok(None);
    }

    let (path, published) = if item.status == "draft" {
        (None, None)
    } else {
        let raw_date = item.post_date.as_deref().ok_or_else(|| ImportError::Item {
            index,
            reason: "missing post_date".into(),
        })?;
        let published = parse_date(raw_date).map_err(|reason| ImportError::Item { index, reason })?;
        let path = match item.link.strip_prefix(channel_link).filter(|p| !p.is_empty()) {
            Some(linked) => linked.to_string(),
            None => derive_path(&site.post_path_format, &item.title, published, taken),
        };
        taken.insert(path.clone());
        (Some(path), Some(published))
    };

    let mut comments = Vec::new();
    for value in item.comments {
        match convert_comment(value, &site.host) {
            Ok(Some(comment)) => comments.push(comment),
            Ok(None) => {}
            Err(e) => warn!(item = index, error = %e, "skipping comment"),
        }
    }

    let mut tags = item.categories;
    tags.sort();
    tags.dedup();

    Ok(Some(ImportedArticle {
        path,
        title: item.title,
        body: expand_shortcodes(&item.content.replace('\u{a0}', " ")),
        tags,
        published,
        comments,
    }))
}

/// First `format` expansion not already used by an earlier item.
fn derive_path(
    format: &str,
    title: &str,
    published: DateTime<Utc>,
    taken: &HashSet<String>,
) -> String {
    let mut num = 0;
    loop {
        let path = format_post_path(format, title, published, num);
        if !taken.contains(&path) {
            return path;
        }
        num += 1;
    }
}

fn convert_comment(value: Value, host: &str) -> Result<Option<ImportedComment>, ImportError> {
    let id = value.get("id").and_then(Value::as_i64).unwrap_or_default();
    let raw: WpComment = serde_json::from_value(value).map_err(|e| ImportError::Comment {
        id,
        reason: e.to_string(),
    })?;
    if !is_approved(&raw.approved) {
        return Ok(None);
    }
    let created_at = parse_date(&raw.date).map_err(|reason| ImportError::Comment { id, reason })?;
    Ok(Some(ImportedComment {
        id: raw.id,
        parent: raw.parent,
        author_name: non_empty(raw.author).unwrap_or_else(|| DEFAULT_AUTHOR.to_string()),
        author_email: non_empty(raw.author_email).unwrap_or_else(|| format!("someone@{host}")),
        author_url: non_empty(raw.author_url),
        body: raw.content,
        created_at,
    }))
}

fn is_approved(flag: &Value) -> bool {
    match flag {
        Value::String(s) => s == "1",
        Value::Number(n) => n.as_i64() == Some(1),
        Value::Bool(b) => *b,
        _ => false,
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

fn parse_date(raw: &str) -> Result<DateTime<Utc>, String> {
    NaiveDateTime::parse_from_str(raw.trim(), DATE_FORMAT)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|e| format!("bad date {raw:?}: {e}"))
}

/// Expand `[caption]` and `[sourcecode]` shortcodes into plain HTML.
pub fn expand_shortcodes(content: &str) -> String {
    let captioned = CAPTION_OPEN
        .replace_all(content, r#"<div class="image">"#)
        .replace("[/caption]", "</div>");
    SOURCECODE
        .replace_all(&captioned, |caps: &regex::Captures| {
            let code = escape_html(caps.get(2).map_or("", |m| m.as_str()));
            match caps.get(1) {
                Some(lang) => format!(r#"<pre class="{}">{code}</pre>"#, lang.as_str()),
                None => format!("<pre>{code}</pre>"),
            }
        })
        .into_owned()
}
