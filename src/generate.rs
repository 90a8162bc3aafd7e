//! Artifact generators run by [`Task::Generate`](crate::queue::Task::Generate).
//!
//! Every generator rebuilds its output from the store and overwrites it by
//! path, so running one twice is harmless.

use crate::config::Site;
use crate::db::{self, Pool, PostFilter};
use crate::markup::{self, escape_html};
use crate::model::{GeneratorKind, Page, Post, RegenerationKey};
use crate::publish::{StaticPublisher, ATOM_MIME, HTML_MIME, XML_MIME};
use crate::scan::{scan, Direction, ScanCursor};
use crate::store::{IndexedPathSource, PostSource};
use anyhow::{anyhow, Result};
use chrono::{TimeZone, Utc};
use tracing::{debug, info, instrument};

pub const ATOM_PATH: &str = "/feeds/atom.xml";
pub const SITEMAP_PATH: &str = "/sitemap.xml";
const ATOM_ENTRIES: u32 = 10;
const SITEMAP_PAGE_SIZE: u32 = 1000;

#[instrument(skip_all, fields(key = %key))]
pub async fn generate(
    pool: &Pool,
    publisher: &dyn StaticPublisher,
    site: &Site,
    key: &RegenerationKey,
) -> Result<()> {
    match key.generator {
        GeneratorKind::Post => {
            let id: i64 = key
                .argument
                .parse()
                .map_err(|_| anyhow!("invalid post id {:?}", key.argument))?;
            generate_post(pool, publisher, site, id).await
        }
        GeneratorKind::Page => generate_page(pool, publisher, site, &key.argument).await,
        GeneratorKind::Index => {
            publish_listing(pool, publisher, site, PostFilter::All, "/", &site.title).await
        }
        GeneratorKind::Tag => {
            let base = format!("/tag/{}", key.argument);
            let title = format!("Posts tagged {}", key.argument);
            publish_listing(pool, publisher, site, PostFilter::Tag(key.argument.clone()), &base, &title)
                .await
        }
        GeneratorKind::Archive => {
            let (filter, base) = archive_month(&key.argument)?;
            let title = format!("Archive {}", key.argument);
            publish_listing(pool, publisher, site, filter, &base, &title).await
        }
        GeneratorKind::Atom => generate_atom(pool, publisher, site).await,
        GeneratorKind::Sitemap => generate_sitemap(pool, publisher, site).await,
    }
}

async fn generate_post(pool: &Pool, publisher: &dyn StaticPublisher, site: &Site, id: i64) -> Result<()> {
    let Some(post) = db::get_post(pool, id).await? else {
        debug!(id, "post gone; nothing to generate");
        return Ok(());
    };
    let Some(path) = post.path.as_deref().filter(|_| !post.is_draft()) else {
        debug!(id, "draft; nothing to generate");
        return Ok(());
    };
    let html = render_layout(&site.title, &post.title, &render_post(&post));
    publisher.publish(path, html.as_bytes(), HTML_MIME, true).await
}

async fn generate_page(
    pool: &Pool,
    publisher: &dyn StaticPublisher,
    site: &Site,
    path: &str,
) -> Result<()> {
    let Some(page) = db::get_page(pool, path).await? else {
        debug!(path, "page gone; nothing to generate");
        return Ok(());
    };
    let html = render_layout(&site.title, &page.title, &render_page(&page));
    publisher.publish(&page.path, html.as_bytes(), HTML_MIME, true).await
}

/// `/page/2` style path of listing page `n` (1-based) under `base`.
pub fn listing_path(base: &str, n: u32) -> String {
    if n <= 1 {
        base.to_string()
    } else {
        format!("{}/page/{n}", base.trim_end_matches('/'))
    }
}

/// Publish `base`, `base/page/2`, ... with `posts_per_page` summaries each.
async fn publish_listing(
    pool: &Pool,
    publisher: &dyn StaticPublisher,
    site: &Site,
    filter: PostFilter,
    base: &str,
    title: &str,
) -> Result<()> {
    let source = PostSource::new(pool, filter);
    let mut cursor = ScanCursor::start(site.posts_per_page.max(1), Direction::Descending);
    let mut n = 1;
    loop {
        let page = scan(&source, &cursor).await?;
        let mut body = String::new();
        for post in &page.items {
            body.push_str(&render_summary(post, site.summary_length));
        }
        let last = page.is_last();
        body.push_str("<nav class=\"pager\">");
        if n > 1 {
            body.push_str(&format!(
                "<a rel=\"prev\" href=\"{}\">Newer</a>",
                escape_html(&listing_path(base, n - 1))
            ));
        }
        if !last {
            body.push_str(&format!(
                "<a rel=\"next\" href=\"{}\">Older</a>",
                escape_html(&listing_path(base, n + 1))
            ));
        }
        body.push_str("</nav>\n");

        let html = render_layout(&site.title, title, &body);
        publisher
            .publish(&listing_path(base, n), html.as_bytes(), HTML_MIME, true)
            .await?;

        match page.next {
            Some(next) => {
                cursor = next;
                n += 1;
            }
            None => break,
        }
    }
    info!(base, pages = n, "listing published");
    Ok(())
}

/// `YYYY-MM` into a publish window and the archive's base path.
fn archive_month(arg: &str) -> Result<(PostFilter, String)> {
    let invalid = || anyhow!("invalid archive month {arg:?}");
    let (year, month) = arg.split_once('-').ok_or_else(invalid)?;
    let year: i32 = year.parse().map_err(|_| invalid())?;
    let month: u32 = month.parse().map_err(|_| invalid())?;
    let start = Utc
        .with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .ok_or_else(invalid)?;
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let end = Utc
        .with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0)
        .single()
        .ok_or_else(invalid)?;
    Ok((
        PostFilter::Published { start, end },
        format!("/{year:04}/{month:02}/"),
    ))
}

async fn generate_atom(pool: &Pool, publisher: &dyn StaticPublisher, site: &Site) -> Result<()> {
    let source = PostSource::all(pool);
    let page = scan(&source, &ScanCursor::start(ATOM_ENTRIES, Direction::Descending)).await?;
    let xml = render_atom(site, &page.items);
    publisher.publish(ATOM_PATH, xml.as_bytes(), ATOM_MIME, false).await
}

async fn generate_sitemap(pool: &Pool, publisher: &dyn StaticPublisher, site: &Site) -> Result<()> {
    let source = IndexedPathSource::new(pool);
    let mut cursor = ScanCursor::start(SITEMAP_PAGE_SIZE, Direction::Ascending);
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">\n",
    );
    let mut count = 0usize;
    loop {
        let page = scan(&source, &cursor).await?;
        for path in &page.items {
            xml.push_str(&format!(
                "  <url><loc>{}</loc></url>\n",
                escape_html(&format!("http://{}{}", site.host, path.0))
            ));
        }
        count += page.items.len();
        match page.next {
            Some(next) => cursor = next,
            None => break,
        }
    }
    xml.push_str("</urlset>\n");
    debug!(count, "sitemap built");
    publisher.publish(SITEMAP_PATH, xml.as_bytes(), XML_MIME, false).await
}

fn render_post(post: &Post) -> String {
    let mut out = String::from("<article>");
    if let Some(ts) = post.published {
        out.push_str(&format!(
            "<time datetime=\"{}\">{}</time>",
            ts.to_rfc3339(),
            ts.format("%Y-%m-%d")
        ));
    }
    out.push_str(&markup::render_body(&post.body_markup, &post.body));
    if !post.tags.is_empty() {
        out.push_str("<p class=\"tags\">");
        for tag in &post.tags {
            out.push_str(&format!(
                "<a href=\"/tag/{}\">{}</a> ",
                escape_html(tag),
                escape_html(tag)
            ));
        }
        out.push_str("</p>");
    }
    out.push_str("</article>\n");
    out
}

fn render_page(page: &Page) -> String {
    format!(
        "<article>{}</article>\n",
        markup::render_body(&page.body_markup, &page.body)
    )
}

fn render_summary(post: &Post, words: usize) -> String {
    let path = post.path.as_deref().unwrap_or_default();
    format!(
        "<section class=\"summary\"><h2><a href=\"{}\">{}</a></h2>{}</section>\n",
        escape_html(path),
        escape_html(&post.title),
        markup::render_summary(&post.body_markup, &post.body, words)
    )
}

fn render_layout(site_title: &str, title: &str, body: &str) -> String {
    format!(
        r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>{} - {}</title>
    <link rel="alternate" type="application/atom+xml" href="{ATOM_PATH}">
  </head>
  <body>
    <header>
      <h1>{}</h1>
    </header>
    <main>
      {}
    </main>
  </body>
</html>"#,
        escape_html(title),
        escape_html(site_title),
        escape_html(title),
        body
    )
}

fn render_atom(site: &Site, posts: &[Post]) -> String {
    let updated = posts
        .iter()
        .filter_map(|p| p.updated.or(p.published))
        .max()
        .unwrap_or_else(Utc::now);
    let mut xml = format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
         <feed xmlns=\"http://www.w3.org/2005/Atom\">\n\
         <title>{}</title>\n\
         <link href=\"http://{host}/\"/>\n\
         <link rel=\"self\" href=\"http://{host}{ATOM_PATH}\"/>\n\
         <id>http://{host}/</id>\n\
         <updated>{}</updated>\n",
        escape_html(&site.title),
        updated.to_rfc3339(),
        host = site.host,
    );
    for post in posts {
        let url = format!("http://{}{}", site.host, post.path.as_deref().unwrap_or_default());
        let published = post.published.unwrap_or(updated);
        xml.push_str(&format!(
            "<entry>\n<title>{}</title>\n<link href=\"{}\"/>\n<id>{}</id>\n\
             <published>{}</published>\n<updated>{}</updated>\n\
             <content type=\"html\">{}</content>\n</entry>\n",
            escape_html(&post.title),
            escape_html(&url),
            escape_html(&url),
            published.to_rfc3339(),
            post.updated.unwrap_or(published).to_rfc3339(),
            escape_html(&markup::render_body(&post.body_markup, &post.body)),
        ));
    }
    xml.push_str("</feed>\n");
    xml
}
