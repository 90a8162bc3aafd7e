use super::model::{PostFilter, StaticContent, TaskRow};
use crate::model::{
    DeployVersionMarker, NewPost, Page, PageKey, Post, PostKey, TaskState, VersionTriple,
};
use crate::scan::Direction;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::instrument;

pub type Pool = SqlitePool;
pub type TaskListing = (i64, Option<String>, String, i32, String, Option<String>);

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    // sqlx refuses to create missing files unless asked to
    if !rebuilt.contains("mode=") {
        rebuilt.push(if query_part.is_some() { '&' } else { '?' });
        rebuilt.push_str("mode=rwc");
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Posts

const POST_COLUMNS: &str =
    "p.id, p.path, p.title, p.body, p.body_markup, p.published, p.updated, p.last_regenerated_at";

fn post_from_row(row: &SqliteRow) -> Result<Post> {
    Ok(Post {
        id: row.try_get("id")?,
        path: row.try_get("path")?,
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        body_markup: row.try_get("body_markup")?,
        tags: Vec::new(),
        published: row.try_get("published")?,
        updated: row.try_get("updated")?,
        last_regenerated_at: row.try_get("last_regenerated_at")?,
    })
}

async fn load_tags(pool: &Pool, post_id: i64) -> Result<Vec<String>> {
    let tags = sqlx::query_scalar::<_, String>(
        "SELECT tag FROM post_tags WHERE post_id = ? ORDER BY tag",
    )
    .bind(post_id)
    .fetch_all(pool)
    .await?;
    Ok(tags)
}

/// Create a post, or overwrite the post already stored at the same path.
#[instrument(skip_all)]
pub async fn upsert_post(pool: &Pool, post: &NewPost) -> Result<i64> {
    let mut tx = pool.begin().await?;
    let id: i64 = sqlx::query(
        "INSERT INTO posts (path, title, body, body_markup, published, updated) \
         VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT(path) DO UPDATE SET title = excluded.title, body = excluded.body, \
         body_markup = excluded.body_markup, published = excluded.published, \
         updated = excluded.updated \
         RETURNING id",
    )
    .bind(post.path.as_deref())
    .bind(&post.title)
    .bind(&post.body)
    .bind(&post.body_markup)
    .bind(post.published)
    .bind(post.updated)
    .fetch_one(&mut *tx)
    .await
    .context("failed to write post")?
    .get("id");

    sqlx::query("DELETE FROM post_tags WHERE post_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    for tag in &post.tags {
        sqlx::query("INSERT OR IGNORE INTO post_tags (post_id, tag) VALUES (?, ?)")
            .bind(id)
            .bind(tag)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(id)
}

#[instrument(skip_all)]
pub async fn get_post(pool: &Pool, id: i64) -> Result<Option<Post>> {
    let sql = format!("SELECT {POST_COLUMNS} FROM posts p WHERE p.id = ?");
    let row = sqlx::query(&sql).bind(id).fetch_optional(pool).await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let mut post = post_from_row(&row)?;
    post.tags = load_tags(pool, post.id).await?;
    Ok(Some(post))
}

#[instrument(skip_all)]
pub async fn get_post_by_path(pool: &Pool, path: &str) -> Result<Option<Post>> {
    let sql = format!("SELECT {POST_COLUMNS} FROM posts p WHERE p.path = ?");
    let row = sqlx::query(&sql).bind(path).fetch_optional(pool).await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let mut post = post_from_row(&row)?;
    post.tags = load_tags(pool, post.id).await?;
    Ok(Some(post))
}

/// Published, non-draft posts strictly after `after` in `(published, id)` order.
#[instrument(skip_all)]
pub async fn fetch_posts_after(
    pool: &Pool,
    filter: &PostFilter,
    after: Option<&PostKey>,
    direction: Direction,
    limit: u32,
) -> Result<Vec<Post>> {
    let mut sql = format!("SELECT {POST_COLUMNS} FROM posts p");
    if matches!(filter, PostFilter::Tag(_)) {
        sql.push_str(" JOIN post_tags t ON t.post_id = p.id");
    }
    sql.push_str(" WHERE p.published IS NOT NULL AND p.path IS NOT NULL");
    match filter {
        PostFilter::All => {}
        PostFilter::Tag(_) => sql.push_str(" AND t.tag = ?"),
        PostFilter::Published { .. } => {
            sql.push_str(" AND p.published >= ? AND p.published < ?")
        }
    }
    let (cmp, order) = match direction {
        Direction::Ascending => (">", "ASC"),
        Direction::Descending => ("<", "DESC"),
    };
    if after.is_some() {
        sql.push_str(&format!(
            " AND (p.published {cmp} ? OR (p.published = ? AND p.id {cmp} ?))"
        ));
    }
    sql.push_str(&format!(
        " ORDER BY p.published {order}, p.id {order} LIMIT ?"
    ));

    let mut query = sqlx::query(&sql);
    match filter {
        PostFilter::All => {}
        PostFilter::Tag(tag) => query = query.bind(tag.as_str()),
        PostFilter::Published { start, end } => query = query.bind(*start).bind(*end),
    }
    if let Some(key) = after {
        query = query.bind(key.published).bind(key.published).bind(key.id);
    }
    let rows = query.bind(i64::from(limit)).fetch_all(pool).await?;

    let mut posts = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut post = post_from_row(row)?;
        post.tags = load_tags(pool, post.id).await?;
        posts.push(post);
    }
    Ok(posts)
}

#[instrument(skip_all)]
pub async fn touch_post(pool: &Pool, id: i64, at: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE posts SET last_regenerated_at = ? WHERE id = ?")
        .bind(at)
        .bind(id)
        .execute(pool)
        .await
        .context("failed to write back post")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Pages

const PAGE_COLUMNS: &str = "path, title, body, body_markup, created, updated, last_regenerated_at";

fn page_from_row(row: &SqliteRow) -> Result<Page> {
    Ok(Page {
        path: row.try_get("path")?,
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        body_markup: row.try_get("body_markup")?,
        created: row.try_get("created")?,
        updated: row.try_get("updated")?,
        last_regenerated_at: row.try_get("last_regenerated_at")?,
    })
}

#[instrument(skip_all)]
pub async fn upsert_page(pool: &Pool, page: &Page) -> Result<()> {
    sqlx::query(
        "INSERT INTO pages (path, title, body, body_markup, created, updated) \
         VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT(path) DO UPDATE SET title = excluded.title, body = excluded.body, \
         body_markup = excluded.body_markup, updated = excluded.updated",
    )
    .bind(&page.path)
    .bind(&page.title)
    .bind(&page.body)
    .bind(&page.body_markup)
    .bind(page.created)
    .bind(page.updated)
    .execute(pool)
    .await
    .context("failed to write page")?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn get_page(pool: &Pool, path: &str) -> Result<Option<Page>> {
    let sql = format!("SELECT {PAGE_COLUMNS} FROM pages WHERE path = ?");
    let row = sqlx::query(&sql).bind(path).fetch_optional(pool).await?;
    row.as_ref().map(page_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn fetch_pages_after(
    pool: &Pool,
    after: Option<&PageKey>,
    direction: Direction,
    limit: u32,
) -> Result<Vec<Page>> {
    let (cmp, order) = match direction {
        Direction::Ascending => (">", "ASC"),
        Direction::Descending => ("<", "DESC"),
    };
    let mut sql = format!("SELECT {PAGE_COLUMNS} FROM pages");
    if after.is_some() {
        sql.push_str(&format!(
            " WHERE (created {cmp} ? OR (created = ? AND path {cmp} ?))"
        ));
    }
    sql.push_str(&format!(" ORDER BY created {order}, path {order} LIMIT ?"));

    let mut query = sqlx::query(&sql);
    if let Some(key) = after {
        query = query
            .bind(key.created)
            .bind(key.created)
            .bind(key.path.as_str());
    }
    let rows = query.bind(i64::from(limit)).fetch_all(pool).await?;
    rows.iter().map(page_from_row).collect()
}

#[instrument(skip_all)]
pub async fn touch_page(pool: &Pool, path: &str, at: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE pages SET last_regenerated_at = ? WHERE path = ?")
        .bind(at)
        .bind(path)
        .execute(pool)
        .await
        .context("failed to write back page")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Static content

#[instrument(skip_all)]
pub async fn put_static(
    pool: &Pool,
    path: &str,
    body: &[u8],
    content_type: &str,
    indexed: bool,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO static_content (path, body, content_type, indexed, last_modified) \
         VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP) \
         ON CONFLICT(path) DO UPDATE SET body = excluded.body, \
         content_type = excluded.content_type, indexed = excluded.indexed, \
         last_modified = CURRENT_TIMESTAMP",
    )
    .bind(path)
    .bind(body)
    .bind(content_type)
    .bind(indexed)
    .execute(pool)
    .await
    .with_context(|| format!("failed to publish {path}"))?;
    Ok(())
}

pub async fn get_static(pool: &Pool, path: &str) -> Result<Option<StaticContent>> {
    let row = sqlx::query(
        "SELECT path, body, content_type, indexed FROM static_content WHERE path = ?",
    )
    .bind(path)
    .fetch_optional(pool)
    .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    Ok(Some(StaticContent {
        path: row.try_get("path")?,
        body: row.try_get("body")?,
        content_type: row.try_get("content_type")?,
        indexed: row.try_get("indexed")?,
    }))
}

#[instrument(skip_all)]
pub async fn fetch_indexed_paths_after(
    pool: &Pool,
    after: Option<&str>,
    limit: u32,
) -> Result<Vec<String>> {
    let paths = match after {
        Some(after) => {
            sqlx::query_scalar::<_, String>(
                "SELECT path FROM static_content WHERE indexed = 1 AND path > ? ORDER BY path LIMIT ?",
            )
            .bind(after)
            .bind(i64::from(limit))
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_scalar::<_, String>(
                "SELECT path FROM static_content WHERE indexed = 1 ORDER BY path LIMIT ?",
            )
            .bind(i64::from(limit))
            .fetch_all(pool)
            .await?
        }
    };
    Ok(paths)
}

// ---------------------------------------------------------------------------
// Deploy markers

fn marker_from_row(row: &SqliteRow) -> Result<DeployVersionMarker> {
    Ok(DeployVersionMarker {
        key_name: row.try_get("key_name")?,
        version: VersionTriple {
            major: row.try_get::<i64, _>("major")? as u32,
            minor: row.try_get::<i64, _>("minor")? as u32,
            rev: row.try_get::<i64, _>("rev")? as u32,
        },
    })
}

#[instrument(skip_all)]
pub async fn get_version_marker(pool: &Pool, key_name: &str) -> Result<Option<DeployVersionMarker>> {
    let row = sqlx::query("SELECT key_name, major, minor, rev FROM version_info WHERE key_name = ?")
        .bind(key_name)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(marker_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn latest_version_marker(pool: &Pool) -> Result<Option<DeployVersionMarker>> {
    let row = sqlx::query(
        "SELECT key_name, major, minor, rev FROM version_info \
         ORDER BY major DESC, minor DESC, rev DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(marker_from_row).transpose()
}

/// Create the marker unless one already exists. Returns whether this call created it.
#[instrument(skip_all)]
pub async fn claim_version_marker(
    pool: &Pool,
    key_name: &str,
    version: VersionTriple,
) -> Result<bool> {
    let res = sqlx::query(
        "INSERT INTO version_info (key_name, major, minor, rev) VALUES (?, ?, ?, ?) \
         ON CONFLICT(key_name) DO NOTHING",
    )
    .bind(key_name)
    .bind(i64::from(version.major))
    .bind(i64::from(version.minor))
    .bind(i64::from(version.rev))
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

#[instrument(skip_all)]
pub async fn release_version_marker(pool: &Pool, key_name: &str) -> Result<()> {
    sqlx::query("DELETE FROM version_info WHERE key_name = ?")
        .bind(key_name)
        .execute(pool)
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tasks

/// Insert a task due after `delay_secs`. Returns `None` when `name` is already taken,
/// including by a completed task.
#[instrument(skip_all)]
pub async fn enqueue_task(
    pool: &Pool,
    name: Option<&str>,
    kind: &str,
    payload: &str,
    delay_secs: i64,
) -> Result<Option<i64>> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO tasks (name, kind, payload, due_at) \
         VALUES (?, ?, ?, datetime('now', ? || ' seconds')) \
         ON CONFLICT(name) DO NOTHING RETURNING id",
    )
    .bind(name)
    .bind(kind)
    .bind(payload)
    .bind(delay_secs)
    .fetch_optional(pool)
    .await?;
    Ok(id)
}

#[instrument(skip_all)]
pub async fn next_due_task(pool: &Pool) -> Result<Option<TaskRow>> {
    let row = sqlx::query(
        "SELECT id, name, kind, payload, attempt FROM tasks \
         WHERE state = 'pending' AND datetime(due_at) <= CURRENT_TIMESTAMP \
         ORDER BY datetime(due_at) ASC, id ASC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    Ok(Some(TaskRow {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        kind: row.try_get("kind")?,
        payload: row.try_get("payload")?,
        attempt: row.try_get("attempt")?,
    }))
}

/// Unnamed tasks are deleted; named ones stay behind as tombstones so the name
/// cannot be scheduled again.
#[instrument(skip_all)]
pub async fn complete_task(pool: &Pool, id: i64) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM tasks WHERE id = ? AND name IS NULL")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE tasks SET state = 'done', last_error = NULL, completed_at = CURRENT_TIMESTAMP WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

/// Delete `done` tombstones whose name starts with one of `name_prefixes` and
/// that completed at least `older_than_secs` ago. Returns how many went.
#[instrument(skip_all)]
pub async fn prune_done_tasks(pool: &Pool, name_prefixes: &[&str], older_than_secs: i64) -> Result<u64> {
    let mut pruned = 0;
    for prefix in name_prefixes {
        let res = sqlx::query(
            "DELETE FROM tasks WHERE state = 'done' AND name LIKE ? || '%' \
             AND datetime(completed_at) <= datetime('now', ? || ' seconds')",
        )
        .bind(*prefix)
        .bind(-older_than_secs)
        .execute(pool)
        .await?;
        pruned += res.rows_affected();
    }
    Ok(pruned)
}

/// Park a task that can never succeed (e.g. an undecodable payload).
#[instrument(skip_all)]
pub async fn fail_task(pool: &Pool, id: i64, error: &str) -> Result<()> {
    sqlx::query("UPDATE tasks SET state = 'failed', last_error = ? WHERE id = ?")
        .bind(error)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Exponential backoff: 5s * 2^attempt, capped at `max_cap_secs` (no cap when <= 0).
#[instrument(skip_all)]
pub async fn backoff_task_with_cap(
    pool: &Pool,
    id: i64,
    attempt: i32,
    max_cap_secs: i64,
    error: &str,
) -> Result<()> {
    let secs = 5_i64 * (1_i64 << attempt.clamp(0, 10));
    let secs = if max_cap_secs <= 0 {
        secs
    } else {
        secs.min(max_cap_secs)
    };
    sqlx::query(
        "UPDATE tasks SET attempt = ?, last_error = ?, due_at = datetime('now', ? || ' seconds') WHERE id = ?",
    )
    .bind(attempt + 1)
    .bind(error)
    .bind(secs)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn count_pending_tasks(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE state = 'pending'")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

pub async fn list_tasks(pool: &Pool, state: TaskState) -> Result<Vec<TaskListing>> {
    let rows = sqlx::query(
        "SELECT id, name, kind, attempt, due_at, last_error FROM tasks WHERE state = ? ORDER BY id",
    )
    .bind(state.as_str())
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| {
            Ok((
                row.try_get("id")?,
                row.try_get("name")?,
                row.try_get("kind")?,
                row.try_get("attempt")?,
                row.try_get("due_at")?,
                row.try_get("last_error")?,
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_pool() -> Pool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn new_post(path: &str, day: u32, tags: &[&str]) -> NewPost {
        let ts = Utc.with_ymd_and_hms(2021, 3, day, 9, 0, 0).unwrap();
        NewPost {
            path: Some(path.to_string()),
            title: format!("Post {path}"),
            body: "<p>hi</p>".into(),
            body_markup: "html".into(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            published: Some(ts),
            updated: Some(ts),
        }
    }

    #[test]
    fn sqlite_url_gets_create_mode() {
        let url = prepare_sqlite_url("sqlite:///tmp/pressline-test/db.sqlite");
        assert_eq!(url, "sqlite:///tmp/pressline-test/db.sqlite?mode=rwc");
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
    }

    #[tokio::test]
    async fn upsert_overwrites_by_path() {
        let pool = setup_pool().await;
        let id = upsert_post(&pool, &new_post("/a", 1, &["x", "y"])).await.unwrap();
        let mut changed = new_post("/a", 1, &["z"]);
        changed.title = "Renamed".into();
        let id2 = upsert_post(&pool, &changed).await.unwrap();
        assert_eq!(id, id2);

        let post = get_post(&pool, id).await.unwrap().unwrap();
        assert_eq!(post.title, "Renamed");
        assert_eq!(post.tags, vec!["z".to_string()]);
    }

    #[tokio::test]
    async fn fetch_after_pages_newest_first() {
        let pool = setup_pool().await;
        for day in 1..=5 {
            upsert_post(&pool, &new_post(&format!("/p{day}"), day, &[])).await.unwrap();
        }
        let first = fetch_posts_after(&pool, &PostFilter::All, None, Direction::Descending, 2)
            .await
            .unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].path.as_deref(), Some("/p5"));

        let key = PostKey {
            published: first[1].published.unwrap(),
            id: first[1].id,
        };
        let rest = fetch_posts_after(&pool, &PostFilter::All, Some(&key), Direction::Descending, 10)
            .await
            .unwrap();
        let paths: Vec<_> = rest.iter().filter_map(|p| p.path.clone()).collect();
        assert_eq!(paths, vec!["/p3", "/p2", "/p1"]);
    }

    #[tokio::test]
    async fn ties_on_publish_time_are_split_by_id() {
        let pool = setup_pool().await;
        for path in ["/a", "/b", "/c"] {
            upsert_post(&pool, &new_post(path, 7, &[])).await.unwrap();
        }
        let first = fetch_posts_after(&pool, &PostFilter::All, None, Direction::Ascending, 1)
            .await
            .unwrap();
        let key = PostKey {
            published: first[0].published.unwrap(),
            id: first[0].id,
        };
        let rest = fetch_posts_after(&pool, &PostFilter::All, Some(&key), Direction::Ascending, 10)
            .await
            .unwrap();
        assert_eq!(rest.len(), 2);
    }

    #[tokio::test]
    async fn drafts_are_not_scanned() {
        let pool = setup_pool().await;
        let mut draft = new_post("/unused", 2, &[]);
        draft.path = None;
        draft.published = None;
        upsert_post(&pool, &draft).await.unwrap();
        let posts = fetch_posts_after(&pool, &PostFilter::All, None, Direction::Descending, 10)
            .await
            .unwrap();
        assert!(posts.is_empty());
    }

    #[tokio::test]
    async fn tag_and_month_filters() {
        let pool = setup_pool().await;
        upsert_post(&pool, &new_post("/a", 1, &["rust"])).await.unwrap();
        upsert_post(&pool, &new_post("/b", 2, &["go"])).await.unwrap();

        let tagged = fetch_posts_after(
            &pool,
            &PostFilter::Tag("rust".into()),
            None,
            Direction::Descending,
            10,
        )
        .await
        .unwrap();
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].path.as_deref(), Some("/a"));

        let march = PostFilter::Published {
            start: Utc.with_ymd_and_hms(2021, 3, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2021, 4, 1, 0, 0, 0).unwrap(),
        };
        let in_month = fetch_posts_after(&pool, &march, None, Direction::Descending, 10)
            .await
            .unwrap();
        assert_eq!(in_month.len(), 2);
    }

    #[tokio::test]
    async fn named_tasks_leave_tombstones() {
        let pool = setup_pool().await;
        let id = enqueue_task(&pool, Some("deploy-1"), "post_deploy", "{}", 0)
            .await
            .unwrap()
            .unwrap();
        assert!(enqueue_task(&pool, Some("deploy-1"), "post_deploy", "{}", 0)
            .await
            .unwrap()
            .is_none());

        complete_task(&pool, id).await.unwrap();
        assert_eq!(count_pending_tasks(&pool).await.unwrap(), 0);
        assert!(enqueue_task(&pool, Some("deploy-1"), "post_deploy", "{}", 0)
            .await
            .unwrap()
            .is_none());

        let anon = enqueue_task(&pool, None, "generate", "{}", 0).await.unwrap().unwrap();
        complete_task(&pool, anon).await.unwrap();
        let left: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(left, 1);
    }

    #[tokio::test]
    async fn pruning_keeps_other_prefixes_and_pending_rows() {
        let pool = setup_pool().await;
        let done_gen = enqueue_task(&pool, Some("gen-a-index-"), "generate", "{}", 0)
            .await
            .unwrap()
            .unwrap();
        enqueue_task(&pool, Some("gen-a-atom-"), "generate", "{}", 0)
            .await
            .unwrap();
        let deploy = enqueue_task(&pool, Some("deploy-1"), "post_deploy", "{}", 0)
            .await
            .unwrap()
            .unwrap();
        complete_task(&pool, done_gen).await.unwrap();
        complete_task(&pool, deploy).await.unwrap();

        // completed just now, so a one hour window keeps it
        assert_eq!(prune_done_tasks(&pool, &["gen-"], 3600).await.unwrap(), 0);
        assert_eq!(prune_done_tasks(&pool, &["gen-", "regen-"], 0).await.unwrap(), 1);

        let names: Vec<String> = sqlx::query_scalar("SELECT name FROM tasks ORDER BY id")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(names, vec!["gen-a-atom-".to_string(), "deploy-1".to_string()]);
        // the freed name can be scheduled again
        assert!(enqueue_task(&pool, Some("gen-a-index-"), "generate", "{}", 0)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn backoff_pushes_task_out() {
        let pool = setup_pool().await;
        let id = enqueue_task(&pool, None, "generate", "{}", 0).await.unwrap().unwrap();
        let due = next_due_task(&pool).await.unwrap().unwrap();
        assert_eq!(due.id, id);

        backoff_task_with_cap(&pool, id, due.attempt, 60, "boom").await.unwrap();
        assert!(next_due_task(&pool).await.unwrap().is_none());
        let failed = list_tasks(&pool, TaskState::Pending).await.unwrap();
        assert_eq!(failed[0].3, 1);
        assert_eq!(failed[0].5.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn marker_claim_is_create_if_absent() {
        let pool = setup_pool().await;
        let v = VersionTriple::new(1, 0, 1);
        assert!(claim_version_marker(&pool, "7-1", v).await.unwrap());
        assert!(!claim_version_marker(&pool, "7-1", v).await.unwrap());
        claim_version_marker(&pool, "6-9", VersionTriple::new(0, 9, 0)).await.unwrap();

        let latest = latest_version_marker(&pool).await.unwrap().unwrap();
        assert_eq!(latest.key_name, "7-1");
        release_version_marker(&pool, "7-1").await.unwrap();
        assert!(get_version_marker(&pool, "7-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn indexed_paths_page_in_order() {
        let pool = setup_pool().await;
        put_static(&pool, "/b", b"b", "text/html", true).await.unwrap();
        put_static(&pool, "/a", b"a", "text/html", true).await.unwrap();
        put_static(&pool, "/robots.txt", b"", "text/plain", false).await.unwrap();
        let first = fetch_indexed_paths_after(&pool, None, 1).await.unwrap();
        assert_eq!(first, vec!["/a".to_string()]);
        let rest = fetch_indexed_paths_after(&pool, Some("/a"), 10).await.unwrap();
        assert_eq!(rest, vec!["/b".to_string()]);
    }
}
