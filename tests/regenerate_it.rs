use anyhow::{anyhow, Result};
use chrono::{Duration, TimeZone, Utc};
use pressline::config::{self, Config};
use pressline::db;
use pressline::disqus::{CommentService, NewRemotePost};
use pressline::model::{NewPost, Page, RemotePostRef, RemoteThreadRef};
use pressline::outbox::Worker;
use pressline::publish::SqlitePublisher;
use pressline::queue::SqliteTaskQueue;
use pressline::regen;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

/// Regeneration never talks to the commenting service.
struct NoComments;

#[async_trait::async_trait]
impl CommentService for NoComments {
    async fn forum_api_key(&self, _user: &str, _forum: &str) -> Result<String> {
        Err(anyhow!("unexpected call"))
    }

    async fn thread_by_identifier(&self, _k: &str, _i: &str, _t: &str) -> Result<RemoteThreadRef> {
        Err(anyhow!("unexpected call"))
    }

    async fn update_thread_url(&self, _k: &str, _t: &RemoteThreadRef, _u: &str) -> Result<()> {
        Err(anyhow!("unexpected call"))
    }

    async fn create_post(
        &self,
        _k: &str,
        _t: &RemoteThreadRef,
        _p: &NewRemotePost,
        _parent: Option<&RemotePostRef>,
    ) -> Result<RemotePostRef> {
        Err(anyhow!("unexpected call"))
    }
}

fn test_config() -> Config {
    let mut cfg: Config = serde_yaml::from_str(config::example()).unwrap();
    cfg.site.posts_per_page = 10;
    cfg.regenerate.batch_size = 20;
    cfg
}

fn worker(pool: &sqlx::SqlitePool, cfg: Config) -> Worker {
    Worker {
        pool: pool.clone(),
        queue: Arc::new(SqliteTaskQueue::new(pool.clone())),
        publisher: Arc::new(SqlitePublisher::new(pool.clone())),
        comments: Arc::new(NoComments),
        config: cfg,
    }
}

async fn seed_posts(pool: &sqlx::SqlitePool, n: i64) {
    let base = Utc.with_ymd_and_hms(2020, 3, 1, 9, 0, 0).unwrap();
    for i in 1..=n {
        let ts = base + Duration::hours(i);
        db::upsert_post(
            pool,
            &NewPost {
                path: Some(format!("/2020/03/post-{i}")),
                title: format!("Post {i}"),
                body: format!("Body {i}"),
                body_markup: "markdown".into(),
                tags: vec!["shared".into(), format!("t{}", i % 3)],
                published: Some(ts),
                updated: Some(ts),
            },
        )
        .await
        .unwrap();
    }
}

async fn count(pool: &sqlx::SqlitePool, sql: &str) -> i64 {
    sqlx::query_scalar(sql).fetch_one(pool).await.unwrap()
}

async fn sitemap(pool: &sqlx::SqlitePool) -> String {
    let page = db::get_static(pool, "/sitemap.xml").await.unwrap().unwrap();
    String::from_utf8(page.body).unwrap()
}

#[tokio::test]
async fn full_scan_visits_every_post_once_in_three_pages() {
    let pool = setup_pool().await;
    seed_posts(&pool, 45).await;
    let w = worker(&pool, test_config());

    let run_id = regen::start_post_regeneration(w.queue.as_ref(), 20).await.unwrap();
    w.drain(60).await.unwrap();

    assert_eq!(
        count(&pool, "SELECT COUNT(*) FROM tasks WHERE kind = 'regenerate_posts'").await,
        3
    );
    assert_eq!(
        count(&pool, "SELECT COUNT(*) FROM posts WHERE last_regenerated_at IS NULL").await,
        0
    );
    assert_eq!(
        count(&pool, "SELECT COUNT(*) FROM tasks WHERE state != 'done'").await,
        0
    );

    // one generation task per distinct (generator, argument) for the whole run
    let names: Vec<String> =
        sqlx::query_scalar("SELECT name FROM tasks WHERE kind = 'generate' ORDER BY name")
            .fetch_all(&pool)
            .await
            .unwrap();
    let shared = format!("gen-{run_id}-tag-shared");
    assert_eq!(names.iter().filter(|n| **n == shared).count(), 1);
    let index = format!("gen-{run_id}-index-");
    assert_eq!(names.iter().filter(|n| **n == index).count(), 1);
    // 45 posts, 4 tags, one archive month, index, atom, sitemap
    assert_eq!(names.len(), 45 + 4 + 1 + 3);

    assert!(db::get_static(&pool, "/2020/03/post-45").await.unwrap().is_some());
    assert!(db::get_static(&pool, "/page/5").await.unwrap().is_some());
    assert!(db::get_static(&pool, "/tag/shared").await.unwrap().is_some());
    assert!(db::get_static(&pool, "/2020/03/").await.unwrap().is_some());

    // built after every post page of the run was published
    let xml = sitemap(&pool).await;
    assert_eq!(xml.matches("/2020/03/post-").count(), 45);
    assert!(xml.contains("<loc>http://blog.example.com/2020/03/post-1</loc>"));
    assert!(xml.contains("<loc>http://blog.example.com/page/5</loc>"));
}

#[tokio::test]
async fn page_multiple_of_batch_ends_on_empty_page() {
    let pool = setup_pool().await;
    seed_posts(&pool, 40).await;
    let w = worker(&pool, test_config());

    regen::start_post_regeneration(w.queue.as_ref(), 20).await.unwrap();
    w.drain(60).await.unwrap();

    assert_eq!(
        count(&pool, "SELECT COUNT(*) FROM tasks WHERE kind = 'regenerate_posts'").await,
        3
    );
}

#[tokio::test]
async fn write_back_can_be_disabled() {
    let pool = setup_pool().await;
    seed_posts(&pool, 3).await;
    let mut cfg = test_config();
    cfg.regenerate.write_back = false;
    let w = worker(&pool, cfg);

    regen::start_post_regeneration(w.queue.as_ref(), 2).await.unwrap();
    w.drain(60).await.unwrap();

    assert_eq!(
        count(&pool, "SELECT COUNT(*) FROM posts WHERE last_regenerated_at IS NOT NULL").await,
        0
    );
    assert!(db::get_static(&pool, "/2020/03/post-1").await.unwrap().is_some());
}

#[tokio::test]
async fn drafts_are_skipped() {
    let pool = setup_pool().await;
    seed_posts(&pool, 2).await;
    db::upsert_post(
        &pool,
        &NewPost {
            path: None,
            title: "Draft".into(),
            body: "wip".into(),
            body_markup: "html".into(),
            tags: vec!["draft-only".into()],
            published: None,
            updated: None,
        },
    )
    .await
    .unwrap();
    let w = worker(&pool, test_config());

    regen::start_post_regeneration(w.queue.as_ref(), 10).await.unwrap();
    w.drain(60).await.unwrap();

    assert!(db::get_static(&pool, "/tag/draft-only").await.unwrap().is_none());
    assert_eq!(
        count(&pool, "SELECT COUNT(*) FROM posts WHERE last_regenerated_at IS NULL").await,
        1
    );
}

#[tokio::test]
async fn full_site_regeneration_includes_pages() {
    let pool = setup_pool().await;
    seed_posts(&pool, 1).await;
    let created = Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap();
    for (i, path) in ["/about", "/contact", "/colophon"].iter().enumerate() {
        db::upsert_page(
            &pool,
            &Page {
                path: path.to_string(),
                title: path.trim_start_matches('/').to_string(),
                body: format!("page {i}"),
                body_markup: "txt".into(),
                created: created + Duration::days(i as i64),
                updated: created,
                last_regenerated_at: None,
            },
        )
        .await
        .unwrap();
    }
    let w = worker(&pool, test_config());

    regen::regenerate_all(w.queue.as_ref(), 2).await.unwrap();
    w.drain(60).await.unwrap();

    assert_eq!(
        count(&pool, "SELECT COUNT(*) FROM tasks WHERE kind = 'regenerate_pages'").await,
        2
    );
    assert_eq!(
        count(&pool, "SELECT COUNT(*) FROM pages WHERE last_regenerated_at IS NULL").await,
        0
    );
    let about = db::get_static(&pool, "/about").await.unwrap().unwrap();
    assert!(about.indexed);
    assert!(String::from_utf8(about.body).unwrap().contains("<p>page 0</p>"));
    let xml = sitemap(&pool).await;
    for path in ["/about", "/contact", "/colophon", "/2020/03/post-1"] {
        assert!(
            xml.contains(&format!("<loc>http://blog.example.com{path}</loc>")),
            "{path} missing from sitemap"
        );
    }
}

#[tokio::test]
async fn finished_runs_prune_old_tombstones() {
    let pool = setup_pool().await;
    seed_posts(&pool, 5).await;
    let mut cfg = test_config();
    cfg.regenerate.task_retention_hours = 0;
    let w = worker(&pool, cfg);

    let mut totals = Vec::new();
    let mut runs = Vec::new();
    for _ in 0..3 {
        runs.push(regen::start_post_regeneration(w.queue.as_ref(), 20).await.unwrap());
        w.drain(60).await.unwrap();
        totals.push(count(&pool, "SELECT COUNT(*) FROM tasks").await);
        assert_eq!(xml_post_count(&pool).await, 5);
    }
    // each run leaves only its own tail behind
    assert_eq!(totals[0], totals[1]);
    assert_eq!(totals[1], totals[2]);
    let first_run: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE name LIKE '%' || ? || '%'")
        .bind(runs[0].to_string())
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(first_run, 0);
}

#[tokio::test]
async fn default_retention_keeps_recent_tombstones() {
    let pool = setup_pool().await;
    seed_posts(&pool, 5).await;
    let w = worker(&pool, test_config());

    regen::start_post_regeneration(w.queue.as_ref(), 20).await.unwrap();
    w.drain(60).await.unwrap();
    let after_first = count(&pool, "SELECT COUNT(*) FROM tasks").await;
    regen::start_post_regeneration(w.queue.as_ref(), 20).await.unwrap();
    w.drain(60).await.unwrap();
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM tasks").await, after_first * 2);
}

async fn xml_post_count(pool: &sqlx::SqlitePool) -> usize {
    sitemap(pool).await.matches("/2020/03/post-").count()
}
