//! Hierarchical import: articles into the local store, their comments into the
//! remote commenting service.
//!
//! Each step is its own task. Articles move in bounded batches with the tail
//! carried in the next task; comments move one remote post per task, and a
//! comment's replies are scheduled only once the remote service has returned
//! the reference they must hang under.

use crate::config::Config;
use crate::db::{self, Pool};
use crate::disqus::{CommentService, NewRemotePost};
use crate::model::{ImportedArticle, ImportedComment, NewPost, RemotePostRef, RemoteThreadRef};
use crate::queue::{ScheduleOptions, Task, TaskQueue};
use crate::regen;
use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

pub mod tree;
pub mod wordpress;

pub use tree::CommentTree;

/// Resolve the forum key and schedule the first batch.
///
/// Fails before anything is scheduled when the forum cannot be resolved.
#[instrument(skip_all, fields(items = items.len()))]
pub async fn start_migration(
    queue: &dyn TaskQueue,
    comments: &dyn CommentService,
    cfg: &Config,
    items: Vec<ImportedArticle>,
) -> Result<()> {
    let forum_key = comments
        .forum_api_key(&cfg.disqus.user_api_key, &cfg.disqus.forum_name)
        .await
        .with_context(|| format!("failed to resolve forum {:?}", cfg.disqus.forum_name))?;
    let task = Task::MigrateAll {
        forum_key,
        batch_size: cfg.migrate.batch_size,
        items,
    };
    queue.schedule(&task, ScheduleOptions::default()).await?;
    info!("migration scheduled");
    Ok(())
}

/// Import the first `batch_size` items and continue with the rest.
#[instrument(skip_all, fields(remaining = items.len(), batch_size = batch_size))]
pub async fn migrate_all(
    pool: &Pool,
    queue: &dyn TaskQueue,
    forum_key: &str,
    batch_size: usize,
    mut items: Vec<ImportedArticle>,
    regen_batch_size: u32,
) -> Result<()> {
    let tail = items.split_off(batch_size.max(1).min(items.len()));
    for item in items {
        migrate_one(pool, queue, forum_key, item).await?;
    }

    if tail.is_empty() {
        warn!("migration finished; starting rebuild");
        regen::regenerate_all(queue, regen_batch_size).await?;
    } else {
        let next = Task::MigrateAll {
            forum_key: forum_key.to_string(),
            batch_size,
            items: tail,
        };
        queue.schedule(&next, ScheduleOptions::default()).await?;
    }
    Ok(())
}

async fn migrate_one(
    pool: &Pool,
    queue: &dyn TaskQueue,
    forum_key: &str,
    item: ImportedArticle,
) -> Result<()> {
    let post = NewPost {
        path: item.path.clone(),
        title: item.title.clone(),
        body: item.body,
        body_markup: "html".to_string(),
        tags: item.tags,
        published: item.published,
        updated: item.published,
    };
    let id = db::upsert_post(pool, &post).await?;
    debug!(id, path = ?item.path, "article imported");

    if item.comments.is_empty() {
        return Ok(());
    }
    let Some(path) = item.path else {
        warn!(id, count = item.comments.len(), "draft has comments; not migrating them");
        return Ok(());
    };
    let task = Task::MigrateComments {
        forum_key: forum_key.to_string(),
        path,
        title: item.title,
        comments: item.comments,
    };
    queue.schedule(&task, ScheduleOptions::default()).await?;
    Ok(())
}

/// Open the remote thread for one article and schedule its root comments.
#[instrument(skip_all, fields(path = %path, count = comments.len()))]
pub async fn migrate_comments(
    queue: &dyn TaskQueue,
    service: &dyn CommentService,
    host: &str,
    forum_key: &str,
    path: &str,
    title: &str,
    comments: Vec<ImportedComment>,
) -> Result<RemoteThreadRef> {
    let thread = service.thread_by_identifier(forum_key, path, title).await?;
    service
        .update_thread_url(forum_key, &thread, &format!("http://{host}{path}"))
        .await?;

    let tree = CommentTree::build(comments);
    for skipped in tree.unreachable() {
        if tree.contains(skipped.parent) {
            warn!(id = skipped.id, parent = skipped.parent, "comment not below any root; skipping");
        } else {
            warn!(id = skipped.id, parent = skipped.parent, "comment parent missing; skipping");
        }
    }
    for root in tree.roots() {
        schedule_comment(queue, forum_key, &thread, &tree, root, None).await?;
    }
    info!(%thread, roots = tree.roots().len(), "thread ready");
    Ok(thread)
}

/// Create one remote post, then schedule its direct replies under it.
#[instrument(skip_all, fields(id = comment.id, %thread))]
pub async fn migrate_comment(
    queue: &dyn TaskQueue,
    service: &dyn CommentService,
    forum_key: &str,
    thread: &RemoteThreadRef,
    comment: &ImportedComment,
    descendants: Vec<ImportedComment>,
    parent: Option<&RemotePostRef>,
) -> Result<RemotePostRef> {
    let post = NewRemotePost::from(comment);
    let created = service.create_post(forum_key, thread, &post, parent).await?;
    debug!(remote = %created, "comment created");

    let tree = CommentTree::build(descendants);
    for child in tree.children_of(comment.id) {
        schedule_comment(queue, forum_key, thread, &tree, child, Some(created.clone())).await?;
    }
    Ok(created)
}

async fn schedule_comment(
    queue: &dyn TaskQueue,
    forum_key: &str,
    thread: &RemoteThreadRef,
    tree: &CommentTree,
    comment: &ImportedComment,
    parent: Option<RemotePostRef>,
) -> Result<()> {
    let task = Task::MigrateComment {
        forum_key: forum_key.to_string(),
        thread: thread.clone(),
        comment: comment.clone(),
        descendants: tree.descendants_of(comment.id),
        parent,
    };
    queue.schedule(&task, ScheduleOptions::default()).await?;
    Ok(())
}
