use crate::config::Config;
use crate::db::{self, Pool, TaskRow};
use crate::deploy::Deployer;
use crate::disqus::CommentService;
use crate::generate;
use crate::migrate;
use crate::publish::StaticPublisher;
use crate::queue::{Task, TaskQueue};
use crate::regen;
use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Everything a task needs to run. Tasks share nothing else.
#[derive(Clone)]
pub struct Worker {
    pub pool: Pool,
    pub queue: Arc<dyn TaskQueue>,
    pub publisher: Arc<dyn StaticPublisher>,
    pub comments: Arc<dyn CommentService>,
    pub config: Config,
}

impl Worker {
    async fn execute(&self, task: Task) -> Result<()> {
        let cfg = &self.config;
        let queue = self.queue.as_ref();
        match task {
            Task::RegeneratePosts {
                run_id,
                page,
                cursor,
            } => {
                regen::run_post_page(&self.pool, queue, run_id, page, &cursor, &cfg.regenerate)
                    .await?;
            }
            Task::RegeneratePages {
                run_id,
                page,
                cursor,
            } => {
                regen::run_page_page(&self.pool, queue, run_id, page, &cursor, &cfg.regenerate)
                    .await?;
            }
            Task::Generate { key } => {
                generate::generate(&self.pool, self.publisher.as_ref(), &cfg.site, &key).await?;
            }
            Task::MigrateAll {
                forum_key,
                batch_size,
                items,
            } => {
                migrate::migrate_all(
                    &self.pool,
                    queue,
                    &forum_key,
                    batch_size,
                    items,
                    cfg.regenerate.batch_size,
                )
                .await?;
            }
            Task::MigrateComments {
                forum_key,
                path,
                title,
                comments,
            } => {
                migrate::migrate_comments(
                    queue,
                    self.comments.as_ref(),
                    &cfg.site.host,
                    &forum_key,
                    &path,
                    &title,
                    comments,
                )
                .await?;
            }
            Task::MigrateComment {
                forum_key,
                thread,
                comment,
                descendants,
                parent,
            } => {
                migrate::migrate_comment(
                    queue,
                    self.comments.as_ref(),
                    &forum_key,
                    &thread,
                    &comment,
                    descendants,
                    parent.as_ref(),
                )
                .await?;
            }
            Task::PostDeploy { version_id, force } => {
                Deployer::new(&self.pool, queue, self.publisher.as_ref(), cfg)
                    .run_if_needed(&version_id, force)
                    .await?;
            }
        }
        Ok(())
    }

    /// Run one due task. Returns `false` when nothing was due.
    #[instrument(skip_all)]
    pub async fn process_next_task(&self, max_backoff_secs: i64) -> Result<bool> {
        let Some(row) = db::next_due_task(&self.pool).await? else {
            return Ok(false);
        };
        let TaskRow {
            id,
            name,
            kind,
            payload,
            attempt,
        } = row;

        let task = match Task::from_payload(&payload) {
            Ok(task) => task,
            Err(err) => {
                error!(?err, id, kind = %kind, "undecodable task; parking it");
                db::fail_task(&self.pool, id, &format!("{err:#}")).await?;
                return Ok(true);
            }
        };

        match self.execute(task).await {
            Ok(()) => {
                db::complete_task(&self.pool, id).await?;
                info!(id, kind = %kind, name = ?name, "task succeeded");
            }
            Err(err) => {
                warn!(?err, id, kind = %kind, attempt, "task failed; backoff");
                db::backoff_task_with_cap(&self.pool, id, attempt, max_backoff_secs, &format!("{err:#}"))
                    .await?;
            }
        }
        Ok(true)
    }

    /// Process every task that is due right now, including ones scheduled
    /// along the way without delay. Returns how many ran.
    pub async fn drain(&self, max_backoff_secs: i64) -> Result<usize> {
        let mut processed = 0;
        while self.process_next_task(max_backoff_secs).await? {
            processed += 1;
        }
        Ok(processed)
    }
}
