//! Deferred task messages and the queue they are scheduled on.
//!
//! Every unit of work is a self-contained [`Task`] message: cursors,
//! remaining item lists and remote parent references travel inside the
//! payload, so any worker can pick a task up without shared memory.

use crate::db::{self, Pool};
use crate::model::{
    ImportedArticle, ImportedComment, PageKey, PostKey, RegenerationKey, RemotePostRef,
    RemoteThreadRef,
};
use crate::scan::ScanCursor;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Task {
    /// One page of the post regeneration scan.
    RegeneratePosts {
        run_id: Uuid,
        page: u32,
        cursor: ScanCursor<PostKey>,
    },
    /// One page of the page regeneration scan.
    RegeneratePages {
        run_id: Uuid,
        page: u32,
        cursor: ScanCursor<PageKey>,
    },
    /// Rebuild one artifact.
    Generate { key: RegenerationKey },
    /// Import the front of `items`, then continue with the tail.
    MigrateAll {
        forum_key: String,
        batch_size: usize,
        items: Vec<ImportedArticle>,
    },
    /// Open the remote thread for one article and fan out its root comments.
    MigrateComments {
        forum_key: String,
        path: String,
        title: String,
        comments: Vec<ImportedComment>,
    },
    /// Create one remote post, then fan out its direct replies.
    MigrateComment {
        forum_key: String,
        thread: RemoteThreadRef,
        comment: ImportedComment,
        /// Every comment below `comment`, in source order.
        descendants: Vec<ImportedComment>,
        parent: Option<RemotePostRef>,
    },
    /// Version-gated deploy actions.
    PostDeploy { version_id: String, force: bool },
}

impl Task {
    pub fn kind(&self) -> &'static str {
        match self {
            Task::RegeneratePosts { .. } => "regenerate_posts",
            Task::RegeneratePages { .. } => "regenerate_pages",
            Task::Generate { .. } => "generate",
            Task::MigrateAll { .. } => "migrate_all",
            Task::MigrateComments { .. } => "migrate_comments",
            Task::MigrateComment { .. } => "migrate_comment",
            Task::PostDeploy { .. } => "post_deploy",
        }
    }

    pub fn to_payload(&self) -> Result<String> {
        serde_json::to_string(self).context("failed to encode task payload")
    }

    pub fn from_payload(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).context("failed to decode task payload")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleOptions {
    /// Tasks sharing a name are scheduled at most once, ever.
    pub name: Option<String>,
    pub delay: Option<Duration>,
}

impl ScheduleOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheduled {
    Enqueued(i64),
    /// A task with the same name already exists or already ran.
    DuplicateName,
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn schedule(&self, task: &Task, options: ScheduleOptions) -> Result<Scheduled>;
}

/// Task queue persisted in the `tasks` table and drained by the outbox worker.
#[derive(Debug, Clone)]
pub struct SqliteTaskQueue {
    pool: Pool,
}

impl SqliteTaskQueue {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskQueue for SqliteTaskQueue {
    #[instrument(skip_all, fields(kind = task.kind()))]
    async fn schedule(&self, task: &Task, options: ScheduleOptions) -> Result<Scheduled> {
        let payload = task.to_payload()?;
        let delay_secs = options
            .delay
            .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        let id = db::enqueue_task(
            &self.pool,
            options.name.as_deref(),
            task.kind(),
            &payload,
            delay_secs,
        )
        .await?;
        match id {
            Some(id) => {
                debug!(id, "task scheduled");
                Ok(Scheduled::Enqueued(id))
            }
            None => {
                debug!(name = ?options.name, "task name already used");
                Ok(Scheduled::DuplicateName)
            }
        }
    }
}
