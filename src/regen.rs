//! Dependency-driven regeneration of generated artifacts.
//!
//! A regeneration run walks posts (or pages) newest-first one page per task.
//! Each entity names the artifacts built from it; every distinct artifact is
//! scheduled once per run as a [`Task::Generate`], and the next page is
//! scheduled from inside the current one after its work is queued.
//! Artifacts built from other artifacts' output (the sitemap) are scheduled
//! only when the run finishes, behind every generation task of the run.

use crate::config::Regenerate;
use crate::db::{self, Pool};
use crate::dedup::RunDeduplicator;
use crate::model::{GeneratorKind, Page, Post, RegenerationKey};
use crate::queue::{ScheduleOptions, Scheduled, Task, TaskQueue};
use crate::scan::{scan, Direction, Keyed, OrderedSource, ScanCursor};
use crate::store::{PageSource, PostSource};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Entities that can enumerate the artifacts generated from them.
pub trait Dependencies {
    fn dependencies(&self) -> Vec<RegenerationKey>;
}

impl Dependencies for Post {
    fn dependencies(&self) -> Vec<RegenerationKey> {
        if self.is_draft() {
            return Vec::new();
        }
        let mut deps = vec![
            RegenerationKey::new(GeneratorKind::Post, self.id.to_string()),
            RegenerationKey::new(GeneratorKind::Index, ""),
        ];
        deps.extend(
            self.tags
                .iter()
                .map(|tag| RegenerationKey::new(GeneratorKind::Tag, tag.as_str())),
        );
        if let Some(month) = self.archive_month() {
            deps.push(RegenerationKey::new(GeneratorKind::Archive, month));
        }
        deps.push(RegenerationKey::new(GeneratorKind::Atom, ""));
        deps.push(RegenerationKey::new(GeneratorKind::Sitemap, ""));
        deps
    }
}

impl Dependencies for Page {
    fn dependencies(&self) -> Vec<RegenerationKey> {
        vec![
            RegenerationKey::new(GeneratorKind::Page, self.path.as_str()),
            RegenerationKey::new(GeneratorKind::Sitemap, ""),
        ]
    }
}

/// Entity kinds a regeneration run can walk.
pub trait Regenerable: Keyed + Dependencies {
    const LABEL: &'static str;

    /// Task that processes the page after `cursor`.
    fn continuation(run_id: Uuid, page: u32, cursor: ScanCursor<Self::Key>) -> Task;
}

impl Regenerable for Post {
    const LABEL: &'static str = "posts";

    fn continuation(run_id: Uuid, page: u32, cursor: ScanCursor<Self::Key>) -> Task {
        Task::RegeneratePosts {
            run_id,
            page,
            cursor,
        }
    }
}

impl Regenerable for Page {
    const LABEL: &'static str = "pages";

    fn continuation(run_id: Uuid, page: u32, cursor: ScanCursor<Self::Key>) -> Task {
        Task::RegeneratePages {
            run_id,
            page,
            cursor,
        }
    }
}

/// Ordered store that can also re-save an entity after it was processed.
#[async_trait]
pub trait EntityStore<T: Keyed>: OrderedSource<T> {
    async fn write_back(&self, item: &T, at: DateTime<Utc>) -> Result<()>;
}

#[async_trait]
impl<'a> EntityStore<Post> for PostSource<'a> {
    async fn write_back(&self, item: &Post, at: DateTime<Utc>) -> Result<()> {
        db::touch_post(self.pool(), item.id, at).await
    }
}

#[async_trait]
impl<'a> EntityStore<Page> for PageSource<'a> {
    async fn write_back(&self, item: &Page, at: DateTime<Utc>) -> Result<()> {
        db::touch_page(self.pool(), &item.path, at).await
    }
}

/// Prefixes of the per-run task names pruned once a run finishes.
const RUN_TASK_PREFIXES: [&str; 2] = ["gen-", "regen-"];

/// Generators that read published output, scheduled once the run has queued everything else.
const END_OF_RUN: [GeneratorKind; 1] = [GeneratorKind::Sitemap];

/// Name that lets the queue collapse repeats of a key within one run.
pub fn generation_task_name(run_id: Uuid, key: &RegenerationKey) -> String {
    format!("gen-{run_id}-{}-{}", key.generator.as_str(), key.argument)
}

fn page_task_name(label: &str, run_id: Uuid, page: u32) -> String {
    format!("regen-{label}-{run_id}-{page}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageOutcome {
    pub processed: usize,
    pub scheduled: usize,
    pub finished: bool,
}

/// One invocation of a regeneration run.
pub struct Regenerator<'a> {
    queue: &'a dyn TaskQueue,
    run_id: Uuid,
    seen: RunDeduplicator,
    write_back: bool,
}

impl<'a> Regenerator<'a> {
    pub fn new(queue: &'a dyn TaskQueue, run_id: Uuid, write_back: bool) -> Self {
        Self {
            queue,
            run_id,
            seen: RunDeduplicator::new(),
            write_back,
        }
    }

    /// Schedule generation for every dependency of `item` not yet scheduled this run.
    /// End-of-run generators are left for [`Regenerator::regenerate`]'s last page.
    pub async fn schedule_dependencies<T: Dependencies + ?Sized>(&mut self, item: &T) -> Result<usize> {
        let mut scheduled = 0;
        for key in item.dependencies() {
            if END_OF_RUN.contains(&key.generator) || !self.seen.should_schedule(&key) {
                continue;
            }
            if self.schedule_generation(key).await? {
                scheduled += 1;
            }
        }
        Ok(scheduled)
    }

    async fn schedule_generation(&self, key: RegenerationKey) -> Result<bool> {
        let options = ScheduleOptions::named(generation_task_name(self.run_id, &key));
        let task = Task::Generate { key: key.clone() };
        match self.queue.schedule(&task, options).await? {
            Scheduled::Enqueued(_) => {
                debug!(%key, "generation scheduled");
                Ok(true)
            }
            Scheduled::DuplicateName => {
                debug!(%key, "generation already scheduled");
                Ok(false)
            }
        }
    }

    /// Process the page after `cursor` and schedule the next page if there is one.
    #[instrument(skip_all, fields(run = %self.run_id, kind = T::LABEL, page = page))]
    pub async fn regenerate<T, S>(
        &mut self,
        store: &S,
        page: u32,
        cursor: &ScanCursor<T::Key>,
    ) -> Result<PageOutcome>
    where
        T: Regenerable,
        S: EntityStore<T> + ?Sized,
    {
        let fetched = scan(store, cursor).await?;
        let now = Utc::now();
        let mut scheduled = 0;
        for item in &fetched.items {
            scheduled += self.schedule_dependencies(item).await?;
            if self.write_back {
                store.write_back(item, now).await?;
            }
        }

        let processed = fetched.items.len();
        let finished = match fetched.next {
            Some(next) => {
                let next_page = page + 1;
                let task = T::continuation(self.run_id, next_page, next);
                let options = ScheduleOptions::named(page_task_name(T::LABEL, self.run_id, next_page));
                self.queue.schedule(&task, options).await?;
                debug!(processed, scheduled, next_page, "page done; continuing");
                false
            }
            None => {
                for kind in END_OF_RUN {
                    let key = RegenerationKey::new(kind, "");
                    scheduled += usize::from(self.schedule_generation(key).await?);
                }
                info!(processed, scheduled, "regeneration run finished");
                true
            }
        };
        Ok(PageOutcome {
            processed,
            scheduled,
            finished,
        })
    }
}

/// Schedule the first page of a full post scan. Returns the run id.
pub async fn start_post_regeneration(queue: &dyn TaskQueue, batch_size: u32) -> Result<Uuid> {
    start::<Post>(queue, batch_size).await
}

/// Schedule the first page of a full page scan. Returns the run id.
pub async fn start_page_regeneration(queue: &dyn TaskQueue, batch_size: u32) -> Result<Uuid> {
    start::<Page>(queue, batch_size).await
}

/// Full-site regeneration: posts and pages.
pub async fn regenerate_all(queue: &dyn TaskQueue, batch_size: u32) -> Result<()> {
    start_post_regeneration(queue, batch_size).await?;
    start_page_regeneration(queue, batch_size).await?;
    Ok(())
}

async fn start<T: Regenerable>(queue: &dyn TaskQueue, batch_size: u32) -> Result<Uuid> {
    let run_id = Uuid::new_v4();
    let task = T::continuation(run_id, 0, ScanCursor::start(batch_size, Direction::Descending));
    queue
        .schedule(&task, ScheduleOptions::named(page_task_name(T::LABEL, run_id, 0)))
        .await?;
    info!(%run_id, kind = T::LABEL, batch_size, "regeneration run started");
    Ok(run_id)
}

/// Task body for [`Task::RegeneratePosts`].
pub async fn run_post_page(
    pool: &Pool,
    queue: &dyn TaskQueue,
    run_id: Uuid,
    page: u32,
    cursor: &ScanCursor<<Post as Keyed>::Key>,
    settings: &Regenerate,
) -> Result<PageOutcome> {
    let mut regen = Regenerator::new(queue, run_id, settings.write_back);
    let outcome = regen
        .regenerate::<Post, _>(&PostSource::all(pool), page, cursor)
        .await?;
    prune_if_finished(pool, &outcome, settings).await?;
    Ok(outcome)
}

/// Task body for [`Task::RegeneratePages`].
pub async fn run_page_page(
    pool: &Pool,
    queue: &dyn TaskQueue,
    run_id: Uuid,
    page: u32,
    cursor: &ScanCursor<<Page as Keyed>::Key>,
    settings: &Regenerate,
) -> Result<PageOutcome> {
    let mut regen = Regenerator::new(queue, run_id, settings.write_back);
    let outcome = regen
        .regenerate::<Page, _>(&PageSource::new(pool), page, cursor)
        .await?;
    prune_if_finished(pool, &outcome, settings).await?;
    Ok(outcome)
}

/// Drop completed per-run tombstones past the retention window once a run ends.
async fn prune_if_finished(pool: &Pool, outcome: &PageOutcome, settings: &Regenerate) -> Result<()> {
    if !outcome.finished {
        return Ok(());
    }
    let older_than = settings.task_retention_hours.saturating_mul(3600);
    let pruned = db::prune_done_tasks(pool, &RUN_TASK_PREFIXES, i64::try_from(older_than)?).await?;
    if pruned > 0 {
        info!(pruned, "old regeneration tasks pruned");
    }
    Ok(())
}
