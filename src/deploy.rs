//! Version-gated post-deploy actions.
//!
//! A marker row per deployment version id records that the actions ran. The
//! marker is claimed with create-if-absent before anything runs, so two
//! workers racing on the same version run the actions once.

use crate::config::{Config, StaticPage};
use crate::db::{self, Pool};
use crate::model::{DeployVersionMarker, VersionTriple};
use crate::publish::{StaticPublisher, HTML_MIME};
use crate::queue::{ScheduleOptions, Scheduled, Task, TaskQueue};
use crate::regen;
use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

const KICKOFF_DELAY: Duration = Duration::from_secs(10);

/// Context the gated actions run in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployMode {
    /// No marker for any version existed.
    BrandNew,
    /// `previous` is the most recent marker of an earlier deployment.
    Upgrade { previous: DeployVersionMarker },
    /// Re-run for a version whose marker already exists.
    Forced { existing: DeployVersionMarker },
}

impl DeployMode {
    /// Build triple the current deployment is compared against.
    fn previous_version(&self, current: VersionTriple) -> VersionTriple {
        match self {
            DeployMode::BrandNew => current,
            DeployMode::Upgrade { previous } => previous.version,
            DeployMode::Forced { existing } => existing.version,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployOutcome {
    AlreadyDeployed,
    Ran(DeployMode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployAction {
    StaticPages,
    RegenerateAll,
    SiteVerification,
}

/// Ordered actions for this configuration.
pub fn actions(cfg: &Config) -> Vec<DeployAction> {
    let mut actions = vec![DeployAction::StaticPages, DeployAction::RegenerateAll];
    if cfg.site.google_site_verification.is_some() {
        actions.push(DeployAction::SiteVerification);
    }
    actions
}

pub fn deploy_task_name(version_id: &str) -> String {
    format!("deploy-{}", version_id.replace('.', "-"))
}

/// Schedule the post-deploy task for `version_id` once, 10 s from now.
#[instrument(skip(queue))]
pub async fn run_deploy_task(queue: &dyn TaskQueue, version_id: &str) -> Result<Scheduled> {
    let task = Task::PostDeploy {
        version_id: version_id.to_string(),
        force: false,
    };
    let options = ScheduleOptions::named(deploy_task_name(version_id)).with_delay(KICKOFF_DELAY);
    let scheduled = queue.schedule(&task, options).await?;
    match scheduled {
        Scheduled::Enqueued(id) => info!(id, "post-deploy scheduled"),
        Scheduled::DuplicateName => debug!("post-deploy already scheduled for this version"),
    }
    Ok(scheduled)
}

pub struct Deployer<'a> {
    pool: &'a Pool,
    queue: &'a dyn TaskQueue,
    publisher: &'a dyn StaticPublisher,
    cfg: &'a Config,
    current: VersionTriple,
}

impl<'a> Deployer<'a> {
    pub fn new(
        pool: &'a Pool,
        queue: &'a dyn TaskQueue,
        publisher: &'a dyn StaticPublisher,
        cfg: &'a Config,
    ) -> Self {
        Self {
            pool,
            queue,
            publisher,
            cfg,
            current: VersionTriple::current(),
        }
    }

    pub fn with_current_version(mut self, current: VersionTriple) -> Self {
        self.current = current;
        self
    }

    /// Run the gated actions unless `version_id` already has a marker.
    ///
    /// `force` re-runs them for an existing marker without writing a new one.
    #[instrument(skip(self), fields(current = %self.current))]
    pub async fn run_if_needed(&self, version_id: &str, force: bool) -> Result<DeployOutcome> {
        if let Some(existing) = db::get_version_marker(self.pool, version_id).await? {
            if !force {
                debug!("deploy actions already ran for this version");
                return Ok(DeployOutcome::AlreadyDeployed);
            }
            let mode = DeployMode::Forced { existing };
            self.run_actions(&mode).await?;
            info!("forced deploy actions finished");
            return Ok(DeployOutcome::Ran(mode));
        }

        let previous = db::latest_version_marker(self.pool).await?;
        if !db::claim_version_marker(self.pool, version_id, self.current).await? {
            debug!("marker claimed concurrently");
            return Ok(DeployOutcome::AlreadyDeployed);
        }
        let mode = match previous {
            None => DeployMode::BrandNew,
            Some(previous) => DeployMode::Upgrade { previous },
        };
        if let Err(err) = self.run_actions(&mode).await {
            warn!(?err, "deploy actions failed; releasing marker");
            db::release_version_marker(self.pool, version_id).await?;
            return Err(err);
        }
        info!(?mode, "deploy actions finished");
        Ok(DeployOutcome::Ran(mode))
    }

    async fn run_actions(&self, mode: &DeployMode) -> Result<()> {
        for action in actions(self.cfg) {
            debug!(?action, "running deploy action");
            match action {
                DeployAction::StaticPages => self.publish_static_pages().await?,
                DeployAction::RegenerateAll => self.regenerate_if_older(mode).await?,
                DeployAction::SiteVerification => self.site_verification().await?,
            }
        }
        Ok(())
    }

    async fn publish_static_pages(&self) -> Result<()> {
        for page in &self.cfg.deploy.static_pages {
            self.publish_static_page(page).await?;
        }
        Ok(())
    }

    async fn publish_static_page(&self, page: &StaticPage) -> Result<()> {
        let content = tokio::fs::read(&page.source)
            .await
            .with_context(|| format!("failed to read static page source {}", page.source))?;
        self.publisher
            .publish(&page.path, &content, &page.content_type, page.indexed)
            .await
    }

    async fn regenerate_if_older(&self, mode: &DeployMode) -> Result<()> {
        let previous = mode.previous_version(self.current);
        if previous < self.current {
            info!(%previous, "upgrading; regenerating everything");
            regen::regenerate_all(self.queue, self.cfg.regenerate.batch_size).await?;
        }
        Ok(())
    }

    async fn site_verification(&self) -> Result<()> {
        let Some(code) = self.cfg.site.google_site_verification.as_deref() else {
            return Ok(());
        };
        let body = format!("google-site-verification: google{code}.html");
        self.publisher
            .publish(&format!("/google{code}.html"), body.as_bytes(), HTML_MIME, false)
            .await
    }
}
