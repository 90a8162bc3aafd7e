use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use pressline::config;
use pressline::db;
use pressline::disqus::DisqusClient;
use pressline::migrate::{self, wordpress};
use pressline::queue::SqliteTaskQueue;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Import a WordPress export and migrate its comments to Disqus"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// JSON export file
    #[arg(long)]
    export: PathBuf,

    /// Parse the export and report what would be imported
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let items = wordpress::load_export(&args.export, &cfg.site)
        .await
        .with_context(|| format!("failed to read export {}", args.export.display()))?;
    let comments: usize = items.iter().map(|i| i.comments.len()).sum();
    info!(items = items.len(), comments, "export loaded");
    if args.dry_run {
        return Ok(());
    }

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;
    let queue = SqliteTaskQueue::new(pool);
    let client = DisqusClient::from_config(&cfg.disqus)?;

    migrate::start_migration(&queue, &client, &cfg, items).await?;
    Ok(())
}
