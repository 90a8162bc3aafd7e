use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::info;

use pressline::config;
use pressline::db;
use pressline::queue::SqliteTaskQueue;
use pressline::regen;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Scope {
    All,
    Posts,
    Pages,
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Schedule a full regeneration run; the worker picks it up"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Which entities to scan
    #[arg(long, value_enum, default_value = "all")]
    scope: Scope,

    /// Entities per page (defaults to regenerate.batch_size)
    #[arg(long)]
    batch_size: Option<u32>,
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

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;
    let queue = SqliteTaskQueue::new(pool);

    let batch_size = args
        .batch_size
        .filter(|n| *n > 0)
        .unwrap_or(cfg.regenerate.batch_size);
    match args.scope {
        Scope::All => regen::regenerate_all(&queue, batch_size).await?,
        Scope::Posts => {
            regen::start_post_regeneration(&queue, batch_size).await?;
        }
        Scope::Pages => {
            regen::start_page_regeneration(&queue, batch_size).await?;
        }
    }
    info!(scope = ?args.scope, batch_size, "regeneration scheduled");
    Ok(())
}
