use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use pressline::config;
use pressline::db;
use pressline::deploy;
use pressline::disqus::DisqusClient;
use pressline::outbox::Worker;
use pressline::publish::SqlitePublisher;
use pressline::queue::SqliteTaskQueue;

#[derive(Debug, Parser)]
#[command(author, version, about = "Run the deferred task worker")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Do not schedule the post-deploy task at startup
    #[arg(long)]
    skip_deploy: bool,
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

    let queue = Arc::new(SqliteTaskQueue::new(pool.clone()));
    if !args.skip_deploy {
        deploy::run_deploy_task(queue.as_ref(), &cfg.version_id()).await?;
    }

    let worker = Worker {
        pool: pool.clone(),
        queue,
        publisher: Arc::new(SqlitePublisher::new(pool.clone())),
        comments: Arc::new(DisqusClient::from_config(&cfg.disqus)?),
        config: cfg.clone(),
    };
    let poll_sleep = Duration::from_millis(cfg.app.poll_interval_ms);
    let max_backoff = cfg.app.max_backoff_seconds as i64;

    info!(version = %cfg.version_id(), "worker started");
    loop {
        tokio::select! {
            res = worker.process_next_task(max_backoff) => match res {
                Ok(true) => {}
                Ok(false) => tokio::time::sleep(poll_sleep).await,
                Err(err) => {
                    error!(?err, "task worker error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }
    Ok(())
}
