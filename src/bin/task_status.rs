use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use pressline::config;
use pressline::db;
use pressline::model::TaskState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum State {
    Pending,
    Failed,
}

#[derive(Debug, Parser)]
#[command(author, version, about = "List queued or parked tasks")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[arg(long, value_enum, default_value = "pending")]
    state: State,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let state = match args.state {
        State::Pending => TaskState::Pending,
        State::Failed => TaskState::Failed,
    };
    let rows = db::list_tasks(&pool, state).await?;
    if rows.is_empty() {
        println!("no {} tasks", state.as_str());
        return Ok(());
    }
    println!("{:>6}  {:<18} {:>7}  {:<20} name / last error", "id", "kind", "attempt", "due");
    for (id, name, kind, attempt, due_at, last_error) in rows {
        println!(
            "{:>6}  {:<18} {:>7}  {:<20} {}",
            id,
            kind,
            attempt,
            due_at,
            name.as_deref().unwrap_or("-")
        );
        if let Some(err) = last_error {
            println!("        error: {err}");
        }
    }
    Ok(())
}
