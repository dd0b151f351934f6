use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use std::fs::File;
use std::path::PathBuf;
use tracing::info;
use uuid::Uuid;

use pinsmith::config;
use pinsmith::db::{self, SqliteRecorder};
use pinsmith::export::write_csv;
use pinsmith::pipeline::run_publish;
use pinsmith::publisher::{GithubPublisher, Publisher};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Upload the ready pins of a batch and write the scheduling CSV"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Batch to publish; defaults to the most recent one
    #[arg(long)]
    batch: Option<Uuid>,

    /// First publish slot (RFC 3339); defaults to the batch's start time
    #[arg(long)]
    start: Option<DateTime<Utc>>,

    /// Where to write the CSV export
    #[arg(long, default_value = "pins.csv")]
    out: PathBuf,
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

    let batch_id = match args.batch {
        Some(id) => id,
        None => db::latest_batch_id(&pool)
            .await?
            .context("no batches stored yet")?,
    };
    let mut stored = db::load_batch(&pool, batch_id).await?;

    let publisher = GithubPublisher::from_config(&cfg.publisher)?;
    if !publisher.verify_connection().await {
        bail!(
            "cannot reach repository {}/{}; check publisher settings",
            cfg.publisher.owner,
            cfg.publisher.repo
        );
    }

    let start = args.start.unwrap_or(stored.config.start_time);
    info!(%batch_id, %start, "publishing batch");
    let recorder = SqliteRecorder::new(pool.clone());
    let rows = run_publish(&mut stored.items, &publisher, start, &recorder).await;

    let file = File::create(&args.out)
        .with_context(|| format!("failed to create {}", args.out.display()))?;
    write_csv(&rows, file)?;
    println!(
        "batch {}: {} pins published, export written to {}",
        batch_id,
        rows.len(),
        args.out.display()
    );
    Ok(())
}
